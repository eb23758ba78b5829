//! Inbound request handling.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for every request
//! - Extract the relay parameters from the query string
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Parameters are all optional at the serde level so a missing `url` is
//!   reported in the relay's own error format

use axum::http::{HeaderMap, HeaderValue, Request};
use serde::Deserialize;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::relay::{FetchRequest, RelayError};

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// The request ID assigned to a request, or "unknown".
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Query parameters of `GET /image/proxy`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayParams {
    /// Image to fetch.
    pub url: Option<String>,
    /// Page the image is embedded in.
    pub referer: Option<String>,
}

impl RelayParams {
    /// Validate the parameters into a fetch request.
    pub fn into_fetch_request(self, inbound: &HeaderMap) -> Result<FetchRequest, RelayError> {
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| RelayError::InvalidRequest("missing url parameter".to_string()))?;
        FetchRequest::new(&url, self.referer.as_deref(), inbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_is_uuid() {
        let request = Request::builder().body(()).unwrap();
        let id = UuidRequestId.make_request_id(&request).unwrap();
        let value = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(value).is_ok());
    }

    #[test]
    fn test_missing_url() {
        let err = RelayParams::default().into_fetch_request(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "missing url parameter");

        let params = RelayParams {
            url: Some("   ".into()),
            referer: None,
        };
        assert!(params.into_fetch_request(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_params_into_request() {
        let params = RelayParams {
            url: Some("https://img.example.com/a.png".into()),
            referer: Some("https://blog.example.com/".into()),
        };
        let request = params.into_fetch_request(&HeaderMap::new()).unwrap();
        assert_eq!(request.target().as_str(), "https://img.example.com/a.png");
        assert!(request.referer().is_some());
    }
}
