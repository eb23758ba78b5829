//! The validated description of one relay request.

use axum::http::{HeaderMap, HeaderValue};
use url::Url;

use crate::relay::error::RelayError;
use crate::relay::headers::forwarded_headers;

/// What to fetch, on whose behalf, with which client headers.
///
/// Built once from the inbound request and never modified.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    target: Url,
    referer: Option<HeaderValue>,
    forwarded: HeaderMap,
}

impl FetchRequest {
    /// Validate the inbound parameters and capture the allow-listed headers.
    ///
    /// An empty `referer` is treated as absent.
    pub fn new(target: &str, referer: Option<&str>, inbound: &HeaderMap) -> Result<Self, RelayError> {
        let target = Url::parse(target.trim())
            .map_err(|e| RelayError::InvalidRequest(format!("invalid url: {}", e)))?;
        match target.scheme() {
            "http" | "https" => {}
            other => {
                return Err(RelayError::InvalidRequest(format!("unsupported url scheme: {}", other)));
            }
        }
        if target.host().is_none() {
            return Err(RelayError::InvalidRequest("url has no host".to_string()));
        }

        let referer = match referer.map(str::trim).filter(|r| !r.is_empty()) {
            Some(r) => Some(
                HeaderValue::from_str(r).map_err(|_| RelayError::InvalidRequest("invalid referer".to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            target,
            referer,
            forwarded: forwarded_headers(inbound),
        })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn referer(&self) -> Option<&HeaderValue> {
        self.referer.as_ref()
    }

    /// Allow-listed client headers, in the order the client sent them.
    pub fn forwarded(&self) -> &HeaderMap {
        &self.forwarded
    }
}
