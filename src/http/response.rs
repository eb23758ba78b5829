//! Error responses.
//!
//! # Responsibilities
//! - Map relay errors to HTTP status codes (the only place this happens)
//! - Render the `{ "message": ... }` error body
//!
//! # Design Decisions
//! - Policy, input and upstream transport failures are all client errors (400)
//! - A declared oversize image is 413
//! - Internal faults are logged with detail but rendered generically

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::relay::RelayError;

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Status code for a relay error.
pub fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::InvalidRequest(_) | RelayError::Policy(_) | RelayError::Network(_) => StatusCode::BAD_REQUEST,
        RelayError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let message = match &self {
            RelayError::Internal(detail) => {
                tracing::error!(error = %detail, "Relay failed with internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: RelayError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_policy_error_response() {
        let (status, body) = render(RelayError::Policy("private address not allowed".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "private address not allowed");
    }

    #[tokio::test]
    async fn test_too_large_response() {
        let (status, body) = render(RelayError::TooLarge { declared: 5_000_000, limit: 2_097_152 }).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body.message, "image too large");
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let (status, body) = render(RelayError::Internal("bad header".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "internal server error");
    }

    #[test]
    fn test_network_error_is_client_error() {
        assert_eq!(status_for(&RelayError::Network("timed out".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&RelayError::InvalidRequest("missing url".into())), StatusCode::BAD_REQUEST);
    }
}
