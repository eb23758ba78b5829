//! Relay error definitions.
//!
//! Inner components only distinguish failure categories; the HTTP layer is
//! the single place where a [`RelayError`] becomes a status code.

use axum::BoxError;
use thiserror::Error;

/// Message used when an address guard denies a disallowed range.
pub const PRIVATE_ADDRESS_DENIED: &str = "private address not allowed";

/// Failure of an upstream fetch. Both variants are terminal for the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The target (or a redirect target) failed the address policy.
    #[error("{0}")]
    PolicyRejected(String),

    /// Connect, timeout or protocol failure talking to the upstream.
    #[error("{0}")]
    NetworkFailure(String),
}

/// Errors that end a relay request before any body byte is written.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or malformed input parameters.
    #[error("{0}")]
    InvalidRequest(String),

    /// Address or redirect policy violation.
    #[error("{0}")]
    Policy(String),

    /// Upstream transport failure.
    #[error("{0}")]
    Network(String),

    /// Upstream declared a body larger than the configured maximum.
    #[error("image too large")]
    TooLarge { declared: u64, limit: u64 },

    /// Anything else that went wrong after the upstream was opened.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<FetchError> for RelayError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::PolicyRejected(reason) => RelayError::Policy(reason),
            FetchError::NetworkFailure(detail) => RelayError::Network(detail),
        }
    }
}

/// Reason a body stream was cut short after headers were committed.
///
/// Yielded as a body error so the server aborts the connection instead of
/// finishing the response.
#[derive(Debug, Error)]
pub enum RelayAbort {
    #[error("image exceeds {limit} bytes, response aborted")]
    SizeExceeded { limit: u64 },

    #[error("upstream read failed: {0}")]
    Upstream(BoxError),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
