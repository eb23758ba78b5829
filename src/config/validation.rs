//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes and timeouts > 0, address parses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::RelayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {field}: {value:?} is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("relay.chunk_size ({chunk}) exceeds relay.max_image_size ({max})")]
    ChunkLargerThanLimit { chunk: usize, max: u64 },
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    let relay = &config.relay;
    if relay.max_image_size == 0 {
        errors.push(ValidationError::Zero("relay.max_image_size"));
    }
    if relay.chunk_size == 0 {
        errors.push(ValidationError::Zero("relay.chunk_size"));
    } else if relay.max_image_size > 0 && relay.chunk_size as u64 > relay.max_image_size {
        errors.push(ValidationError::ChunkLargerThanLimit {
            chunk: relay.chunk_size,
            max: relay.max_image_size,
        });
    }

    let timeouts = &config.timeouts;
    for (name, value) in [
        ("timeouts.connect_secs", timeouts.connect_secs),
        ("timeouts.read_secs", timeouts.read_secs),
        ("timeouts.request_secs", timeouts.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
