//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Default maximum image size relayed to a client (2 MiB).
pub const DEFAULT_MAX_IMAGE_SIZE: u64 = 2 * 1024 * 1024;

/// Default size of each chunk written to the client (8 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Root configuration for the image relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Relay limits and upstream identity.
    pub relay: RelaySettings,

    /// Address guard settings.
    pub guard: GuardConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Limits applied to every relayed image.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Maximum number of body bytes relayed per request.
    pub max_image_size: u64,

    /// Size of each chunk written to the client.
    pub chunk_size: usize,

    /// Maximum redirect hops followed per upstream attempt.
    pub max_redirects: usize,

    /// User-Agent sent upstream.
    pub user_agent: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_redirects: 5,
            user_agent: concat!("image-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Address guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Addresses exempt from private-range classification.
    /// Empty by default; intended for controlled deployments only.
    pub trusted_addresses: Vec<IpAddr>,
}

/// Timeout configuration for upstream operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Upstream read timeout in seconds (per read, not per body).
    pub read_secs: u64,

    /// Deadline for the whole upstream fetch (every attempt and redirect hop,
    /// up to the final response head), in seconds.
    pub request_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            read_secs: 30,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
