//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → shared via Arc to the relay handler
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the relay only reads constants from it
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::GuardConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::RelayConfig;
pub use schema::RelaySettings;
pub use schema::TimeoutConfig;
