//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Relay handler, fetcher and streamer produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID (x-request-id) flows through every log line of a request
//! - Metrics are cheap (no-ops until a recorder is installed)

pub mod logging;
pub mod metrics;
