//! Image relay library.
//!
//! Fetches remote images on behalf of untrusted clients and streams them
//! back, refusing internal address space and bounding every transfer.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod relay;

pub use config::RelayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
