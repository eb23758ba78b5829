//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, relay handler)
//!     → request.rs (request ID, query parameters)
//!     → [relay subsystem fetches and streams]
//!     → response.rs (error mapping)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RelayParams, UuidRequestId, X_REQUEST_ID};
pub use response::ErrorBody;
pub use server::HttpServer;
