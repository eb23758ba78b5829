//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_shutdown_signal() returns
//!
//! Shutdown (shutdown.rs):
//!     trigger() → server stops accepting → in-flight relays drain → exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
