//! Image relay subsystem.
//!
//! # Data Flow
//! ```text
//! GET /image/proxy?url=..&referer=..
//!     → request.rs (validate url/referer, capture allow-listed headers)
//!     → fetcher.rs (two-phase GET driven by state.rs)
//!         → guard.rs (verify target, and again for every redirect hop)
//!         → headers.rs (upstream request headers)
//!         → lease.rs (upstream ownership, released on drop)
//!     → streamer.rs (pre-flight size check, response head, bounded body)
//!         → headers.rs (downstream response headers)
//!     → client
//! ```
//!
//! # Design Decisions
//! - Nothing is shared between requests except read-only configuration
//! - Each step gates the next; no step runs in parallel with another
//! - Inner components return typed errors; only the HTTP layer picks statuses

pub mod error;
pub mod fetcher;
pub mod guard;
pub mod headers;
pub mod lease;
pub mod request;
pub mod state;
pub mod streamer;

pub use error::{FetchError, RelayAbort, RelayError, RelayResult};
pub use fetcher::UpstreamFetcher;
pub use guard::{AddressGuard, AddressVerdict, Resolve, SystemResolver};
pub use lease::{UpstreamLease, UpstreamTracker};
pub use request::FetchRequest;
pub use state::{FetchEvent, FetchState};
pub use streamer::{SizeGuard, StreamLimits};
