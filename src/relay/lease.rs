//! Upstream connection ownership and release tracking.
//!
//! # Responsibilities
//! - Hand out a guard for every upstream attempt before it is issued
//! - Keep the session, the response and the guard under a single owner
//! - Release the upstream exactly once, whichever way the request ends
//!
//! # Design Decisions
//! - Release is `Drop`, never an explicit close call, so new exit paths
//!   cannot skip it
//! - The guard moves from the lease into the body stream, so a client
//!   disconnect mid-stream releases the upstream too

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{header, HeaderMap, StatusCode};
use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use url::Url;

/// Global atomic counter for upstream IDs.
static UPSTREAM_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpstreamId(u64);

impl UpstreamId {
    /// Generate a new unique upstream ID.
    pub fn new() -> Self {
        Self(UPSTREAM_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for UpstreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UpstreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "up-{}", self.0)
    }
}

/// Counts upstream attempts that are open and that were ever opened.
#[derive(Debug, Clone, Default)]
pub struct UpstreamTracker {
    active: Arc<AtomicU64>,
    opened: Arc<AtomicU64>,
}

impl UpstreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new upstream attempt. The returned guard releases it on drop.
    pub fn open(&self, url: &Url) -> UpstreamGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let guard = UpstreamGuard {
            active: Arc::clone(&self.active),
            id: UpstreamId::new(),
            opened_at: Instant::now(),
        };
        tracing::debug!(upstream_id = %guard.id, url = %url, "Upstream opened");
        guard
    }

    /// Upstream attempts currently holding a connection.
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Upstream attempts issued since the tracker was created.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }
}

/// Proof that an upstream attempt is open. Releases it when dropped.
#[derive(Debug)]
pub struct UpstreamGuard {
    active: Arc<AtomicU64>,
    id: UpstreamId,
    opened_at: Instant,
}

impl UpstreamGuard {
    pub fn id(&self) -> UpstreamId {
        self.id
    }
}

impl Drop for UpstreamGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(
            upstream_id = %self.id,
            elapsed_ms = self.opened_at.elapsed().as_millis() as u64,
            "Upstream released"
        );
    }
}

/// An upstream response together with the session that produced it.
pub struct UpstreamLease {
    response: reqwest::Response,
    session: reqwest::Client,
    guard: UpstreamGuard,
}

impl UpstreamLease {
    pub(crate) fn new(response: reqwest::Response, session: reqwest::Client, guard: UpstreamGuard) -> Self {
        Self {
            response,
            session,
            guard,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    /// URL the response was served from.
    pub fn url(&self) -> &Url {
        self.response.url()
    }

    pub fn id(&self) -> UpstreamId {
        self.guard.id()
    }

    /// The `Content-Length` the upstream declared.
    ///
    /// `Err` carries the raw header when it is not a valid length.
    pub fn declared_length(&self) -> Result<Option<u64>, String> {
        let Some(value) = self.headers().get(header::CONTENT_LENGTH) else {
            return Ok(None);
        };
        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Some)
            .ok_or_else(|| format!("{:?}", value))
    }

    /// Convert into a body stream that keeps the upstream open until dropped.
    pub fn into_body(self) -> LeasedBody {
        LeasedBody {
            stream: self.response.bytes_stream().boxed(),
            _session: self.session,
            _guard: self.guard,
        }
    }
}

impl std::fmt::Debug for UpstreamLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamLease")
            .field("id", &self.guard.id())
            .field("status", &self.status())
            .field("url", &self.url().as_str())
            .finish()
    }
}

/// Upstream body bytes; dropping it closes the upstream.
pub struct LeasedBody {
    stream: BoxStream<'static, reqwest::Result<Bytes>>,
    _session: reqwest::Client,
    _guard: UpstreamGuard,
}

impl Stream for LeasedBody {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease_for(tracker: &UpstreamTracker, response: axum::http::Response<&'static str>) -> UpstreamLease {
        let url = Url::parse("http://img.example.com/a.png").unwrap();
        UpstreamLease::new(reqwest::Response::from(response), reqwest::Client::new(), tracker.open(&url))
    }

    #[test]
    fn upstream_id_unique() {
        let id1 = UpstreamId::new();
        let id2 = UpstreamId::new();
        assert_ne!(id1, id2);
        assert!(id2.to_string().starts_with("up-"));
    }

    #[test]
    fn tracker_counts() {
        let tracker = UpstreamTracker::new();
        let url = Url::parse("http://img.example.com/").unwrap();
        assert_eq!(tracker.active(), 0);

        let guard1 = tracker.open(&url);
        let guard2 = tracker.open(&url);
        assert_eq!(tracker.active(), 2);
        assert_eq!(tracker.opened(), 2);

        drop(guard1);
        assert_eq!(tracker.active(), 1);

        drop(guard2);
        assert_eq!(tracker.active(), 0);
        assert_eq!(tracker.opened(), 2);
    }

    #[test]
    fn declared_length_parsing() {
        let tracker = UpstreamTracker::new();

        let lease = lease_for(&tracker, axum::http::Response::builder().header("content-length", "1024").body("").unwrap());
        assert_eq!(lease.declared_length(), Ok(Some(1024)));

        let lease = lease_for(&tracker, axum::http::Response::new(""));
        assert_eq!(lease.declared_length(), Ok(None));

        let lease = lease_for(&tracker, axum::http::Response::builder().header("content-length", "lots").body("").unwrap());
        assert!(lease.declared_length().is_err());
    }

    #[tokio::test]
    async fn body_release_on_drop() {
        let tracker = UpstreamTracker::new();
        let lease = lease_for(&tracker, axum::http::Response::new("image-bytes"));
        assert_eq!(tracker.active(), 1);

        let mut body = lease.into_body();
        assert_eq!(tracker.active(), 1);
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"image-bytes");

        drop(body);
        assert_eq!(tracker.active(), 0);
    }
}
