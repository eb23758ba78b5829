//! Size-bounded streaming of the upstream body to the client.
//!
//! # Responsibilities
//! - Reject a declared `Content-Length` above the limit before any body byte
//! - Build the outbound head (status, translated headers, length, type)
//! - Re-chunk the body into fixed-size chunks and admit each one through the
//!   size guard
//!
//! # Design Decisions
//! - A declared oversize body gets a clean error response
//! - An undeclared oversize body is discovered after headers are committed,
//!   so the stream ends with an error and the server aborts the connection;
//!   a truncated body is never finished as if it were complete
//! - The chunk that would cross the limit is never written

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use axum::BoxError;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, StreamExt};
use url::Url;

use crate::config::RelaySettings;
use crate::observability::metrics;
use crate::relay::error::{RelayAbort, RelayError};
use crate::relay::headers::downstream_headers;
use crate::relay::lease::UpstreamLease;

/// Per-request streaming limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    /// Maximum body bytes written to the client.
    pub max_size: u64,
    /// Size of each chunk written to the client.
    pub chunk_size: usize,
}

impl From<&RelaySettings> for StreamLimits {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            max_size: settings.max_image_size,
            chunk_size: settings.chunk_size.max(1),
        }
    }
}

/// Running count of body bytes written against a fixed limit.
///
/// `written() <= limit()` holds after every admitted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeGuard {
    written: u64,
    limit: u64,
}

impl SizeGuard {
    pub fn new(limit: u64) -> Self {
        Self { written: 0, limit }
    }

    /// Account for a chunk of `len` bytes. Returns false, without counting it,
    /// if writing it would exceed the limit.
    pub fn admit(&mut self, len: usize) -> bool {
        match self.written.checked_add(len as u64) {
            Some(total) if total <= self.limit => {
                self.written = total;
                true
            }
            _ => false,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

/// Turn an upstream lease into the client response.
pub fn relay(lease: UpstreamLease, limits: StreamLimits) -> Result<Response, RelayError> {
    let declared = lease
        .declared_length()
        .map_err(|raw| RelayError::Internal(format!("upstream sent invalid content-length {}", raw)))?;

    if let Some(length) = declared {
        if length > limits.max_size {
            tracing::info!(
                url = %lease.url(),
                declared = length,
                limit = limits.max_size,
                "Image too large, rejecting before streaming"
            );
            return Err(RelayError::TooLarge {
                declared: length,
                limit: limits.max_size,
            });
        }
    }

    let mut headers = downstream_headers(lease.headers());
    if let Some(length) = declared {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    if let Some(content_type) = lease.headers().get(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, content_type.clone());
    }

    let status = lease.status();
    let url = lease.url().clone();
    let body = Body::from_stream(bounded_chunks(lease.into_body(), limits, url));

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Re-chunk `upstream` into `limits.chunk_size` pieces, ending with an error
/// instead of any chunk that would push the total past `limits.max_size`.
pub fn bounded_chunks<S, E>(
    upstream: S,
    limits: StreamLimits,
    url: Url,
) -> impl Stream<Item = Result<Bytes, RelayAbort>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Into<BoxError> + Send + 'static,
{
    let body = BoundedBody {
        upstream: Some(upstream),
        pending: BytesMut::new(),
        guard: SizeGuard::new(limits.max_size),
        chunk_size: limits.chunk_size.max(1),
        exhausted: false,
        done: false,
        url,
    };

    stream::unfold(body, |mut body| async move {
        let item = body.next_chunk().await?;
        Some((item, body))
    })
}

struct BoundedBody<S> {
    upstream: Option<S>,
    pending: BytesMut,
    guard: SizeGuard,
    chunk_size: usize,
    exhausted: bool,
    done: bool,
    url: Url,
}

impl<S, E> BoundedBody<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
{
    async fn next_chunk(&mut self) -> Option<Result<Bytes, RelayAbort>> {
        if self.done {
            return None;
        }

        while !self.exhausted && self.pending.len() < self.chunk_size {
            let upstream = self.upstream.as_mut()?;
            match upstream.next().await {
                Some(Ok(bytes)) => self.pending.extend_from_slice(&bytes),
                Some(Err(e)) => return Some(Err(self.abort(RelayAbort::Upstream(e.into())))),
                None => self.exhausted = true,
            }
        }

        if self.pending.is_empty() {
            self.finish();
            return None;
        }

        let len = self.pending.len().min(self.chunk_size);
        if !self.guard.admit(len) {
            return Some(Err(self.abort(RelayAbort::SizeExceeded {
                limit: self.guard.limit(),
            })));
        }
        Some(Ok(self.pending.split_to(len).freeze()))
    }

    fn finish(&mut self) {
        self.release();
        tracing::info!(url = %self.url, bytes = self.guard.written(), "Relay complete");
        metrics::record_bytes(self.guard.written());
    }

    fn abort(&mut self, reason: RelayAbort) -> RelayAbort {
        self.release();
        match &reason {
            RelayAbort::SizeExceeded { limit } => {
                tracing::warn!(url = %self.url, limit, written = self.guard.written(), "Image too large, aborting response");
                metrics::record_size_abort();
            }
            RelayAbort::Upstream(e) => {
                tracing::warn!(url = %self.url, written = self.guard.written(), error = %e, "Upstream failed mid-stream, aborting response");
            }
        }
        metrics::record_bytes(self.guard.written());
        reason
    }

    fn release(&mut self) {
        self.upstream = None;
        self.pending.clear();
        self.done = true;
    }
}

impl<S> Drop for BoundedBody<S> {
    fn drop(&mut self) {
        if !self.done {
            tracing::info!(url = %self.url, bytes = self.guard.written(), "Client went away, releasing upstream");
        }
    }
}
