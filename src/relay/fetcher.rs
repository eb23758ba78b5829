//! Upstream fetcher.
//!
//! # Responsibilities
//! - Run the two-phase GET (with `Referer`, then without on hot-link denial)
//! - Follow redirects manually, re-verifying every hop with the address guard
//! - Pin each connection to the addresses the guard verified
//! - Bound connect and read time per attempt, and the whole fetch by a
//!   request deadline
//!
//! # Design Decisions
//! - One fresh session per hop; nothing is pooled across hops or requests
//! - The previous lease is dropped before the next hop or phase is issued, so
//!   a request never holds two upstream connections
//! - Transport failures surface once; the referer fallback is the only retry

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use url::{Host, Url};

use crate::config::RelayConfig;
use crate::observability::metrics;
use crate::relay::error::FetchError;
use crate::relay::guard::{AddressGuard, AddressVerdict};
use crate::relay::headers::upstream_headers;
use crate::relay::lease::{UpstreamLease, UpstreamTracker};
use crate::relay::request::FetchRequest;
use crate::relay::state::{FetchEvent, FetchState};

/// Redirect statuses followed by the fetcher.
const REDIRECT_STATUSES: [StatusCode; 5] = [
    StatusCode::MOVED_PERMANENTLY,
    StatusCode::FOUND,
    StatusCode::SEE_OTHER,
    StatusCode::TEMPORARY_REDIRECT,
    StatusCode::PERMANENT_REDIRECT,
];

const UPSTREAM_TIMED_OUT: &str = "upstream timed out";

/// Issues guarded upstream requests.
#[derive(Debug, Clone)]
pub struct UpstreamFetcher {
    guard: AddressGuard,
    tracker: UpstreamTracker,
    user_agent: HeaderValue,
    connect_timeout: Duration,
    read_timeout: Duration,
    request_timeout: Duration,
    max_redirects: usize,
}

impl UpstreamFetcher {
    /// Create a fetcher from configuration.
    pub fn new(config: &RelayConfig, guard: AddressGuard, tracker: UpstreamTracker) -> Self {
        let user_agent = HeaderValue::from_str(&config.relay.user_agent).unwrap_or_else(|_| {
            tracing::warn!(user_agent = %config.relay.user_agent, "Invalid user agent, using default");
            HeaderValue::from_static(concat!("image-relay/", env!("CARGO_PKG_VERSION")))
        });

        Self {
            guard,
            tracker,
            user_agent,
            connect_timeout: config.timeouts.connect(),
            read_timeout: config.timeouts.read(),
            request_timeout: config.timeouts.request(),
            max_redirects: config.relay.max_redirects,
        }
    }

    /// Fetch the request's target, falling back to a referer-less attempt
    /// when the origin refuses the first one.
    ///
    /// Every attempt and hop shares one deadline; running out of it is a
    /// network failure like any other timeout.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<UpstreamLease, FetchError> {
        match tokio::time::timeout(self.request_timeout, self.fetch_phases(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::info!(
                    url = %request.target(),
                    deadline_secs = self.request_timeout.as_secs(),
                    "Upstream fetch deadline exceeded"
                );
                Err(FetchError::NetworkFailure(UPSTREAM_TIMED_OUT.to_string()))
            }
        }
    }

    async fn fetch_phases(&self, request: &FetchRequest) -> Result<UpstreamLease, FetchError> {
        let mut state = FetchState::Init.next(FetchEvent::Start {
            has_referer: request.referer().is_some(),
        });
        let mut url = request.target().clone();

        loop {
            let referer = if state.sends_referer() { request.referer() } else { None };
            let headers = upstream_headers(request.forwarded(), referer, &self.user_agent);

            metrics::record_upstream_attempt(state.label());
            let lease = self.get(url, headers).await?;

            state = state.next(FetchEvent::Responded(lease.status()));
            if state != FetchState::FetchWithoutReferer {
                return Ok(lease);
            }

            tracing::info!(
                url = %lease.url(),
                status = %lease.status(),
                "Upstream refused referer, retrying without referer"
            );
            url = lease.url().clone();
            drop(lease);
        }
    }

    /// GET `url`, following redirects up to the configured bound.
    async fn get(&self, mut url: Url, headers: HeaderMap) -> Result<UpstreamLease, FetchError> {
        let mut redirects = 0;
        loop {
            let addrs = match self.guard.verify(&url).await {
                AddressVerdict::Allowed(addrs) => addrs,
                AddressVerdict::Denied(reason) => return Err(FetchError::PolicyRejected(reason)),
            };

            let lease = self.open(&url, &addrs, headers.clone()).await?;
            let Some(location) = redirect_target(&lease)? else {
                return Ok(lease);
            };

            redirects += 1;
            if redirects > self.max_redirects {
                return Err(FetchError::PolicyRejected(format!(
                    "too many redirects (max {})",
                    self.max_redirects
                )));
            }

            tracing::debug!(from = %url, to = %location, status = %lease.status(), "Following redirect");
            drop(lease);
            url = location;
        }
    }

    /// Issue a single GET pinned to `addrs`.
    async fn open(&self, url: &Url, addrs: &[SocketAddr], headers: HeaderMap) -> Result<UpstreamLease, FetchError> {
        let guard = self.tracker.open(url);
        let session = self.session(url, addrs)?;

        let response = session
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                tracing::info!(upstream_id = %guard.id(), url = %url, error = %e, "Upstream request failed");
                network_failure(e)
            })?;

        Ok(UpstreamLease::new(response, session, guard))
    }

    fn session(&self, url: &Url, addrs: &[SocketAddr]) -> Result<reqwest::Client, FetchError> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .pool_max_idle_per_host(0);

        if let Some(Host::Domain(name)) = url.host() {
            builder = builder.resolve_to_addrs(name, addrs);
        }

        builder
            .build()
            .map_err(|e| FetchError::NetworkFailure(format!("failed to create upstream client: {}", e)))
    }
}

/// Resolve the redirect target of `lease`, if it is a redirect.
///
/// A redirect status without a usable `Location` is rejected.
fn redirect_target(lease: &UpstreamLease) -> Result<Option<Url>, FetchError> {
    if !REDIRECT_STATUSES.contains(&lease.status()) {
        return Ok(None);
    }

    lease
        .headers()
        .get(header::LOCATION)
        .and_then(|location| location.to_str().ok())
        .and_then(|loc| lease.url().join(loc).ok())
        .map(Some)
        .ok_or_else(|| FetchError::PolicyRejected("invalid redirect location".to_string()))
}

fn network_failure(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::NetworkFailure(UPSTREAM_TIMED_OUT.to_string())
    } else if err.is_connect() {
        FetchError::NetworkFailure(format!("cannot connect to upstream: {}", err))
    } else {
        FetchError::NetworkFailure(err.to_string())
    }
}
