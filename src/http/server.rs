//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the relay and health handlers
//! - Wire up middleware (request ID, tracing)
//! - Bind server to listener and stop on shutdown signal
//! - Convert relay outcomes into responses and record metrics

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::RelayConfig;
use crate::http::request::{request_id, RelayParams, UuidRequestId};
use crate::http::response::status_for;
use crate::observability::metrics;
use crate::relay::{
    streamer, AddressGuard, RelayError, Resolve, StreamLimits, UpstreamFetcher, UpstreamTracker,
};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<UpstreamFetcher>,
    pub limits: StreamLimits,
}

/// HTTP server for the image relay.
pub struct HttpServer {
    router: Router,
    config: RelayConfig,
    tracker: UpstreamTracker,
}

impl HttpServer {
    /// Create a new HTTP server resolving upstream hosts with the system resolver.
    pub fn new(config: RelayConfig) -> Self {
        let guard = AddressGuard::new(&config.guard);
        Self::with_guard(config, guard)
    }

    /// Create a new HTTP server with a custom resolver for the address guard.
    pub fn with_resolver(config: RelayConfig, resolver: Arc<dyn Resolve>) -> Self {
        let guard = AddressGuard::with_resolver(&config.guard, resolver);
        Self::with_guard(config, guard)
    }

    fn with_guard(config: RelayConfig, guard: AddressGuard) -> Self {
        let tracker = UpstreamTracker::new();
        let fetcher = UpstreamFetcher::new(&config, guard, tracker.clone());

        let state = AppState {
            fetcher: Arc::new(fetcher),
            limits: StreamLimits::from(&config.relay),
        };

        let router = Self::build_router(state);
        Self {
            router,
            config,
            tracker,
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The upstream deadline is enforced by the fetcher, not by a layer.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/image/proxy", get(relay_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_image_size = self.config.relay.max_image_size,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Upstream connection accounting shared with the fetcher.
    pub fn tracker(&self) -> UpstreamTracker {
        self.tracker.clone()
    }
}

/// Relay handler for `GET /image/proxy`.
async fn relay_handler(
    State(state): State<AppState>,
    params: Result<Query<RelayParams>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(&headers).to_string();

    let result = match params {
        Ok(Query(params)) => relay_image(&state, params, &headers).await,
        Err(rejection) => Err(RelayError::InvalidRequest(rejection.body_text())),
    };

    match result {
        Ok(response) => {
            metrics::record_request("relayed", response.status().as_u16(), start_time);
            response
        }
        Err(err) => {
            let status = status_for(&err);
            tracing::info!(request_id = %request_id, status = %status, error = %err, "Relay rejected");
            metrics::record_request(outcome_label(&err), status.as_u16(), start_time);
            err.into_response()
        }
    }
}

async fn relay_image(state: &AppState, params: RelayParams, headers: &HeaderMap) -> Result<Response, RelayError> {
    let request = params.into_fetch_request(headers)?;
    tracing::info!(
        request_id = %request_id(headers),
        url = %request.target(),
        referer = ?request.referer(),
        "Proxying image"
    );

    let lease = state.fetcher.fetch(&request).await?;
    streamer::relay(lease, state.limits)
}

fn outcome_label(err: &RelayError) -> &'static str {
    match err {
        RelayError::InvalidRequest(_) => "invalid_request",
        RelayError::Policy(_) => "policy_rejected",
        RelayError::Network(_) => "network_failure",
        RelayError::TooLarge { .. } => "too_large",
        RelayError::Internal(_) => "internal_error",
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
