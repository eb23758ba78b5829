//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): relay requests by outcome and status
//! - `relay_request_duration_seconds` (histogram): time to response head
//! - `relay_upstream_attempts_total` (counter): upstream attempts by phase
//! - `relay_bytes_total` (counter): body bytes written to clients
//! - `relay_size_aborts_total` (counter): responses cut at the size limit

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(outcome: &'static str, status: u16, start: Instant) {
    counter!("relay_requests_total", "outcome" => outcome, "status" => status.to_string()).increment(1);
    histogram!("relay_request_duration_seconds", "outcome" => outcome).record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_attempt(phase: &'static str) {
    counter!("relay_upstream_attempts_total", "phase" => phase).increment(1);
}

pub fn record_bytes(bytes: u64) {
    counter!("relay_bytes_total").increment(bytes);
}

pub fn record_size_abort() {
    counter!("relay_size_aborts_total").increment(1);
}
