//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define activator metrics (requests, latency, selections, stickiness)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `activator_requests_total` (counter): requests by method, status, backend
//! - `activator_request_duration_seconds` (histogram): latency distribution
//! - `activator_selections_total` (counter): policy outcomes
//!   (picked, sticky, no_capacity, session_conflict)
//! - `activator_sticky_events_total` (counter): binding events by scope
//!   (backend, revision)
//! - `activator_store_errors_total` (counter): affinity store failures
//! - `activator_requeues_total` (counter): selections retried for capacity
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        "activator_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);

    histogram!(
        "activator_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_selection(policy: &'static str, outcome: &'static str) {
    counter!("activator_selections_total", "policy" => policy, "outcome" => outcome).increment(1);
}

pub fn record_sticky(scope: &'static str, event: &'static str) {
    counter!("activator_sticky_events_total", "scope" => scope, "event" => event).increment(1);
}

pub fn record_store_error(operation: &'static str) {
    counter!("activator_store_errors_total", "operation" => operation).increment(1);
}

pub fn record_requeue(policy: &'static str) {
    counter!("activator_requeues_total", "policy" => policy).increment(1);
}
