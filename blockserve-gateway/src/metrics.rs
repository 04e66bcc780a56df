//! Prometheus metrics for the gateway
//!
//! Exposes metrics at GET /metrics in Prometheus text format.

use axum::{routing::get, Router};
use metrics::counter;
use std::sync::Arc;

/// Initialize the Prometheus metrics exporter and install it as the global recorder.
/// Returns the handle for rendering metrics on the /metrics endpoint.
pub fn init_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder")
}

/// Create metrics route that can be merged into any Router
pub fn routes<S: Clone + Send + Sync + 'static>(
    handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Router<S> {
    let handle = Arc::new(handle);
    Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    )
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record a streaming session being installed on a connection
pub fn record_transfer_started(kind: &'static str) {
    counter!("transfers_started_total", "kind" => kind).increment(1);
}

/// Record a transfer that delivered every byte
pub fn record_transfer_completed(kind: &'static str, bytes: u64) {
    counter!("transfers_completed_total", "kind" => kind).increment(1);
    counter!("bytes_streamed_total", "kind" => kind).increment(bytes);
}

/// Record a transfer torn down before completion
pub fn record_transfer_aborted(kind: &'static str, reason: &'static str) {
    counter!("transfers_aborted_total", "kind" => kind, "reason" => reason).increment(1);
}

/// Record a request answered with 304 before any storage access
pub fn record_not_modified(kind: &'static str) {
    counter!("not_modified_total", "kind" => kind).increment(1);
}

/// Record an emitted usage event
pub fn record_usage_event(kind: &'static str, bytes: u64) {
    counter!("usage_events_total", "kind" => kind).increment(1);
    counter!("usage_bytes_total", "kind" => kind).increment(bytes);
}
