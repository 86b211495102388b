//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the snap controller:
//! - HTTP request metrics (latency, counts)
//! - Control connection state (collected dynamically)
//! - Core connection, pipeline and stage counters

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use snap_core::ConnectionState;

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "snap_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("snap_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "snap_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Connection Metrics (collected dynamically)
// =============================================================================

/// 1 for the current control connection state, 0 for the others.
pub static CONNECTION_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("snap_connection_state", "Current control connection state"),
        &["state"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Connection
    registry
        .register(Box::new(CONNECTION_STATE.clone()))
        .unwrap();

    // Core metrics (connection, pipeline, stages)
    for metric in snap_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Path label for a request. Routes the server knows keep their path; every
/// other path shares one label so unknown URLs cannot grow the registry.
pub fn normalize_path(path: &str) -> &'static str {
    match path {
        "/api/v1/health" => "/api/v1/health",
        "/api/v1/config" => "/api/v1/config",
        "/metrics" => "/metrics",
        _ => "other",
    }
}

/// Collect dynamic metrics from current application state.
pub fn collect_dynamic_metrics(state: &AppState) {
    let current = state.connection_state();
    for s in [
        ConnectionState::Waiting,
        ConnectionState::Connecting,
        ConnectionState::Subscribed,
        ConnectionState::Disconnected,
    ] {
        CONNECTION_STATE
            .with_label_values(&[s.as_str()])
            .set(i64::from(s == current));
    }
}
