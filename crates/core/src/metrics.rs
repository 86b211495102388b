//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Control connection (attempts, subscriptions, commands, dropped frames)
//! - Pipeline (runs, stage completions)
//! - Stages (abandoned compositions, uploads)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Control connection
// =============================================================================

/// Socket connect attempts, including reconnects.
pub static CONNECTION_ATTEMPTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "snap_connection_attempts_total",
        "Total control socket connect attempts",
    )
    .unwrap()
});

/// Subscribe requests sent.
pub static SUBSCRIPTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("snap_subscriptions_total", "Total subscribe requests sent").unwrap()
});

/// Take-capture commands forwarded to the coordinator.
pub static COMMANDS_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "snap_commands_received_total",
        "Total take-capture commands received",
    )
    .unwrap()
});

/// Inbound frames that could not be parsed.
pub static FRAMES_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "snap_frames_dropped_total",
        "Total inbound frames dropped as malformed",
    )
    .unwrap()
});

// =============================================================================
// Pipeline
// =============================================================================

/// Runs started.
pub static RUNS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("snap_runs_started_total", "Total pipeline runs started").unwrap()
});

/// Runs that left the final stage.
pub static RUNS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "snap_runs_completed_total",
        "Total pipeline runs that finished every stage",
    )
    .unwrap()
});

/// Stage completions by stage.
pub static STAGE_COMPLETIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("snap_stage_completions_total", "Total stage completions"),
        &["stage"], // "capture", "compose", "thumbnail", "post"
    )
    .unwrap()
});

// =============================================================================
// Stages
// =============================================================================

/// Runs abandoned in compose without completing.
pub static COMPOSE_ABANDONED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "snap_compose_abandoned_total",
        "Total runs abandoned by the compose stage",
    )
    .unwrap()
});

/// Uploads that failed.
pub static UPLOAD_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("snap_upload_failures_total", "Total failed uploads").unwrap()
});

/// Upload duration in seconds by result.
pub static UPLOAD_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("snap_upload_duration_seconds", "Duration of snap uploads")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["result"], // "success", "failure"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Connection
        Box::new(CONNECTION_ATTEMPTS.clone()),
        Box::new(SUBSCRIPTIONS.clone()),
        Box::new(COMMANDS_RECEIVED.clone()),
        Box::new(FRAMES_DROPPED.clone()),
        // Pipeline
        Box::new(RUNS_STARTED.clone()),
        Box::new(RUNS_COMPLETED.clone()),
        Box::new(STAGE_COMPLETIONS.clone()),
        // Stages
        Box::new(COMPOSE_ABANDONED.clone()),
        Box::new(UPLOAD_FAILURES.clone()),
        Box::new(UPLOAD_DURATION.clone()),
    ]
}
