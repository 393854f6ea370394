//! Metrics for dispatch observability.
//!
//! Metrics go through the `metrics` facade; installing a recorder or exporter
//! is left to the host application. Without one every call is a no-op.
//!
//! - Request and stream dispatch (count, duration, outcome)
//! - Notification publishing and processor failures
//! - Constraint-skipped middleware
//! - Session and subscriber maintenance
//!
//! # Example
//!
//! ```rust
//! use courier_runtime::metrics::{DispatchMetrics, describe_metrics};
//! use std::time::Duration;
//!
//! describe_metrics();
//! DispatchMetrics::record_request("CreateThing", "command", Duration::from_millis(3), true);
//! ```

use courier_core::error::ProcessorKind;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use std::time::Duration;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Register all metric descriptions with the installed recorder.
pub fn describe_metrics() {
    // Request Metrics
    describe_counter!(
        "courier_requests_total",
        "Total number of requests and stream requests dispatched"
    );
    describe_histogram!(
        "courier_request_duration_seconds",
        "Time taken to run a request pipeline"
    );

    // Notification Metrics
    describe_counter!(
        "courier_notifications_total",
        "Total number of notifications published"
    );
    describe_histogram!(
        "courier_notification_duration_seconds",
        "Time taken to run a notification pipeline and its fan-out"
    );
    describe_counter!(
        "courier_notification_processor_failures_total",
        "Total number of notification processors that failed"
    );
    describe_counter!(
        "courier_middleware_skipped_total",
        "Total number of notification middleware excluded by capability constraints"
    );

    // Tracker Metrics
    describe_gauge!(
        "courier_active_sessions",
        "Number of sessions currently tracked by the statistics tracker"
    );
    describe_counter!(
        "courier_sessions_evicted_total",
        "Total number of idle sessions evicted"
    );
    describe_counter!(
        "courier_subscribers_pruned_total",
        "Total number of dead subscriber entries removed"
    );
}

const fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record one request or stream dispatch.
    ///
    /// `kind` is `query`, `command` or `stream`.
    pub fn record_request(shape: &'static str, kind: &'static str, duration: Duration, success: bool) {
        counter!(
            "courier_requests_total",
            "shape" => shape,
            "kind" => kind,
            "outcome" => outcome(success)
        )
        .increment(1);
        histogram!("courier_request_duration_seconds", "kind" => kind).record(duration.as_secs_f64());
    }

    /// Record one publish.
    pub fn record_notification(shape: &'static str, duration: Duration, success: bool) {
        counter!(
            "courier_notifications_total",
            "shape" => shape,
            "outcome" => outcome(success)
        )
        .increment(1);
        histogram!("courier_notification_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed notification processor.
    pub fn record_processor_failure(kind: ProcessorKind) {
        let kind = match kind {
            ProcessorKind::AutomaticHandler => "handler",
            ProcessorKind::ManualSubscriber => "subscriber",
            ProcessorKind::GenericSubscriber => "generic_subscriber",
        };
        counter!("courier_notification_processor_failures_total", "kind" => kind).increment(1);
    }

    /// Record middleware left out of a notification pipeline.
    pub fn record_middleware_skipped(count: usize) {
        if count > 0 {
            counter!("courier_middleware_skipped_total").increment(count as u64);
        }
    }
}

/// Tracker maintenance metrics recorder.
pub struct TrackerMetrics;

impl TrackerMetrics {
    /// Record the current number of tracked sessions.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_active_sessions(count: usize) {
        gauge!("courier_active_sessions").set(count as f64);
    }

    /// Record evicted idle sessions.
    pub fn record_sessions_evicted(count: usize) {
        counter!("courier_sessions_evicted_total").increment(count as u64);
    }

    /// Record pruned subscriber entries.
    pub fn record_subscribers_pruned(count: usize) {
        counter!("courier_subscribers_pruned_total").increment(count as u64);
    }
}
