//! Observability metrics for the call lifecycle.
//!
//! Prometheus-compatible metrics recorded through the `metrics` crate
//! facade. Designed to support:
//!
//! - **Alerting**: dispatch failure rates, admission pressure
//! - **Dashboards**: call throughput and provider latency
//! - **Debugging**: correlating webhook outcomes with traces
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tandem_call_transitions_total` | Counter | `from_status`, `to_status` | Call state transitions |
//! | `tandem_dispatches_total` | Counter | `result` | Dispatch attempts by outcome |
//! | `tandem_dispatch_duration_seconds` | Histogram | - | Provider round-trip time |
//! | `tandem_admission_denied_total` | Counter | `gate` | Refused dispatches by gate |
//! | `tandem_webhook_events_total` | Counter | `event_type`, `outcome` | Webhook events by outcome |
//! | `tandem_calls_swept_total` | Counter | - | Stale calls force-failed |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tandem_flow::metrics::CallMetrics;
//!
//! let metrics = CallMetrics::new();
//! metrics.record_transition("pending", "in_progress");
//! metrics.record_dispatch("success");
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: call state transitions.
    pub const CALL_TRANSITIONS_TOTAL: &str = "tandem_call_transitions_total";
    /// Counter: dispatch attempts by outcome.
    pub const DISPATCHES_TOTAL: &str = "tandem_dispatches_total";
    /// Histogram: provider dispatch round-trip time in seconds.
    pub const DISPATCH_DURATION_SECONDS: &str = "tandem_dispatch_duration_seconds";
    /// Counter: dispatches refused by an admission gate.
    pub const ADMISSION_DENIED_TOTAL: &str = "tandem_admission_denied_total";
    /// Counter: inbound webhook events by type and outcome.
    pub const WEBHOOK_EVENTS_TOTAL: &str = "tandem_webhook_events_total";
    /// Counter: stale in-progress calls force-failed by the sweep.
    pub const CALLS_SWEPT_TOTAL: &str = "tandem_calls_swept_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Previous call status (for transitions).
    pub const FROM_STATUS: &str = "from_status";
    /// Target call status (for transitions).
    pub const TO_STATUS: &str = "to_status";
    /// Result status (success, failure).
    pub const RESULT: &str = "result";
    /// Admission gate (rate, concurrency).
    pub const GATE: &str = "gate";
    /// Webhook event type (status-update, end-of-call-report, other).
    pub const EVENT_TYPE: &str = "event_type";
    /// Webhook processing outcome (completed, failed, duplicate, ...).
    pub const OUTCOME: &str = "outcome";
}

/// High-level interface for recording call lifecycle metrics.
///
/// Cheap to clone and share across handlers.
#[derive(Debug, Clone, Default)]
pub struct CallMetrics {
    _private: (),
}

impl CallMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a call state transition.
    pub fn record_transition(&self, from_status: &str, to_status: &str) {
        counter!(
            names::CALL_TRANSITIONS_TOTAL,
            labels::FROM_STATUS => from_status.to_string(),
            labels::TO_STATUS => to_status.to_string(),
        )
        .increment(1);
    }

    /// Records a dispatch attempt outcome.
    pub fn record_dispatch(&self, result: &str) {
        counter!(
            names::DISPATCHES_TOTAL,
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records the provider round-trip time.
    pub fn observe_dispatch_duration(&self, duration: Duration) {
        histogram!(names::DISPATCH_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records an admission refusal.
    pub fn record_admission_denied(&self, gate: &str) {
        counter!(
            names::ADMISSION_DENIED_TOTAL,
            labels::GATE => gate.to_string(),
        )
        .increment(1);
    }

    /// Records one inbound webhook event.
    pub fn record_webhook_event(&self, event_type: &str, outcome: &str) {
        counter!(
            names::WEBHOOK_EVENTS_TOTAL,
            labels::EVENT_TYPE => event_type.to_string(),
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Records stale calls force-failed by a sweep pass.
    pub fn record_swept(&self, count: u64) {
        counter!(names::CALLS_SWEPT_TOTAL).increment(count);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
///
/// ## Example
///
/// ```rust,no_run
/// use tandem_flow::metrics::{CallMetrics, TimingGuard};
///
/// let metrics = CallMetrics::new();
///
/// {
///     let _guard = TimingGuard::new(|duration| {
///         metrics.observe_dispatch_duration(duration);
///     });
///
///     // Call the provider...
/// } // Duration recorded automatically on drop
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_record_without_a_recorder_installed() {
        let metrics = CallMetrics::new();

        // These calls should not panic even without a metrics recorder installed
        metrics.record_transition("pending", "in_progress");
        metrics.record_dispatch("success");
        metrics.observe_dispatch_duration(Duration::from_millis(250));
        metrics.record_admission_denied("rate");
        metrics.record_webhook_event("end-of-call-report", "completed");
        metrics.record_swept(2);
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded_duration = None;

        {
            let _guard = TimingGuard::new(|d| {
                recorded_duration = Some(d);
            });
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(recorded_duration.is_some_and(|d| d >= Duration::from_millis(10)));
    }

    #[test]
    fn timing_guard_elapsed_works() {
        let guard = TimingGuard::new(|_| {});
        std::thread::sleep(Duration::from_millis(5));
        assert!(guard.elapsed() >= Duration::from_millis(5));
    }
}
