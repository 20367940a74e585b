//! Metric instrument factories for strikeq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created from the `"strikeq"` meter. With no
//! provider installed they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for strikeq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("strikeq")
}

/// Counter: tasks pushed onto the queue.
pub fn tasks_pushed() -> Counter<u64> {
    meter()
        .u64_counter("strikeq.task.pushed")
        .with_description("Number of tasks pushed")
        .build()
}

/// Counter: task status transitions.
/// Labels: `from`, `to`.
pub fn task_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("strikeq.task.state_transitions")
        .with_description("Number of task status transitions")
        .build()
}

/// Counter: tasks that exhausted their strikes.
/// Labels: `blocking` ("true" | "false").
pub fn tasks_struck_out() -> Counter<u64> {
    meter()
        .u64_counter("strikeq.task.struck_out")
        .with_description("Number of tasks struck out")
        .build()
}

/// Histogram: work function duration per attempt.
/// Labels: `outcome` ("success" | "fail" | "struckout").
pub fn attempt_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("strikeq.task.attempt_duration_ms")
        .with_description("Work function duration per attempt")
        .with_unit("ms")
        .build()
}

/// Instruments held by a running queue, built once.
#[derive(Clone)]
pub struct QueueMetrics {
    pub pushed: Counter<u64>,
    pub transitions: Counter<u64>,
    pub struck_out: Counter<u64>,
    pub attempt_duration: Histogram<f64>,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self {
            pushed: tasks_pushed(),
            transitions: task_state_transitions(),
            struck_out: tasks_struck_out(),
            attempt_duration: attempt_duration_ms(),
        }
    }
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}
