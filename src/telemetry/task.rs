//! Task attempt span helpers.
//!
//! Provides span creation and state-transition recording for tasks
//! flowing through the scheduler.

use opentelemetry::KeyValue;
use tracing::Span;

use super::metrics::QueueMetrics;
use crate::model::{Status, Task};

/// Start a span for one attempt at a task.
///
/// The `task.status` field is declared empty and is filled in by
/// [`record_state_transition`].
pub fn start_attempt_span(task: &Task) -> Span {
    tracing::info_span!(
        "task.attempt",
        "task.id" = %task.id,
        "task.attempt" = task.fail_count + 1,
        "task.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the span and bump the transition counter.
pub fn record_state_transition(span: &Span, metrics: &QueueMetrics, from: Status, to: Status) {
    span.record("task.status", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "state_transition");
    });
    metrics.transitions.add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}
