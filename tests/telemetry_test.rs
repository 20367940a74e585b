//! Integration tests for telemetry initialization and span helpers.

use std::time::Duration;

use serde_json::json;
use strikeq::telemetry::metrics::QueueMetrics;
use strikeq::telemetry::task::{record_state_transition, start_attempt_span};
use strikeq::{QueueConfig, Status, Strikes, Task, TaskId};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = strikeq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "strikeq-test".to_string(),
        attributes: Vec::new(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = strikeq::telemetry::init_telemetry(config);
}

#[test]
fn attempt_span_records_transitions() {
    let task = Task::new(TaskId(3), json!(null)).started();
    let metrics = QueueMetrics::new();
    let span = start_attempt_span(&task);
    record_state_transition(&span, &metrics, Status::Pending, Status::Running);
    record_state_transition(&span, &metrics, Status::Running, Status::Success);
}

#[test]
fn metric_instruments_are_noops_without_a_provider() {
    let metrics = QueueMetrics::new();
    metrics.pushed.add(1, &[]);
    metrics.attempt_duration.record(1.5, &[]);
}

#[test]
fn telemetry_config_reads_endpoint_from_env() {
    unsafe {
        std::env::remove_var("OTEL_ENDPOINT");
    }
    let config = strikeq::telemetry::TelemetryConfig::from_env("strikeq");
    assert!(config.endpoint.is_none());
    assert_eq!(config.service_name, "strikeq");
    assert!(config.attributes.iter().any(|kv| kv.key.as_str() == "service.version"));
}

#[test]
fn telemetry_config_describes_the_queue() {
    let queue = QueueConfig::new("data/jobs.db", Duration::from_millis(250))
        .strikes(Strikes::Disabled)
        .block_on_fail(true);
    let config = strikeq::telemetry::TelemetryConfig::from_env("strikeq").with_queue(&queue);

    let value = |key: &str| {
        config
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    };
    assert_eq!(value("strikeq.queue.path").as_deref(), Some("data/jobs.db"));
    assert_eq!(value("strikeq.queue.strike_limit").as_deref(), Some("0"));
    assert_eq!(value("strikeq.queue.block_on_fail").as_deref(), Some("true"));
    assert_eq!(value("strikeq.queue.throttle_ms").as_deref(), Some("250"));
}
