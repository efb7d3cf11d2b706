//! Integration tests for telemetry initialization and span helpers.

use scribe_rs::model::{Mode, PoolId, WorkerId};
use scribe_rs::telemetry::spans;

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    let config = scribe_rs::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "scribe-test".to_string(),
        default_filter: "warn".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    if let Ok(guard) = scribe_rs::telemetry::init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn assign_span_creates_and_records_outcome() {
    let span = spans::start_assign_span(Mode::Review, PoolId(3), Some(WorkerId(42)));
    spans::record_assignment(&span, "cache", Some(1001));

    let span = spans::start_assign_span(Mode::Transcribe, PoolId(3), None);
    spans::record_assignment(&span, "none", None);
}

#[test]
fn cache_span_creates_and_records_rows() {
    let span = spans::start_cache_span("repopulate", PoolId(7), Some(Mode::Transcribe));
    spans::record_rows(&span, 100);

    let span = spans::start_cache_span("prune", PoolId(7), None);
    spans::record_rows(&span, 0);
}

#[test]
fn metric_instruments_accept_recordings_without_provider() {
    use opentelemetry::KeyValue;
    use scribe_rs::telemetry::metrics;

    metrics::assign_requests().add(1, &[KeyValue::new("mode", "transcribe")]);
    metrics::cache_rows_inserted().add(5, &[KeyValue::new("mode", "review")]);
    metrics::cache_rows_pruned().add(2, &[]);
    metrics::operation_duration_ms().record(1.5, &[KeyValue::new("operation", "assign.next")]);
}
