//! Metric instrument factories for scribe-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"scribe-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("scribe-rs")
}

/// Counter: assignment requests.
/// Labels: `mode`, `source` (where the item came from, or "none" when the
/// pool was exhausted).
pub fn assign_requests() -> Counter<u64> {
    meter()
        .u64_counter("scribe.assign.requests")
        .with_description("Number of next-assignment requests")
        .build()
}

/// Counter: candidate rows inserted by repopulation.
/// Labels: `mode`.
pub fn cache_rows_inserted() -> Counter<u64> {
    meter()
        .u64_counter("scribe.cache.rows_inserted")
        .with_description("Candidate cache rows inserted by repopulation")
        .build()
}

/// Counter: candidate rows removed by pruning or clearing.
/// Labels: `mode`.
pub fn cache_rows_pruned() -> Counter<u64> {
    meter()
        .u64_counter("scribe.cache.rows_pruned")
        .with_description("Candidate cache rows removed as invalid")
        .build()
}

/// Counter: candidate row lifecycle transitions.
/// Labels: `from`, `to`.
pub fn cache_row_transitions() -> Counter<u64> {
    meter()
        .u64_counter("scribe.cache.row_transitions")
        .with_description("Candidate cache row lifecycle transitions")
        .build()
}

/// Counter: repopulation queue operations (create, send, read, archive).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("scribe.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("scribe.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
