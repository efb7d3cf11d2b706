//! Span helpers for assignment and cache maintenance.

use tracing::Span;

use crate::model::{Mode, PoolId, WorkerId};

/// Start a span for one next-assignment request.
///
/// `assign.source` and `assign.work_item` are declared empty and filled by
/// [`record_assignment`] once the cascade finishes.
pub fn start_assign_span(mode: Mode, pool: PoolId, worker: Option<WorkerId>) -> Span {
    tracing::info_span!(
        "assign.next",
        "assign.mode" = mode.as_str(),
        "assign.pool" = pool.0,
        "assign.worker" = worker.map(|w| w.0),
        "assign.source" = tracing::field::Empty,
        "assign.work_item" = tracing::field::Empty,
    )
}

/// Record where the assignment came from on its span.
pub fn record_assignment(span: &Span, source: &str, work_item: Option<i64>) {
    span.record("assign.source", source);
    if let Some(id) = work_item {
        span.record("assign.work_item", id);
    }
}

/// Start a span for a cache maintenance operation ("repopulate", "prune", ...).
pub fn start_cache_span(operation: &'static str, pool: PoolId, mode: Option<Mode>) -> Span {
    tracing::info_span!(
        "cache.maintain",
        "cache.operation" = operation,
        "cache.pool" = pool.0,
        "cache.mode" = mode.map(Mode::as_str),
        "cache.rows" = tracing::field::Empty,
    )
}

/// Record how many rows a maintenance operation touched.
pub fn record_rows(span: &Span, rows: u64) {
    span.record("cache.rows", rows);
}
