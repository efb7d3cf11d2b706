//! Candidate cache: storage tables, row lifecycle accounting, maintenance
//! operations and the housekeeping daemon that runs them.

pub mod housekeeper;
pub mod maintenance;

pub use housekeeper::{Housekeeper, HousekeeperConfig};
pub use maintenance::{Maintenance, SweepReport};

use opentelemetry::KeyValue;

use crate::error::Result;
use crate::model::Mode;
use crate::model::candidate::{CacheRowState, validate_transition};
use crate::telemetry::metrics;

/// Table holding the candidate cache for `mode`.
pub(crate) fn candidate_table(mode: Mode) -> &'static str {
    match mode {
        Mode::Transcribe => "transcribable_candidates",
        Mode::Review => "reviewable_candidates",
    }
}

/// Validate and count `count` rows moving `from` -> `to`.
pub(crate) fn record_row_transitions(
    from: CacheRowState,
    to: CacheRowState,
    count: u64,
) -> Result<()> {
    validate_transition(from, to)?;
    if count > 0 {
        metrics::cache_row_transitions().add(
            count,
            &[
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", to.as_str()),
            ],
        );
    }
    Ok(())
}
