//! Candidate cache rows and their lifecycle.
//!
//! The candidate cache is a per-pool, per-mode materialized table of work
//! items believed eligible for assignment. Rows are inserted in bulk by
//! repopulation, claimed and deleted by the selector, or pruned once they go
//! stale. Staleness is expected; every consumer rechecks eligibility against
//! the live catalog row it locks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pool::PoolId;
use super::work::{Status, WorkItemId, WorkerId};
use crate::error::{Error, Result};

/// One materialized candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRow {
    pub id: i64,
    pub work_item_id: WorkItemId,
    pub pool_id: PoolId,
    pub container_key: String,
    pub collection_key: String,
    pub sequence: i32,
    /// Status observed at insertion time.
    pub status: Status,
    /// Workers who contributed text at insertion time. Review cache only.
    pub contributor_ids: Vec<WorkerId>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a cache row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheRowState {
    /// Inserted and visible to selectors.
    Fresh,
    /// Row and its work item are locked inside an assignment transaction.
    Claimed,
    /// Consumed by an assignment or pruned. Terminal.
    Deleted,
}

impl CacheRowState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: CacheRowState) -> bool {
        use CacheRowState::*;
        matches!(
            (self, to),
            (Fresh, Claimed)
                | (Fresh, Deleted)      // pruned
                | (Claimed, Deleted)    // assignment committed
                | (Claimed, Fresh) // transaction rolled back
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheRowState::Fresh => "fresh",
            CacheRowState::Claimed => "claimed",
            CacheRowState::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for CacheRowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a lifecycle transition, returning an error if disallowed.
pub fn validate_transition(from: CacheRowState, to: CacheRowState) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Row counts in a pool's caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub transcribable: i64,
    pub reviewable: i64,
}
