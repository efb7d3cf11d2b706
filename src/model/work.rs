//! Work item types.

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for work item IDs. Ordering matches the catalog's row ids, which
/// the scheduler uses as the final tiebreak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkItemId(pub i64);

/// Identity of a (logged-in) worker. Anonymous workers have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(pub i64);

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Transcription status of a work item.
///
/// Mutated only by the submission workflow; the scheduler reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Nobody has saved any text yet.
    NotStarted,
    /// Some text saved, not yet submitted for review.
    InProgress,
    /// Submitted, waiting for a reviewer.
    Submitted,
    /// Accepted by a reviewer. Never assignable.
    Completed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::NotStarted => "not_started",
            Status::InProgress => "in_progress",
            Status::Submitted => "submitted",
            Status::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Status::NotStarted),
            "in_progress" => Ok(Status::InProgress),
            "submitted" => Ok(Status::Submitted),
            "completed" => Ok(Status::Completed),
            other => Err(Error::InvalidInput(format!("unknown status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A single assignable unit, e.g. one page of a scanned document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub container_id: ContainerId,
    /// Human-readable key of the owning container, unique within its collection.
    pub container_key: String,
    /// Key of the collection owning the container.
    pub collection_key: String,
    /// Position within the container.
    pub sequence: i32,
    pub status: Status,
    pub published: bool,
}

/// What the scheduler hands back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemRef {
    pub id: WorkItemId,
    pub container_key: String,
    pub collection_key: String,
    pub sequence: i32,
    pub status: Status,
}

impl From<WorkItem> for WorkItemRef {
    fn from(item: WorkItem) -> Self {
        Self {
            id: item.id,
            container_key: item.container_key,
            collection_key: item.collection_key,
            sequence: item.sequence,
            status: item.status,
        }
    }
}
