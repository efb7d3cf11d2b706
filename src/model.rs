//! Core data model.
//!
//! Work items live in containers, containers in collections, and collections
//! in pools. The scheduler hands out work items from a pool to workers in one
//! of two modes: first-pass transcription or second-pass review.

pub mod candidate;
pub mod pool;
pub mod work;

pub use candidate::{CacheRowState, CacheStats, CandidateRow};
pub use pool::{Mode, Pool, PoolId, PoolKind};
pub use work::{CollectionId, ContainerId, Status, WorkItem, WorkItemId, WorkItemRef, WorkerId};
