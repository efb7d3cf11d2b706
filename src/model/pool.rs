//! Pools and work modes.

use serde::{Deserialize, Serialize};

use super::work::Status;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolId(pub i64);

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How collections join a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Every collection belongs to exactly one closed pool (direct foreign key).
    Closed,
    /// Collections are tagged into any number of open pools.
    Open,
}

impl PoolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolKind::Closed => "closed",
            PoolKind::Open => "open",
        }
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PoolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(PoolKind::Closed),
            "open" => Ok(PoolKind::Open),
            other => Err(Error::InvalidInput(format!("unknown pool kind: {other}"))),
        }
    }
}

/// The top-level scope an assignment request operates within.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub slug: String,
    pub title: String,
    pub kind: PoolKind,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// Which kind of work is being assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// First-pass transcription.
    Transcribe,
    /// Second-pass review of submitted text.
    Review,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Transcribe, Mode::Review];

    /// Statuses eligible for this mode on the cache and live-catalog paths.
    pub fn statuses(self) -> &'static [Status] {
        match self {
            Mode::Transcribe => &[Status::NotStarted, Status::InProgress],
            Mode::Review => &[Status::Submitted],
        }
    }

    /// Statuses considered by the locality short-circuits. Transcription
    /// prefers fresh items there and defers in-progress ones.
    pub fn short_circuit_statuses(self) -> &'static [Status] {
        match self {
            Mode::Transcribe => &[Status::NotStarted],
            Mode::Review => &[Status::Submitted],
        }
    }

    /// Reviewers never get items they contributed text to.
    pub fn excludes_own_contributions(self) -> bool {
        matches!(self, Mode::Review)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Transcribe => "transcribe",
            Mode::Review => "review",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcribe" => Ok(Mode::Transcribe),
            "review" => Ok(Mode::Review),
            other => Err(Error::InvalidInput(format!("unknown mode: {other}"))),
        }
    }
}
