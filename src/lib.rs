//! # scribe-rs
//!
//! Assigns transcription and review work to concurrent volunteers.
//!
//! Work items are handed out from pools so that no two workers hold the same
//! item and each worker's next item stays close to what they were just
//! looking at. Postgres row locks (`FOR UPDATE SKIP LOCKED`) provide the
//! exclusivity, a per-pool candidate cache keeps the common path cheap, and
//! a pgmq-backed housekeeper refills the cache when it runs dry.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod telemetry;
