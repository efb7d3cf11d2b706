//! Repopulation job queue on pgmq, via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read and
//! pgmq.archive. A NOTIFY on the same channel name wakes the housekeeper
//! without waiting for its poll interval.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Mode, PoolId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Queue (and NOTIFY channel) carrying repopulation requests.
pub const REPOPULATE_QUEUE: &str = "candidate_repopulate";

/// Payload of a repopulation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepopulateJob {
    pub pool_id: i64,
    pub mode: Mode,
}

impl RepopulateJob {
    pub fn new(pool: PoolId, mode: Mode) -> Self {
        Self {
            pool_id: pool.0,
            mode,
        }
    }

    pub fn pool(&self) -> PoolId {
        PoolId(self.pool_id)
    }
}

/// A job read from the queue. `job` is `None` when the payload was malformed.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub job: Option<RepopulateJob>,
}

impl super::Db {
    /// Create the repopulation queue (idempotent).
    pub async fn ensure_repopulate_queue(&self) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(REPOPULATE_QUEUE)
            .execute(self.pool())
            .await?;
        count_queue_op("create");
        Ok(())
    }

    /// Enqueue a repopulation job and notify listeners. Returns the message ID.
    pub async fn enqueue_repopulate(&self, job: RepopulateJob) -> Result<i64> {
        let payload = serde_json::to_value(job)
            .map_err(|e| crate::error::Error::Other(format!("serialize repopulate job: {e}")))?;

        let mut tx = self.pool().begin().await?;
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, 0)")
            .bind(REPOPULATE_QUEUE)
            .bind(&payload)
            .fetch_one(&mut *tx)
            .await?;

        // NOTIFY is transactional, only fires on commit
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(REPOPULATE_QUEUE)
            .bind(job.pool_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        count_queue_op("send");
        Ok(row.0)
    }

    /// Read up to `limit` jobs, hiding them for `vt_seconds`.
    pub async fn read_repopulate_jobs(&self, vt_seconds: i32, limit: i32) -> Result<Vec<QueuedJob>> {
        let rows = sqlx::query_as::<_, (i64, i32, chrono::DateTime<chrono::Utc>, serde_json::Value)>(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, $3)",
        )
        .bind(REPOPULATE_QUEUE)
        .bind(vt_seconds)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        count_queue_op(if rows.is_empty() { "read_empty" } else { "read" });

        Ok(rows
            .into_iter()
            .map(|(msg_id, read_ct, enqueued_at, message)| QueuedJob {
                msg_id,
                read_ct,
                enqueued_at,
                job: serde_json::from_value(message).ok(),
            })
            .collect())
    }

    /// Jobs for `pool` still in the queue, visible or not.
    pub async fn pending_repopulate_jobs(&self, pool: PoolId) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(&format!(
            "SELECT count(*) FROM pgmq.q_{REPOPULATE_QUEUE} WHERE (message->>'pool_id')::bigint = $1"
        ))
        .bind(pool.0)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    /// Archive a handled job (kept in the archive table for audit).
    pub async fn archive_repopulate_job(&self, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(REPOPULATE_QUEUE)
            .bind(msg_id)
            .execute(self.pool())
            .await?;
        count_queue_op("archive");
        Ok(())
    }
}

fn count_queue_op(operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", REPOPULATE_QUEUE),
            KeyValue::new("operation", operation),
        ],
    );
}
