//! Reservation store.
//!
//! A reservation is a short-lived holder token on a work item. While it is
//! active (younger than the configured TTL) the item is never a candidate.
//! The scheduler only reads reservations, except when a caller asks for the
//! assigned item to be reserved in the same transaction that locked it.

use std::time::Duration;

use sqlx::PgExecutor;

use crate::error::Result;
use crate::model::{PoolId, WorkItemId};

impl super::Db {
    /// Reserve a work item for `holder_token`.
    ///
    /// Returns `false` if another holder has an active reservation. A holder
    /// re-reserving its own item refreshes the timestamp.
    pub async fn reserve(&self, id: WorkItemId, holder_token: &str, ttl: Duration) -> Result<bool> {
        upsert_reservation(self.pool(), id, holder_token, ttl).await
    }

    /// Release a reservation. Only the holder can release it.
    pub async fn release(&self, id: WorkItemId, holder_token: &str) -> Result<bool> {
        let rows = sqlx::query(
            "DELETE FROM reservations WHERE work_item_id = $1 AND holder_token = $2",
        )
        .bind(id.0)
        .bind(holder_token)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Delete reservations older than `ttl`. Returns how many were removed.
    pub async fn prune_expired_reservations(&self, ttl: Duration) -> Result<u64> {
        let rows = sqlx::query(
            "DELETE FROM reservations WHERE created_at <= now() - make_interval(secs => $1)",
        )
        .bind(ttl.as_secs_f64())
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows)
    }

    /// Ids of work items in `pool` that currently hold an active reservation.
    ///
    /// Covers both closed-pool ownership and open-pool tagging.
    pub async fn reserved_ids_for_pool(&self, pool: PoolId, ttl: Duration) -> Result<Vec<WorkItemId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT r.work_item_id
             FROM reservations r
             JOIN work_items w ON w.id = r.work_item_id
             JOIN containers ct ON ct.id = w.container_id
             JOIN collections cl ON cl.id = ct.collection_id
             WHERE r.created_at > now() - make_interval(secs => $2)
             AND (cl.pool_id = $1
                  OR EXISTS (SELECT 1 FROM collection_tags tg
                             WHERE tg.collection_id = cl.id AND tg.pool_id = $1))
             ORDER BY r.work_item_id",
        )
        .bind(pool.0)
        .bind(ttl.as_secs_f64())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| WorkItemId(id)).collect())
    }
}

/// Insert or refresh a reservation on any executor (pool or transaction).
///
/// An expired reservation held by someone else is taken over.
pub(crate) async fn upsert_reservation<'e, E>(
    executor: E,
    id: WorkItemId,
    holder_token: &str,
    ttl: Duration,
) -> Result<bool>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query(
        "INSERT INTO reservations (work_item_id, holder_token, created_at)
         VALUES ($1, $2, now())
         ON CONFLICT (work_item_id) DO UPDATE
         SET holder_token = EXCLUDED.holder_token, created_at = now()
         WHERE reservations.holder_token = EXCLUDED.holder_token
            OR reservations.created_at <= now() - make_interval(secs => $3)",
    )
    .bind(id.0)
    .bind(holder_token)
    .bind(ttl.as_secs_f64())
    .execute(executor)
    .await?
    .rows_affected();
    Ok(rows > 0)
}
