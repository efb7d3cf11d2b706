//! Cache maintenance: repopulation and invalid-row pruning.
//!
//! Both operations are idempotent and safe to run concurrently with each
//! other and with assignment requests. Repopulation relies on the
//! `(work_item_id, pool_id)` unique constraint to drop duplicate inserts;
//! pruning only deletes rows whose own delete condition holds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use tracing::{Instrument, info, warn};

use super::{candidate_table, record_row_transitions};
use crate::db::Db;
use crate::error::Result;
use crate::model::*;
use crate::scheduler::SchedulerConfig;
use crate::scheduler::eligibility::{Eligibility, push_reserved, status_names};
use crate::scheduler::membership::membership_for;
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_rows, start_cache_span};

/// Totals from one sweep over every active pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub pools: usize,
    pub inserted: u64,
    pub pruned: u64,
    /// Pools where at least one operation failed.
    pub failures: usize,
}

/// Maintenance operations over the candidate caches.
#[derive(Clone)]
pub struct Maintenance {
    db: Arc<Db>,
    batch_size: i64,
    reservation_ttl: Duration,
}

impl Maintenance {
    pub fn new(db: Arc<Db>, config: &SchedulerConfig) -> Self {
        Self {
            db,
            batch_size: config.cache_batch_size,
            reservation_ttl: config.reservation_ttl,
        }
    }

    /// Insert up to `batch_size` eligible, unreserved, not-yet-cached items
    /// for `pool` in `mode`, lowest sequence first. Returns rows inserted.
    pub async fn repopulate(&self, pool: &Pool, mode: Mode) -> Result<u64> {
        let span = start_cache_span("repopulate", pool.id, Some(mode));
        let started = Instant::now();
        async {
            let mut qb = repopulate_query(pool, mode, self.batch_size, self.reservation_ttl);
            let inserted = qb.build().execute(self.db.pool()).await?.rows_affected();

            record_rows(&tracing::Span::current(), inserted);
            metrics::cache_rows_inserted().add(inserted, &[KeyValue::new("mode", mode.as_str())]);
            metrics::operation_duration_ms().record(
                started.elapsed().as_secs_f64() * 1000.0,
                &[KeyValue::new("operation", "cache.repopulate")],
            );
            info!(pool = %pool.slug, %mode, inserted, "candidate cache repopulated");
            Ok(inserted)
        }
        .instrument(span)
        .await
    }

    /// Prune invalid rows from both caches of `pool`.
    pub async fn prune_invalid(&self, pool: PoolId) -> Result<u64> {
        let mut pruned = 0;
        for mode in Mode::ALL {
            pruned += self.prune_invalid_mode(pool, mode).await?;
        }
        Ok(pruned)
    }

    /// Delete cache rows whose work item left the mode's status set or is
    /// now reserved. Returns rows deleted.
    pub async fn prune_invalid_mode(&self, pool: PoolId, mode: Mode) -> Result<u64> {
        let span = start_cache_span("prune", pool, Some(mode));
        async {
            let mut qb = prune_query(pool, mode, self.reservation_ttl);
            let pruned = qb.build().execute(self.db.pool()).await?.rows_affected();

            record_rows(&tracing::Span::current(), pruned);
            record_row_transitions(CacheRowState::Fresh, CacheRowState::Deleted, pruned)?;
            metrics::cache_rows_pruned().add(pruned, &[KeyValue::new("mode", mode.as_str())]);
            if pruned > 0 {
                info!(%pool, %mode, pruned, "pruned invalid candidates");
            }
            Ok(pruned)
        }
        .instrument(span)
        .await
    }

    /// Drop every cache row of `pool`, both modes.
    pub async fn clear(&self, pool: PoolId) -> Result<u64> {
        let mut cleared = 0;
        for mode in Mode::ALL {
            let rows = sqlx::query(&format!(
                "DELETE FROM {} WHERE pool_id = $1",
                candidate_table(mode)
            ))
            .bind(pool.0)
            .execute(self.db.pool())
            .await?
            .rows_affected();
            record_row_transitions(CacheRowState::Fresh, CacheRowState::Deleted, rows)?;
            metrics::cache_rows_pruned().add(rows, &[KeyValue::new("mode", mode.as_str())]);
            cleared += rows;
        }
        info!(%pool, cleared, "candidate caches cleared");
        Ok(cleared)
    }

    /// Row counts for both caches of `pool`.
    pub async fn cache_stats(&self, pool: PoolId) -> Result<CacheStats> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT
                (SELECT count(*) FROM transcribable_candidates WHERE pool_id = $1),
                (SELECT count(*) FROM reviewable_candidates WHERE pool_id = $1)",
        )
        .bind(pool.0)
        .fetch_one(self.db.pool())
        .await?;
        Ok(CacheStats {
            transcribable: row.0,
            reviewable: row.1,
        })
    }

    /// Current cache rows for `pool` in `mode`, in base ranking order.
    pub async fn candidates(&self, pool: PoolId, mode: Mode) -> Result<Vec<CandidateRow>> {
        let rows: Vec<CandidateRowRecord> = sqlx::query_as(&format!(
            "SELECT id, work_item_id, pool_id, container_key, collection_key, sequence, status,
                    contributor_ids, created_at
             FROM {} WHERE pool_id = $1 ORDER BY sequence, id",
            candidate_table(mode)
        ))
        .bind(pool.0)
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(CandidateRowRecord::try_into_candidate).collect()
    }

    /// The standing hygiene pass: for every active pool, prune then
    /// repopulate both modes. A failing pool is logged and skipped.
    pub async fn sweep_all(&self) -> Result<SweepReport> {
        let pools = self.db.list_active_pools().await?;
        let mut report = SweepReport {
            pools: pools.len(),
            ..SweepReport::default()
        };

        for pool in &pools {
            match self.sweep_pool(pool).await {
                Ok((pruned, inserted)) => {
                    report.pruned += pruned;
                    report.inserted += inserted;
                }
                Err(e) => {
                    warn!(pool = %pool.slug, "cache sweep failed: {e}");
                    report.failures += 1;
                }
            }
        }

        info!(
            pools = report.pools,
            inserted = report.inserted,
            pruned = report.pruned,
            failures = report.failures,
            "cache sweep finished"
        );
        Ok(report)
    }

    async fn sweep_pool(&self, pool: &Pool) -> Result<(u64, u64)> {
        let pruned = self.prune_invalid(pool.id).await?;
        let mut inserted = 0;
        for mode in Mode::ALL {
            inserted += self.repopulate(pool, mode).await?;
        }
        Ok((pruned, inserted))
    }
}

fn repopulate_query(
    pool: &Pool,
    mode: Mode,
    batch_size: i64,
    reservation_ttl: Duration,
) -> QueryBuilder<'static, Postgres> {
    let table = candidate_table(mode);
    let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO ");
    qb.push(table)
        .push(
            " (work_item_id, pool_id, container_key, collection_key, sequence, status, contributor_ids) \
             SELECT w.id, ",
        )
        .push_bind(pool.id.0)
        .push(", ct.key, cl.key, w.sequence, w.status, ");
    match mode {
        Mode::Review => qb.push(
            "COALESCE((SELECT array_agg(DISTINCT cb.worker_id) FROM contributions cb \
             WHERE cb.work_item_id = w.id), '{}'::bigint[])",
        ),
        Mode::Transcribe => qb.push("'{}'::bigint[]"),
    };

    Eligibility {
        pool: pool.id,
        membership: membership_for(pool.kind),
        statuses: mode.statuses(),
        exclude_contributor: None,
        reservation_ttl,
    }
    .push_from_where(&mut qb);

    qb.push(" AND NOT EXISTS (SELECT 1 FROM ")
        .push(table)
        .push(" c WHERE c.work_item_id = w.id AND c.pool_id = ")
        .push_bind(pool.id.0)
        .push(") ORDER BY w.sequence, w.id LIMIT ")
        .push_bind(batch_size)
        .push(" ON CONFLICT (work_item_id, pool_id) DO NOTHING");
    qb
}

fn prune_query(pool: PoolId, mode: Mode, reservation_ttl: Duration) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM ");
    qb.push(candidate_table(mode))
        .push(" c WHERE c.pool_id = ")
        .push_bind(pool.0)
        .push(" AND (NOT EXISTS (SELECT 1 FROM work_items w WHERE w.id = c.work_item_id AND w.status = ANY(")
        .push_bind(status_names(mode.statuses()))
        .push(")) OR ");
    push_reserved(&mut qb, "c.work_item_id", reservation_ttl);
    qb.push(")");
    qb
}

#[derive(sqlx::FromRow)]
struct CandidateRowRecord {
    id: i64,
    work_item_id: i64,
    pool_id: i64,
    container_key: String,
    collection_key: String,
    sequence: i32,
    status: String,
    contributor_ids: Vec<i64>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl CandidateRowRecord {
    fn try_into_candidate(self) -> Result<CandidateRow> {
        Ok(CandidateRow {
            id: self.id,
            work_item_id: WorkItemId(self.work_item_id),
            pool_id: PoolId(self.pool_id),
            container_key: self.container_key,
            collection_key: self.collection_key,
            sequence: self.sequence,
            status: self.status.parse()?,
            contributor_ids: self.contributor_ids.into_iter().map(WorkerId).collect(),
            created_at: self.created_at,
        })
    }
}
