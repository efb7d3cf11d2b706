//! Cache-backed selection with live-catalog fallback.
//!
//! The top-ranked cache row whose work item can be locked (skipping rows
//! another request holds) is consumed: its cache row is deleted inside the
//! same transaction. Cache rows are never trusted on their own; the locked
//! work item must still satisfy the full eligibility predicate, so a stale
//! row simply fails to match and the next candidate wins. When the cache
//! yields nothing, the same predicate and ranking run against the live
//! catalog and the caller is told a repopulation is due.

use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::debug;

use super::AssignmentSource;
use super::eligibility::{ITEM_COLUMNS, ITEM_JOINS, LOCK_SKIP_LOCKED};
use super::locality::{Found, RequestContext};
use super::ranking::{CACHE_COLUMNS, LIVE_COLUMNS, Ranking};
use crate::cache::candidate_table;
use crate::db::catalog::WorkItemRow;
use crate::error::Result;

/// Outcome of the cache-backed step.
pub(crate) struct CacheSelection {
    pub found: Option<Found>,
    /// The cache was insufficient and the live catalog was queried.
    pub fell_back_to_live: bool,
}

#[derive(sqlx::FromRow)]
struct CandidateItemRow {
    #[sqlx(flatten)]
    item: WorkItemRow,
    candidate_id: i64,
}

pub(crate) async fn select_from_cache(
    conn: &mut PgConnection,
    ctx: &RequestContext<'_>,
) -> Result<CacheSelection> {
    if let Some(found) = claim_cached(conn, ctx).await? {
        return Ok(CacheSelection {
            found: Some(found),
            fell_back_to_live: false,
        });
    }

    debug!(pool = %ctx.pool, mode = %ctx.mode, "candidate cache exhausted, querying live catalog");
    let found = select_live(conn, ctx).await?;
    Ok(CacheSelection {
        found,
        fell_back_to_live: true,
    })
}

/// Lock the best cached candidate's work item and delete its cache row.
async fn claim_cached(conn: &mut PgConnection, ctx: &RequestContext<'_>) -> Result<Option<Found>> {
    let table = candidate_table(ctx.mode);
    let eligibility = ctx.eligibility(ctx.mode.statuses());

    let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
    qb.push(ITEM_COLUMNS)
        .push(", c.id AS candidate_id FROM ")
        .push(table)
        .push(" c JOIN work_items w ON w.id = c.work_item_id")
        .push(ITEM_JOINS)
        .push(" WHERE c.pool_id = ")
        .push_bind(ctx.pool.0)
        .push(" AND ");
    eligibility.push_conditions(&mut qb);
    if let Some(worker) = eligibility.exclude_contributor {
        qb.push(" AND NOT (")
            .push_bind(worker.0)
            .push(" = ANY(c.contributor_ids))");
    }
    if let Some(exclude) = ctx.after {
        qb.push(" AND w.id <> ").push_bind(exclude.0);
    }
    Ranking::new(ctx.mode, ctx.collection_key, ctx.container_key)
        .push_order_by(&mut qb, &CACHE_COLUMNS);
    qb.push(" LIMIT 1").push(LOCK_SKIP_LOCKED);

    let row: Option<CandidateItemRow> = qb.build_query_as().fetch_optional(&mut *conn).await?;
    let Some(row) = row else {
        return Ok(None);
    };

    sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
        .bind(row.candidate_id)
        .execute(&mut *conn)
        .await?;

    Ok(Some(Found {
        item: row.item.try_into_work_item()?,
        source: AssignmentSource::Cache,
        candidate_id: Some(row.candidate_id),
    }))
}

/// Same predicate and ranking as the cache path, over the live catalog.
async fn select_live(conn: &mut PgConnection, ctx: &RequestContext<'_>) -> Result<Option<Found>> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
    qb.push(ITEM_COLUMNS);
    ctx.eligibility(ctx.mode.statuses()).push_from_where(&mut qb);
    if let Some(exclude) = ctx.after {
        qb.push(" AND w.id <> ").push_bind(exclude.0);
    }
    Ranking::new(ctx.mode, ctx.collection_key, ctx.container_key)
        .push_order_by(&mut qb, &LIVE_COLUMNS);
    qb.push(" LIMIT 1").push(LOCK_SKIP_LOCKED);

    let row: Option<WorkItemRow> = qb.build_query_as().fetch_optional(&mut *conn).await?;
    row.map(|row| {
        Ok(Found {
            item: row.try_into_work_item()?,
            source: AssignmentSource::LiveCatalog,
            candidate_id: None,
        })
    })
    .transpose()
}
