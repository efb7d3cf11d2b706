//! Locality resolver: the assignment cascade.
//!
//! 1. same container, after the worker's last item
//! 2. same collection, other containers
//! 3. cache-backed selection (live catalog when the cache runs dry)
//! 4. transcription only: same container again, now including in-progress items
//!
//! Each step runs only if the previous ones found nothing. Every step locks
//! the row it returns with `FOR UPDATE OF w SKIP LOCKED`, so a concurrent
//! request holding a candidate makes this one move on instead of waiting.

use std::time::Duration;

use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::debug;

use super::AssignmentSource;
use super::eligibility::{Eligibility, ITEM_COLUMNS, ITEM_JOINS, LOCK_SKIP_LOCKED};
use super::membership::PoolMembership;
use super::selector;
use crate::db::catalog::WorkItemRow;
use crate::error::Result;
use crate::model::{Mode, PoolId, Status, WorkItem, WorkItemId, WorkerId};

/// Everything one assignment request knows about the worker's context.
pub(crate) struct RequestContext<'a> {
    pub pool: PoolId,
    pub membership: &'static dyn PoolMembership,
    pub mode: Mode,
    pub worker: Option<WorkerId>,
    pub collection_key: Option<&'a str>,
    pub container_key: Option<&'a str>,
    /// Item the worker just finished. Advisory only.
    pub after: Option<WorkItemId>,
    pub reservation_ttl: Duration,
}

impl RequestContext<'_> {
    pub fn eligibility(&self, statuses: &'static [Status]) -> Eligibility {
        Eligibility {
            pool: self.pool,
            membership: self.membership,
            statuses,
            exclude_contributor: if self.mode.excludes_own_contributions() {
                self.worker
            } else {
                None
            },
            reservation_ttl: self.reservation_ttl,
        }
    }
}

/// A locked work item and the step that found it.
pub(crate) struct Found {
    pub item: WorkItem,
    pub source: AssignmentSource,
    /// Cache row consumed to produce this item, if any.
    pub candidate_id: Option<i64>,
}

pub(crate) struct Resolution {
    pub found: Option<Found>,
    pub fell_back_to_live: bool,
}

/// Position of the "after" item within its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor {
    pub sequence: i32,
    pub id: WorkItemId,
}

/// Run the cascade inside the caller's transaction.
pub(crate) async fn resolve(conn: &mut PgConnection, ctx: &RequestContext<'_>) -> Result<Resolution> {
    let cursor = match (ctx.container_key, ctx.after) {
        (Some(container), Some(after)) => resolve_cursor(conn, ctx, container, after).await?,
        _ => None,
    };

    if let Some(container) = ctx.container_key {
        let statuses = ctx.mode.short_circuit_statuses();
        if let Some(item) = fetch_locked(conn, same_container_query(ctx, container, cursor, statuses)).await? {
            return Ok(found(item, AssignmentSource::SameContainer, false));
        }
    }

    if let Some(collection) = ctx.collection_key {
        if let Some(item) = fetch_locked(conn, same_collection_query(ctx, collection)).await? {
            return Ok(found(item, AssignmentSource::SameCollection, false));
        }
    }

    let selection = selector::select_from_cache(conn, ctx).await?;
    if selection.found.is_some() {
        return Ok(Resolution {
            found: selection.found,
            fell_back_to_live: selection.fell_back_to_live,
        });
    }

    if ctx.mode == Mode::Transcribe {
        if let Some(container) = ctx.container_key {
            let statuses = Mode::Transcribe.statuses();
            if let Some(item) = fetch_locked(conn, same_container_query(ctx, container, cursor, statuses)).await? {
                return Ok(found(
                    item,
                    AssignmentSource::InProgressFallback,
                    selection.fell_back_to_live,
                ));
            }
        }
    }

    Ok(Resolution {
        found: None,
        fell_back_to_live: selection.fell_back_to_live,
    })
}

fn found(item: WorkItem, source: AssignmentSource, fell_back_to_live: bool) -> Resolution {
    Resolution {
        found: Some(Found {
            item,
            source,
            candidate_id: None,
        }),
        fell_back_to_live,
    }
}

async fn fetch_locked(
    conn: &mut PgConnection,
    mut qb: QueryBuilder<'static, Postgres>,
) -> Result<Option<WorkItem>> {
    let row: Option<WorkItemRow> = qb.build_query_as().fetch_optional(&mut *conn).await?;
    row.map(WorkItemRow::try_into_work_item).transpose()
}

/// Look up the "after" item's position, but only if it really sits in the
/// given container within the active pool. Anything else is ignored.
async fn resolve_cursor(
    conn: &mut PgConnection,
    ctx: &RequestContext<'_>,
    container: &str,
    after: WorkItemId,
) -> Result<Option<Cursor>> {
    let mut qb = cursor_query(ctx, container, after);
    let row: Option<(i32, i64)> = qb.build_query_as().fetch_optional(&mut *conn).await?;
    match row {
        Some((sequence, id)) => Ok(Some(Cursor {
            sequence,
            id: WorkItemId(id),
        })),
        None => {
            debug!(
                after = %after,
                container,
                pool = %ctx.pool,
                "ignoring after reference outside the current container"
            );
            Ok(None)
        }
    }
}

fn cursor_query(ctx: &RequestContext<'_>, container: &str, after: WorkItemId) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT w.sequence, w.id FROM work_items w");
    qb.push(ITEM_JOINS)
        .push(" WHERE w.id = ")
        .push_bind(after.0)
        .push(" AND ct.key = ")
        .push_bind(container.to_owned());
    if let Some(collection) = ctx.collection_key {
        qb.push(" AND cl.key = ").push_bind(collection.to_owned());
    }
    qb.push(" AND ");
    ctx.membership.push_filter(&mut qb, ctx.pool);
    qb
}

/// Lowest eligible item in the container strictly after the cursor.
fn same_container_query(
    ctx: &RequestContext<'_>,
    container: &str,
    cursor: Option<Cursor>,
    statuses: &'static [Status],
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
    qb.push(ITEM_COLUMNS);
    ctx.eligibility(statuses).push_from_where(&mut qb);
    qb.push(" AND ct.key = ").push_bind(container.to_owned());
    if let Some(collection) = ctx.collection_key {
        qb.push(" AND cl.key = ").push_bind(collection.to_owned());
    }
    if let Some(cursor) = cursor {
        qb.push(" AND (w.sequence, w.id) > (")
            .push_bind(cursor.sequence)
            .push(", ")
            .push_bind(cursor.id.0)
            .push(")");
    }
    qb.push(" ORDER BY w.sequence, w.id LIMIT 1")
        .push(LOCK_SKIP_LOCKED);
    qb
}

/// First eligible item elsewhere in the collection, forcing forward progress
/// out of the current container.
fn same_collection_query(ctx: &RequestContext<'_>, collection: &str) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
    qb.push(ITEM_COLUMNS);
    ctx.eligibility(ctx.mode.short_circuit_statuses())
        .push_from_where(&mut qb);
    qb.push(" AND cl.key = ").push_bind(collection.to_owned());
    if let Some(container) = ctx.container_key {
        qb.push(" AND ct.key <> ").push_bind(container.to_owned());
    }
    qb.push(" ORDER BY ct.key, w.sequence, w.id LIMIT 1")
        .push(LOCK_SKIP_LOCKED);
    qb
}
