//! The eligibility predicate shared by every candidate query.
//!
//! Short-circuits, the cache recheck, the live-catalog fallback and cache
//! repopulation all render their WHERE clause from [`Eligibility`], so no
//! path can apply a looser filter than another.

use std::time::Duration;

use sqlx::{Postgres, QueryBuilder};

use super::membership::PoolMembership;
use crate::model::{PoolId, Status, WorkerId};

/// Columns decoded into `WorkItemRow`.
pub(crate) const ITEM_COLUMNS: &str = "w.id, w.container_id, ct.key AS container_key, \
     cl.key AS collection_key, w.sequence, w.status, w.published";

/// Work items joined to their container (`ct`) and collection (`cl`).
pub(crate) const ITEM_JOINS: &str = " JOIN containers ct ON ct.id = w.container_id \
     JOIN collections cl ON cl.id = ct.collection_id";

/// Non-blocking lock on the work item row alone.
pub(crate) const LOCK_SKIP_LOCKED: &str = " FOR UPDATE OF w SKIP LOCKED";

pub(crate) struct Eligibility {
    pub pool: PoolId,
    pub membership: &'static dyn PoolMembership,
    pub statuses: &'static [Status],
    /// Exclude items this worker contributed text to.
    pub exclude_contributor: Option<WorkerId>,
    pub reservation_ttl: Duration,
}

impl Eligibility {
    /// Push `FROM work_items w ... WHERE <conditions>`.
    pub fn push_from_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" FROM work_items w").push(ITEM_JOINS).push(" WHERE ");
        self.push_conditions(qb);
    }

    /// Push the bare conditions, for queries that bring their own FROM.
    pub fn push_conditions(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        self.membership.push_filter(qb, self.pool);
        qb.push(" AND w.published AND ct.published AND cl.published AND w.status = ANY(")
            .push_bind(status_names(self.statuses))
            .push(") AND NOT ");
        push_reserved(qb, "w.id", self.reservation_ttl);
        if let Some(worker) = self.exclude_contributor {
            qb.push(
                " AND NOT EXISTS (SELECT 1 FROM contributions cb \
                 WHERE cb.work_item_id = w.id AND cb.worker_id = ",
            )
            .push_bind(worker.0)
            .push(")");
        }
    }
}

/// Push `EXISTS (<active reservation on item_column>)`.
pub(crate) fn push_reserved(
    qb: &mut QueryBuilder<'_, Postgres>,
    item_column: &'static str,
    ttl: Duration,
) {
    qb.push("EXISTS (SELECT 1 FROM reservations r WHERE r.work_item_id = ")
        .push(item_column)
        .push(" AND r.created_at > now() - make_interval(secs => ")
        .push_bind(ttl.as_secs_f64())
        .push("))");
}

pub(crate) fn status_names(statuses: &[Status]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}
