//! Pool membership predicates.
//!
//! Closed and open pools run the same assignment cascade; the only thing
//! that differs is how "this collection belongs to pool X" is expressed.
//! Every scheduler query aliases collections as `cl`, so a membership
//! predicate only has to constrain that alias.

use sqlx::{Postgres, QueryBuilder};

use crate::model::{PoolId, PoolKind};

/// Strategy for restricting a query to one pool's collections.
pub trait PoolMembership: Send + Sync {
    fn kind(&self) -> PoolKind;

    /// Push a boolean SQL expression over the `cl` alias.
    fn push_filter(&self, qb: &mut QueryBuilder<'_, Postgres>, pool: PoolId);
}

/// Direct foreign key from collection to pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosedPool;

/// Membership through collection tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenPool;

impl PoolMembership for ClosedPool {
    fn kind(&self) -> PoolKind {
        PoolKind::Closed
    }

    fn push_filter(&self, qb: &mut QueryBuilder<'_, Postgres>, pool: PoolId) {
        qb.push("cl.pool_id = ").push_bind(pool.0);
    }
}

impl PoolMembership for OpenPool {
    fn kind(&self) -> PoolKind {
        PoolKind::Open
    }

    fn push_filter(&self, qb: &mut QueryBuilder<'_, Postgres>, pool: PoolId) {
        // EXISTS rather than a join: one row per work item, and the row lock
        // never has to consider the tag table.
        qb.push("EXISTS (SELECT 1 FROM collection_tags tg WHERE tg.collection_id = cl.id AND tg.pool_id = ")
            .push_bind(pool.0)
            .push(")");
    }
}

/// The membership strategy for a pool kind.
pub fn membership_for(kind: PoolKind) -> &'static dyn PoolMembership {
    match kind {
        PoolKind::Closed => &ClosedPool,
        PoolKind::Open => &OpenPool,
    }
}
