//! Proximity ranking for the cache-backed selector and its live fallback.
//!
//! Order, highest priority first:
//! 1. unstarted items (transcription only)
//! 2. same collection as the worker's current context
//! 3. same container
//! 4. sequence ascending
//! 5. row id ascending, so equal candidates resolve deterministically

use sqlx::{Postgres, QueryBuilder};

use crate::model::{Mode, Status};

/// Where the ranked columns live in a given query.
pub(crate) struct RankColumns {
    pub collection_key: &'static str,
    pub container_key: &'static str,
    pub sequence: &'static str,
    pub id: &'static str,
}

/// Ranking over cache rows (`c`), using the keys denormalized into the cache.
pub(crate) const CACHE_COLUMNS: RankColumns = RankColumns {
    collection_key: "c.collection_key",
    container_key: "c.container_key",
    sequence: "c.sequence",
    id: "c.id",
};

/// Ranking over the live catalog joins.
pub(crate) const LIVE_COLUMNS: RankColumns = RankColumns {
    collection_key: "cl.key",
    container_key: "ct.key",
    sequence: "w.sequence",
    id: "w.id",
};

pub(crate) struct Ranking<'a> {
    pub unstarted_first: bool,
    pub collection_key: Option<&'a str>,
    pub container_key: Option<&'a str>,
}

impl<'a> Ranking<'a> {
    pub fn new(mode: Mode, collection_key: Option<&'a str>, container_key: Option<&'a str>) -> Self {
        Self {
            unstarted_first: mode == Mode::Transcribe,
            collection_key,
            container_key,
        }
    }

    /// Push ` ORDER BY ...`.
    ///
    /// Locality flags are only emitted when the key is known; comparing
    /// against NULL would sort every row first under DESC.
    pub fn push_order_by(&self, qb: &mut QueryBuilder<'_, Postgres>, cols: &RankColumns) {
        qb.push(" ORDER BY ");
        if self.unstarted_first {
            qb.push(format!(
                "(w.status = '{}') DESC, ",
                Status::NotStarted.as_str()
            ));
        }
        if let Some(collection) = self.collection_key {
            qb.push("(")
                .push(cols.collection_key)
                .push(" = ")
                .push_bind(collection.to_owned())
                .push(") DESC, ");
        }
        if let Some(container) = self.container_key {
            qb.push("(")
                .push(cols.container_key)
                .push(" = ")
                .push_bind(container.to_owned());
            if let Some(collection) = self.collection_key {
                qb.push(" AND ")
                    .push(cols.collection_key)
                    .push(" = ")
                    .push_bind(collection.to_owned());
            }
            qb.push(") DESC, ");
        }
        qb.push(cols.sequence)
            .push(" ASC, ")
            .push(cols.id)
            .push(" ASC");
    }
}
