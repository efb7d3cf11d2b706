//! Work item catalog operations.
//!
//! The catalog is owned by the wider application; the scheduler only reads
//! it and row-locks work items. These operations exist so operators and
//! tests can build pools, collections, containers and items, and so the
//! submission workflow has somewhere to record status and contributions.

use crate::error::{Error, Result};
use crate::model::*;

impl super::Db {
    /// Create a pool.
    pub async fn create_pool(&self, slug: &str, title: &str, kind: PoolKind) -> Result<Pool> {
        let row: PoolRow = sqlx::query_as(
            "INSERT INTO pools (slug, title, kind) VALUES ($1, $2, $3)
             RETURNING id, slug, title, kind, active",
        )
        .bind(slug)
        .bind(title)
        .bind(kind.as_str())
        .fetch_one(self.pool())
        .await?;
        row.try_into_pool()
    }

    /// Get a pool by ID.
    pub async fn get_pool(&self, id: PoolId) -> Result<Pool> {
        let row: Option<PoolRow> =
            sqlx::query_as("SELECT id, slug, title, kind, active FROM pools WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.ok_or_else(|| Error::NotFound(format!("pool {id}")))?
            .try_into_pool()
    }

    /// Get a pool by its slug.
    pub async fn get_pool_by_slug(&self, slug: &str) -> Result<Pool> {
        let row: Option<PoolRow> =
            sqlx::query_as("SELECT id, slug, title, kind, active FROM pools WHERE slug = $1")
                .bind(slug)
                .fetch_optional(self.pool())
                .await?;
        row.ok_or_else(|| Error::NotFound(format!("pool '{slug}'")))?
            .try_into_pool()
    }

    /// All pools the periodic sweep should visit.
    pub async fn list_active_pools(&self) -> Result<Vec<Pool>> {
        let rows: Vec<PoolRow> = sqlx::query_as(
            "SELECT id, slug, title, kind, active FROM pools WHERE active ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(PoolRow::try_into_pool).collect()
    }

    /// Mark a pool active or inactive.
    pub async fn set_pool_active(&self, id: PoolId, active: bool) -> Result<()> {
        let rows = sqlx::query("UPDATE pools SET active = $1 WHERE id = $2")
            .bind(active)
            .bind(id.0)
            .execute(self.pool())
            .await?
            .rows_affected();
        if rows == 0 {
            return Err(Error::NotFound(format!("pool {id}")));
        }
        Ok(())
    }

    /// Create a collection owned by a closed pool.
    pub async fn create_collection(
        &self,
        pool: &Pool,
        key: &str,
        published: bool,
    ) -> Result<CollectionId> {
        if pool.kind != PoolKind::Closed {
            return Err(Error::InvalidInput(format!(
                "collections are owned by closed pools; '{}' is {}",
                pool.slug, pool.kind
            )));
        }
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO collections (pool_id, key, published) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(pool.id.0)
        .bind(key)
        .bind(published)
        .fetch_one(self.pool())
        .await?;
        Ok(CollectionId(row.0))
    }

    /// Tag a collection into an open pool. Idempotent.
    pub async fn tag_collection(&self, collection: CollectionId, pool: &Pool) -> Result<()> {
        if pool.kind != PoolKind::Open {
            return Err(Error::InvalidInput(format!(
                "only open pools take tagged collections; '{}' is {}",
                pool.slug, pool.kind
            )));
        }
        sqlx::query(
            "INSERT INTO collection_tags (collection_id, pool_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(collection.0)
        .bind(pool.id.0)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Create a container within a collection.
    pub async fn create_container(
        &self,
        collection: CollectionId,
        key: &str,
        published: bool,
    ) -> Result<ContainerId> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO containers (collection_id, key, published) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(collection.0)
        .bind(key)
        .bind(published)
        .fetch_one(self.pool())
        .await?;
        Ok(ContainerId(row.0))
    }

    /// Create a work item at `sequence` within a container. Starts NotStarted.
    pub async fn create_work_item(
        &self,
        container: ContainerId,
        sequence: i32,
        published: bool,
    ) -> Result<WorkItem> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO work_items (container_id, sequence, published) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(container.0)
        .bind(sequence)
        .bind(published)
        .fetch_one(self.pool())
        .await?;
        self.get_work_item(WorkItemId(row.0)).await
    }

    /// Get a work item by ID.
    pub async fn get_work_item(&self, id: WorkItemId) -> Result<WorkItem> {
        let row: Option<WorkItemRow> = sqlx::query_as(
            "SELECT w.id, w.container_id, ct.key AS container_key, cl.key AS collection_key,
                    w.sequence, w.status, w.published
             FROM work_items w
             JOIN containers ct ON ct.id = w.container_id
             JOIN collections cl ON cl.id = ct.collection_id
             WHERE w.id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("work item {id}")))?
            .try_into_work_item()
    }

    /// Set a work item's status. Used by the submission workflow.
    pub async fn set_status(&self, id: WorkItemId, status: Status) -> Result<()> {
        let rows = sqlx::query("UPDATE work_items SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status.as_str())
            .bind(id.0)
            .execute(self.pool())
            .await?
            .rows_affected();
        if rows == 0 {
            return Err(Error::NotFound(format!("work item {id}")));
        }
        Ok(())
    }

    /// Record that a worker saved text on a work item.
    pub async fn record_contribution(&self, id: WorkItemId, worker: WorkerId) -> Result<()> {
        sqlx::query("INSERT INTO contributions (work_item_id, worker_id) VALUES ($1, $2)")
            .bind(id.0)
            .bind(worker.0)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct PoolRow {
    id: i64,
    slug: String,
    title: String,
    kind: String,
    active: bool,
}

impl PoolRow {
    fn try_into_pool(self) -> Result<Pool> {
        Ok(Pool {
            id: PoolId(self.id),
            slug: self.slug,
            title: self.title,
            kind: self.kind.parse()?,
            active: self.active,
        })
    }
}

/// Work item joined with its container and collection keys.
///
/// Every scheduler query selects exactly these columns so this row type
/// can be shared.
#[derive(sqlx::FromRow)]
pub(crate) struct WorkItemRow {
    id: i64,
    container_id: i64,
    container_key: String,
    collection_key: String,
    sequence: i32,
    status: String,
    published: bool,
}

impl WorkItemRow {
    pub(crate) fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: WorkItemId(self.id),
            container_id: ContainerId(self.container_id),
            container_key: self.container_key,
            collection_key: self.collection_key,
            sequence: self.sequence,
            status: self.status.parse()?,
            published: self.published,
        })
    }
}
