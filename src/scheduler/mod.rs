//! Assignment scheduler: the public "get next work item" API.
//!
//! One request runs the locality cascade inside a single transaction. The
//! returned work item is row-locked until that transaction ends, which is
//! right after the optional reservation is written, so two concurrent
//! requests can never both walk away with the same item. Exclusivity for the
//! duration of the actual work is the reservation's job, not the lock's.

pub mod eligibility;
pub mod locality;
pub mod membership;
pub mod ranking;
pub mod selector;

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, warn};

use crate::cache::{Maintenance, record_row_transitions};
use crate::db::Db;
use crate::db::pgmq::RepopulateJob;
use crate::db::reservation::upsert_reservation;
use crate::error::Result;
use crate::model::*;
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_assignment, start_assign_span};
use locality::RequestContext;
use membership::membership_for;

/// Attempts per request when another request reserves our pick first.
const RESERVE_ATTEMPTS: u32 = 3;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum candidate rows inserted per pool and mode by one repopulation.
    pub cache_batch_size: i64,
    /// How long a reservation keeps its work item out of candidacy.
    pub reservation_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cache_batch_size: 100,
            reservation_ttl: Duration::from_secs(300),
        }
    }
}

/// Which step of the cascade produced an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    SameContainer,
    SameCollection,
    Cache,
    LiveCatalog,
    InProgressFallback,
}

impl AssignmentSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentSource::SameContainer => "same_container",
            AssignmentSource::SameCollection => "same_collection",
            AssignmentSource::Cache => "cache",
            AssignmentSource::LiveCatalog => "live_catalog",
            AssignmentSource::InProgressFallback => "in_progress_fallback",
        }
    }
}

impl std::fmt::Display for AssignmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A work item handed to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub item: WorkItemRef,
    pub source: AssignmentSource,
    /// Whether a reservation was written for the request's holder token.
    pub reserved: bool,
}

// ---------------------------------------------------------------------------
// Request builder
// ---------------------------------------------------------------------------

/// Parameters of a next-assignment request. Context fields are hints: an
/// unknown or foreign `after` id is ignored rather than rejected.
#[derive(Debug, Clone)]
pub struct NextRequest {
    pool: PoolId,
    kind: PoolKind,
    worker: Option<WorkerId>,
    collection_key: Option<String>,
    container_key: Option<String>,
    after: Option<WorkItemId>,
    holder_token: Option<String>,
}

impl NextRequest {
    pub fn new(pool: &Pool) -> Self {
        Self {
            pool: pool.id,
            kind: pool.kind,
            worker: None,
            collection_key: None,
            container_key: None,
            after: None,
            holder_token: None,
        }
    }

    pub fn worker(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Collection the worker is currently in.
    pub fn collection(mut self, key: impl Into<String>) -> Self {
        self.collection_key = Some(key.into());
        self
    }

    /// Container the worker is currently in.
    pub fn container(mut self, key: impl Into<String>) -> Self {
        self.container_key = Some(key.into());
        self
    }

    /// Item the worker just finished.
    pub fn after(mut self, id: WorkItemId) -> Self {
        self.after = Some(id);
        self
    }

    /// Reserve the assigned item for this holder in the same transaction.
    pub fn reserve_for(mut self, holder_token: impl Into<String>) -> Self {
        self.holder_token = Some(holder_token.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    db: Arc<Db>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(db: Arc<Db>, config: SchedulerConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Maintenance operations sharing this scheduler's database and tuning.
    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(Arc::clone(&self.db), &self.config)
    }

    /// Next item for first-pass transcription. `Ok(None)` means the pool has
    /// no work available right now.
    pub async fn next_transcribable(&self, req: NextRequest) -> Result<Option<Assignment>> {
        self.assign(Mode::Transcribe, req).await
    }

    /// Next submitted item for `worker` to review, never one they worked on.
    pub async fn next_reviewable(
        &self,
        worker: WorkerId,
        req: NextRequest,
    ) -> Result<Option<Assignment>> {
        self.assign(Mode::Review, req.worker(worker)).await
    }

    async fn assign(&self, mode: Mode, req: NextRequest) -> Result<Option<Assignment>> {
        let span = start_assign_span(mode, req.pool, req.worker);
        let started = Instant::now();

        let result = async {
            let ctx = RequestContext {
                pool: req.pool,
                membership: membership_for(req.kind),
                mode,
                worker: req.worker,
                collection_key: req.collection_key.as_deref(),
                container_key: req.container_key.as_deref(),
                after: req.after,
                reservation_ttl: self.config.reservation_ttl,
            };

            let mut fell_back_to_live = false;
            let mut assignment = None;
            for attempt in 1..=RESERVE_ATTEMPTS {
                let mut tx = self.db.pool().begin().await?;
                let resolution = locality::resolve(&mut *tx, &ctx).await?;
                fell_back_to_live |= resolution.fell_back_to_live;

                let Some(found) = resolution.found else {
                    tx.rollback().await?;
                    break;
                };

                let claimed = found.candidate_id.is_some();
                if claimed {
                    record_row_transitions(CacheRowState::Fresh, CacheRowState::Claimed, 1)?;
                }

                let outcome = self
                    .reserve_and_commit(tx, found.item.id, req.holder_token.as_deref())
                    .await;
                if claimed {
                    record_row_transitions(CacheRowState::Claimed, settled_state(&outcome), 1)?;
                }

                match outcome? {
                    Some(reserved) => {
                        assignment = Some(Assignment {
                            item: found.item.into(),
                            source: found.source,
                            reserved,
                        });
                        break;
                    }
                    None => {
                        // Reserved by a request that committed after our
                        // snapshot was taken. The next attempt sees it.
                        debug!(work_item = %found.item.id, attempt, "lost reservation race, retrying");
                    }
                }
            }

            // Only after the chosen item is committed: a repopulation running
            // earlier could cache the very item this request is returning.
            if fell_back_to_live {
                self.request_repopulate(req.pool, mode).await;
            }

            Ok(assignment)
        }
        .instrument(span.clone())
        .await;

        let source = match &result {
            Ok(Some(a)) => a.source.as_str(),
            Ok(None) => "none",
            Err(_) => "error",
        };
        record_assignment(
            &span,
            source,
            result.as_ref().ok().and_then(|a| a.as_ref()).map(|a| a.item.id.0),
        );
        metrics::assign_requests().add(
            1,
            &[
                KeyValue::new("mode", mode.as_str()),
                KeyValue::new("source", source),
            ],
        );
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "assign.next")],
        );

        result
    }

    /// Reserve the locked item if a holder token was given, then commit.
    ///
    /// `Ok(None)` means the reservation was lost and the transaction rolled
    /// back. Otherwise returns whether a reservation was written. On error
    /// the dropped transaction rolls back.
    async fn reserve_and_commit(
        &self,
        mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
        id: WorkItemId,
        holder_token: Option<&str>,
    ) -> Result<Option<bool>> {
        let Some(token) = holder_token else {
            tx.commit().await?;
            return Ok(Some(false));
        };
        if upsert_reservation(&mut *tx, id, token, self.config.reservation_ttl).await? {
            tx.commit().await?;
            Ok(Some(true))
        } else {
            tx.rollback().await?;
            Ok(None)
        }
    }

    /// Enqueue a repopulation job. Failure never fails the request.
    async fn request_repopulate(&self, pool: PoolId, mode: Mode) {
        match self.db.enqueue_repopulate(RepopulateJob::new(pool, mode)).await {
            Ok(msg_id) => debug!(%pool, %mode, msg_id, "repopulation requested"),
            Err(e) => warn!(%pool, %mode, "failed to enqueue repopulation: {e}"),
        }
    }
}

/// Where a claimed cache row ends up once its attempt is settled: consumed
/// on commit, back to fresh on a rollback of any kind.
fn settled_state(outcome: &Result<Option<bool>>) -> CacheRowState {
    match outcome {
        Ok(Some(_)) => CacheRowState::Deleted,
        Ok(None) | Err(_) => CacheRowState::Fresh,
    }
}
