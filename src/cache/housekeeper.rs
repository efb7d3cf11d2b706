//! Housekeeper: drains repopulation jobs and runs the periodic sweep.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::Maintenance;
use crate::db::Db;
use crate::db::pgmq::REPOPULATE_QUEUE;
use crate::error::{Error, Result};

/// Configuration for the housekeeper loop.
#[derive(Debug, Clone)]
pub struct HousekeeperConfig {
    /// Visibility timeout (seconds) for pgmq reads.
    pub visibility_timeout: i32,
    /// Jobs read per drain round.
    pub read_batch: i32,
    /// Poll interval fallback when no NOTIFY arrives.
    pub poll_interval: Duration,
    /// Interval of the prune + repopulate sweep over all active pools.
    pub sweep_interval: Duration,
    /// Reads after which a job that keeps failing is archived unprocessed.
    /// The periodic sweep still covers its pool.
    pub max_read_count: i32,
}

impl HousekeeperConfig {
    fn gives_up_on(&self, read_ct: i32) -> bool {
        read_ct > self.max_read_count
    }
}

impl Default for HousekeeperConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: 60,
            read_batch: 16,
            poll_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(3600),
            max_read_count: 5,
        }
    }
}

/// Background worker owning cache upkeep.
#[derive(Clone)]
pub struct Housekeeper {
    db: Arc<Db>,
    maintenance: Maintenance,
    config: HousekeeperConfig,
    shutdown: Arc<Notify>,
}

impl Housekeeper {
    pub fn new(db: Arc<Db>, maintenance: Maintenance, config: HousekeeperConfig) -> Self {
        Self {
            db,
            maintenance,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the housekeeper to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run until shutdown. The first sweep happens immediately.
    pub async fn run(&self) -> Result<()> {
        let mut listener = sqlx::postgres::PgListener::connect_with(self.db.pool()).await?;
        listener.listen(REPOPULATE_QUEUE).await?;

        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("housekeeper started, listening for repopulation jobs");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("housekeeper shutting down");
                    return Ok(());
                }
                _ = sweep.tick() => {
                    if let Err(e) = self.maintenance.sweep_all().await {
                        error!("cache sweep error: {e}");
                    }
                    continue;
                }
                notif = listener.recv() => {
                    match notif {
                        Ok(n) => debug!(pool = n.payload(), "notified of repopulation job"),
                        Err(e) => warn!("PgListener error: {e}, falling back to poll"),
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if let Err(e) = self.drain_jobs().await {
                error!("repopulation drain error: {e}");
            }
        }
    }

    /// Handle every visible job. Returns how many messages were archived.
    ///
    /// Jobs for the same pool and mode collapse into one repopulation. A job
    /// whose repopulation fails stays in the queue and reappears after the
    /// visibility timeout.
    pub async fn drain_jobs(&self) -> Result<usize> {
        let mut archived = 0;
        let mut done = HashSet::new();

        loop {
            let batch = self
                .db
                .read_repopulate_jobs(self.config.visibility_timeout, self.config.read_batch)
                .await?;
            if batch.is_empty() {
                return Ok(archived);
            }

            for queued in batch {
                let Some(job) = queued.job else {
                    warn!(msg_id = queued.msg_id, "malformed repopulation payload, archiving");
                    self.db.archive_repopulate_job(queued.msg_id).await?;
                    archived += 1;
                    continue;
                };

                if self.config.gives_up_on(queued.read_ct) && !done.contains(&job) {
                    warn!(
                        msg_id = queued.msg_id,
                        read_ct = queued.read_ct,
                        pool_id = job.pool_id,
                        mode = %job.mode,
                        "repopulation job keeps failing, archiving"
                    );
                    self.db.archive_repopulate_job(queued.msg_id).await?;
                    archived += 1;
                    continue;
                }

                if !done.contains(&job) {
                    match self.db.get_pool(job.pool()).await {
                        Ok(pool) => {
                            if let Err(e) = self.maintenance.repopulate(&pool, job.mode).await {
                                warn!(
                                    msg_id = queued.msg_id,
                                    read_ct = queued.read_ct,
                                    "repopulation failed, will retry: {e}"
                                );
                                continue;
                            }
                        }
                        Err(Error::NotFound(_)) => {
                            warn!(pool_id = job.pool_id, "repopulation job for unknown pool");
                        }
                        Err(e) => return Err(e),
                    }
                    done.insert(job);
                }

                self.db.archive_repopulate_job(queued.msg_id).await?;
                archived += 1;
            }
        }
    }
}
