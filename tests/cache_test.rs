mod common;

use std::time::Duration;

use common::{collection, container, ids, item, pool, scheduler, test_db};
use scribe_rs::cache::{Housekeeper, HousekeeperConfig};
use scribe_rs::db::pgmq::RepopulateJob;
use scribe_rs::model::{Mode, PoolId, PoolKind, Status, WorkerId};
use scribe_rs::scheduler::{NextRequest, Scheduler, SchedulerConfig};
use tokio::sync::Mutex;

// Sweeps and the housekeeper touch every active pool, so the tests in this
// file take turns.
static SERIAL: Mutex<()> = Mutex::const_new(());

#[tokio::test]
#[ignore] // Requires running Postgres
async fn repopulate_is_idempotent_and_skips_reserved_items() {
    let _serial = SERIAL.lock().await;
    let db = test_db().await;
    let sched = scheduler(&db);
    let maintenance = sched.maintenance();
    let p = pool(&db, PoolKind::Closed).await;
    let coll = collection(&db, &p, "letters").await;
    let ct = container(&db, coll, "box").await;
    let mut items = Vec::new();
    for seq in 1..=4 {
        items.push(item(&db, ct, seq, Status::NotStarted).await);
    }
    item(&db, ct, 5, Status::Submitted).await;
    db.reserve(items[0].id, "holder", sched.config().reservation_ttl).await.unwrap();

    assert_eq!(maintenance.repopulate(&p, Mode::Transcribe).await.unwrap(), 3);
    assert_eq!(maintenance.repopulate(&p, Mode::Transcribe).await.unwrap(), 0);

    let rows = maintenance.candidates(p.id, Mode::Transcribe).await.unwrap();
    let cached: Vec<_> = rows.iter().map(|r| r.work_item_id).collect();
    assert_eq!(cached, ids(&items[1..]));
    assert!(rows.iter().all(|r| r.pool_id == p.id && r.container_key == "box"));

    let stats = maintenance.cache_stats(p.id).await.unwrap();
    assert_eq!(stats.transcribable, 3);
    assert_eq!(stats.reviewable, 0);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn repopulate_respects_batch_size() {
    let _serial = SERIAL.lock().await;
    let db = test_db().await;
    let sched = Scheduler::new(
        db.clone(),
        SchedulerConfig {
            cache_batch_size: 2,
            reservation_ttl: Duration::from_secs(300),
        },
    );
    let maintenance = sched.maintenance();
    let p = pool(&db, PoolKind::Closed).await;
    let ct = container(&db, collection(&db, &p, "ledgers").await, "1870").await;
    let mut items = Vec::new();
    for seq in 1..=5 {
        items.push(item(&db, ct, seq, Status::NotStarted).await);
    }

    assert_eq!(maintenance.repopulate(&p, Mode::Transcribe).await.unwrap(), 2);
    let rows = maintenance.candidates(p.id, Mode::Transcribe).await.unwrap();
    let cached: Vec<_> = rows.iter().map(|r| r.work_item_id).collect();
    assert_eq!(cached, ids(&items[..2]));

    // The next pass picks up where the cache left off
    assert_eq!(maintenance.repopulate(&p, Mode::Transcribe).await.unwrap(), 2);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn review_rows_snapshot_contributors() {
    let _serial = SERIAL.lock().await;
    let db = test_db().await;
    let maintenance = scheduler(&db).maintenance();
    let p = pool(&db, PoolKind::Closed).await;
    let ct = container(&db, collection(&db, &p, "journals").await, "vol-9").await;
    let page = item(&db, ct, 1, Status::Submitted).await;
    db.record_contribution(page.id, WorkerId(4)).await.unwrap();
    db.record_contribution(page.id, WorkerId(4)).await.unwrap();
    db.record_contribution(page.id, WorkerId(6)).await.unwrap();

    assert_eq!(maintenance.repopulate(&p, Mode::Review).await.unwrap(), 1);
    let rows = maintenance.candidates(p.id, Mode::Review).await.unwrap();
    assert_eq!(rows.len(), 1);
    let mut contributors = rows[0].contributor_ids.clone();
    contributors.sort_by_key(|w| w.0);
    assert_eq!(contributors, vec![WorkerId(4), WorkerId(6)]);
    assert_eq!(rows[0].status, Status::Submitted);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn prune_removes_rows_that_went_stale() {
    let _serial = SERIAL.lock().await;
    let db = test_db().await;
    let sched = scheduler(&db);
    let maintenance = sched.maintenance();
    let p = pool(&db, PoolKind::Closed).await;
    let ct = container(&db, collection(&db, &p, "maps").await, "atlas").await;
    let moved = item(&db, ct, 1, Status::NotStarted).await;
    let held = item(&db, ct, 2, Status::NotStarted).await;
    let kept = item(&db, ct, 3, Status::InProgress).await;
    assert_eq!(maintenance.repopulate(&p, Mode::Transcribe).await.unwrap(), 3);

    db.set_status(moved.id, Status::Submitted).await.unwrap();
    db.reserve(held.id, "holder", sched.config().reservation_ttl).await.unwrap();

    assert_eq!(maintenance.prune_invalid(p.id).await.unwrap(), 2);
    assert_eq!(maintenance.prune_invalid(p.id).await.unwrap(), 0);

    let rows = maintenance.candidates(p.id, Mode::Transcribe).await.unwrap();
    let cached: Vec<_> = rows.iter().map(|r| r.work_item_id).collect();
    assert_eq!(cached, vec![kept.id]);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn clear_empties_both_caches() {
    let _serial = SERIAL.lock().await;
    let db = test_db().await;
    let maintenance = scheduler(&db).maintenance();
    let p = pool(&db, PoolKind::Closed).await;
    let ct = container(&db, collection(&db, &p, "recipes").await, "cards").await;
    item(&db, ct, 1, Status::NotStarted).await;
    item(&db, ct, 2, Status::Submitted).await;
    maintenance.repopulate(&p, Mode::Transcribe).await.unwrap();
    maintenance.repopulate(&p, Mode::Review).await.unwrap();

    assert_eq!(maintenance.clear(p.id).await.unwrap(), 2);
    let stats = maintenance.cache_stats(p.id).await.unwrap();
    assert_eq!((stats.transcribable, stats.reviewable), (0, 0));
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn sweep_covers_every_active_pool() {
    let _serial = SERIAL.lock().await;
    let db = test_db().await;
    let maintenance = scheduler(&db).maintenance();
    let p = pool(&db, PoolKind::Closed).await;
    let ct = container(&db, collection(&db, &p, "census").await, "1860").await;
    item(&db, ct, 1, Status::NotStarted).await;
    item(&db, ct, 2, Status::Submitted).await;

    let report = maintenance.sweep_all().await.unwrap();
    assert!(report.pools >= 1);
    assert!(report.inserted >= 2);

    let stats = maintenance.cache_stats(p.id).await.unwrap();
    assert_eq!((stats.transcribable, stats.reviewable), (1, 1));
}

#[tokio::test]
#[ignore] // Requires running Postgres with pgmq
async fn live_fallback_queues_a_repopulation_the_housekeeper_drains() {
    let _serial = SERIAL.lock().await;
    let db = test_db().await;
    let sched = scheduler(&db);
    let p = pool(&db, PoolKind::Closed).await;
    let ct = container(&db, collection(&db, &p, "ships").await, "log").await;
    for seq in 1..=3 {
        item(&db, ct, seq, Status::NotStarted).await;
    }

    sched
        .next_transcribable(NextRequest::new(&p).reserve_for("deckhand"))
        .await
        .unwrap()
        .expect("live catalog item");
    assert_eq!(db.pending_repopulate_jobs(p.id).await.unwrap(), 1);

    // A duplicate job and a job for a pool that no longer exists
    db.enqueue_repopulate(RepopulateJob::new(p.id, Mode::Transcribe)).await.unwrap();
    db.enqueue_repopulate(RepopulateJob::new(PoolId(-1), Mode::Review)).await.unwrap();

    let housekeeper = Housekeeper::new(db.clone(), sched.maintenance(), HousekeeperConfig::default());
    let archived = housekeeper.drain_jobs().await.unwrap();
    assert!(archived >= 3, "archived {archived}");
    assert_eq!(db.pending_repopulate_jobs(p.id).await.unwrap(), 0);

    let stats = sched.maintenance().cache_stats(p.id).await.unwrap();
    assert_eq!(stats.transcribable, 2);
}

#[tokio::test]
#[ignore] // Requires running Postgres with pgmq
async fn housekeeper_stops_on_shutdown() {
    let _serial = SERIAL.lock().await;
    let db = test_db().await;
    let housekeeper = Housekeeper::new(
        db.clone(),
        scheduler(&db).maintenance(),
        HousekeeperConfig {
            poll_interval: Duration::from_millis(50),
            ..HousekeeperConfig::default()
        },
    );

    let handle = tokio::spawn({
        let housekeeper = housekeeper.clone();
        async move { housekeeper.run().await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    housekeeper.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(30), handle)
        .await
        .expect("housekeeper exits")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
#[ignore] // Requires running Postgres with pgmq
async fn jobs_past_the_read_limit_are_archived_unprocessed() {
    let _serial = SERIAL.lock().await;
    let db = test_db().await;
    let sched = scheduler(&db);
    let p = pool(&db, PoolKind::Closed).await;
    let ct = container(&db, collection(&db, &p, "wills").await, "1790").await;
    item(&db, ct, 1, Status::NotStarted).await;

    db.enqueue_repopulate(RepopulateJob::new(p.id, Mode::Transcribe)).await.unwrap();
    assert_eq!(db.pending_repopulate_jobs(p.id).await.unwrap(), 1);

    // A limit of zero gives up on the first read
    let housekeeper = Housekeeper::new(
        db.clone(),
        sched.maintenance(),
        HousekeeperConfig {
            max_read_count: 0,
            ..HousekeeperConfig::default()
        },
    );
    assert!(housekeeper.drain_jobs().await.unwrap() >= 1);

    assert_eq!(db.pending_repopulate_jobs(p.id).await.unwrap(), 0);
    let stats = sched.maintenance().cache_stats(p.id).await.unwrap();
    assert_eq!(stats.transcribable, 0);
}
