mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{collection, container, item, pool, scheduler, test_db};
use scribe_rs::model::{Mode, PoolKind, Status, WorkItemId, WorkerId};
use scribe_rs::scheduler::{AssignmentSource, NextRequest};
use tokio::sync::Barrier;

#[tokio::test]
#[ignore] // Requires running Postgres
async fn worker_continues_in_their_container() {
    let db = test_db().await;
    let sched = scheduler(&db);
    let p = pool(&db, PoolKind::Closed).await;
    let coll = collection(&db, &p, "papers").await;
    // Created first, so its cache row has the lowest id
    let c0 = container(&db, coll, "C0").await;
    let z = item(&db, c0, 1, Status::NotStarted).await;
    let c1 = container(&db, coll, "C1").await;
    let c2 = container(&db, coll, "C2").await;
    let a = item(&db, c1, 1, Status::NotStarted).await;
    let b = item(&db, c1, 2, Status::NotStarted).await;
    let d = item(&db, c2, 1, Status::NotStarted).await;
    assert_eq!(sched.maintenance().repopulate(&p, Mode::Transcribe).await.unwrap(), 4);

    let w1 = sched
        .next_transcribable(
            NextRequest::new(&p)
                .worker(WorkerId(1))
                .container("C1")
                .after(a.id)
                .reserve_for("w1"),
        )
        .await
        .unwrap()
        .expect("w1 gets an item");
    assert_eq!(w1.item.id, b.id);
    assert_eq!(w1.source, AssignmentSource::SameContainer);
    assert!(w1.reserved);

    let w2 = sched
        .next_transcribable(NextRequest::new(&p).worker(WorkerId(2)).reserve_for("w2"))
        .await
        .unwrap()
        .expect("w2 gets an item");
    assert!(
        [a.id, d.id, z.id].contains(&w2.item.id),
        "got {:?}",
        w2.item
    );
    assert_eq!(w2.source, AssignmentSource::Cache);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn moves_to_another_container_in_the_same_collection() {
    let db = test_db().await;
    let sched = scheduler(&db);
    let p = pool(&db, PoolKind::Closed).await;
    let coll = collection(&db, &p, "letters").await;
    let done = container(&db, coll, "box-1").await;
    let next = container(&db, coll, "box-2").await;
    let last = item(&db, done, 1, Status::Submitted).await;
    let target = item(&db, next, 1, Status::NotStarted).await;

    let got = sched
        .next_transcribable(
            NextRequest::new(&p)
                .collection("letters")
                .container("box-1")
                .after(last.id),
        )
        .await
        .unwrap()
        .expect("an item in the collection");
    assert_eq!(got.item.id, target.id);
    assert_eq!(got.source, AssignmentSource::SameCollection);
    assert!(!got.reserved);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn stale_after_reference_is_ignored() {
    let db = test_db().await;
    let sched = scheduler(&db);
    let p = pool(&db, PoolKind::Closed).await;
    let coll = collection(&db, &p, "maps").await;
    let here = container(&db, coll, "sheet-a").await;
    let elsewhere = container(&db, coll, "sheet-b").await;
    let first = item(&db, here, 1, Status::NotStarted).await;
    item(&db, here, 2, Status::NotStarted).await;
    let foreign = item(&db, elsewhere, 5, Status::NotStarted).await;

    for after in [foreign.id, WorkItemId(i64::MAX)] {
        let got = sched
            .next_transcribable(NextRequest::new(&p).container("sheet-a").after(after))
            .await
            .unwrap()
            .expect("an item");
        assert_eq!(got.item.id, first.id);
        assert_eq!(got.source, AssignmentSource::SameContainer);
    }
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn transcription_defers_in_progress_items() {
    let db = test_db().await;
    let sched = scheduler(&db);
    let p = pool(&db, PoolKind::Closed).await;
    let coll = collection(&db, &p, "journals").await;
    let ct = container(&db, coll, "vol-2").await;
    let started = item(&db, ct, 1, Status::InProgress).await;
    let fresh = item(&db, ct, 2, Status::NotStarted).await;

    let got = sched
        .next_transcribable(NextRequest::new(&p).container("vol-2"))
        .await
        .unwrap()
        .expect("an item");
    assert_eq!(got.item.id, fresh.id);

    db.set_status(fresh.id, Status::Submitted).await.unwrap();
    let got = sched
        .next_transcribable(NextRequest::new(&p).container("vol-2"))
        .await
        .unwrap()
        .expect("the in-progress item");
    assert_eq!(got.item.id, started.id);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn modes_only_see_their_statuses() {
    let db = test_db().await;
    let sched = scheduler(&db);
    let p = pool(&db, PoolKind::Closed).await;
    let coll = collection(&db, &p, "census").await;
    let ct = container(&db, coll, "1850").await;
    let submitted = item(&db, ct, 1, Status::Submitted).await;
    item(&db, ct, 2, Status::Completed).await;

    let transcribe = sched.next_transcribable(NextRequest::new(&p)).await.unwrap();
    assert!(transcribe.is_none(), "got {transcribe:?}");

    let review = sched
        .next_reviewable(WorkerId(9), NextRequest::new(&p))
        .await
        .unwrap()
        .expect("the submitted item");
    assert_eq!(review.item.id, submitted.id);
    assert_eq!(review.item.status, Status::Submitted);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn reviewers_never_get_their_own_work() {
    let db = test_db().await;
    let sched = scheduler(&db);
    let p = pool(&db, PoolKind::Closed).await;
    let coll = collection(&db, &p, "recipes").await;
    let ct = container(&db, coll, "card-box").await;
    let page = item(&db, ct, 1, Status::Submitted).await;
    db.record_contribution(page.id, WorkerId(7)).await.unwrap();

    // Cache path and locality path both exclude the contributor
    let maintenance = sched.maintenance();
    assert_eq!(maintenance.repopulate(&p, Mode::Review).await.unwrap(), 1);
    let own = sched
        .next_reviewable(WorkerId(7), NextRequest::new(&p).container("card-box"))
        .await
        .unwrap();
    assert!(own.is_none(), "got {own:?}");

    let other = sched
        .next_reviewable(WorkerId(8), NextRequest::new(&p))
        .await
        .unwrap()
        .expect("another reviewer gets it");
    assert_eq!(other.item.id, page.id);
    assert_eq!(other.source, AssignmentSource::Cache);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn unpublished_and_reserved_items_are_skipped() {
    let db = test_db().await;
    let sched = scheduler(&db);
    let p = pool(&db, PoolKind::Closed).await;
    let coll = collection(&db, &p, "diaries").await;
    let ct = container(&db, coll, "1901").await;
    db.create_work_item(ct, 1, false).await.unwrap();
    let held = item(&db, ct, 2, Status::NotStarted).await;
    let open = item(&db, ct, 3, Status::NotStarted).await;
    let hidden = db.create_container(coll, "draft", false).await.unwrap();
    item(&db, hidden, 1, Status::NotStarted).await;

    assert!(db.reserve(held.id, "someone", sched.config().reservation_ttl).await.unwrap());

    let got = sched
        .next_transcribable(NextRequest::new(&p))
        .await
        .unwrap()
        .expect("the only eligible item");
    assert_eq!(got.item.id, open.id);
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn open_pools_see_tagged_collections_only() {
    let db = test_db().await;
    let sched = scheduler(&db);
    let home = pool(&db, PoolKind::Closed).await;
    let campaign = pool(&db, PoolKind::Open).await;
    let tagged = collection(&db, &home, "suffrage").await;
    let untagged = collection(&db, &home, "weather").await;
    let t = item(&db, container(&db, tagged, "pamphlets").await, 1, Status::NotStarted).await;
    item(&db, container(&db, untagged, "logs").await, 1, Status::NotStarted).await;
    db.tag_collection(tagged, &campaign).await.unwrap();

    let got = sched
        .next_transcribable(NextRequest::new(&campaign).reserve_for("r1"))
        .await
        .unwrap()
        .expect("the tagged item");
    assert_eq!(got.item.id, t.id);

    let none = sched
        .next_transcribable(NextRequest::new(&campaign).reserve_for("r2"))
        .await
        .unwrap();
    assert!(none.is_none(), "got {none:?}");
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn live_fallback_only_when_cache_is_empty() {
    let db = test_db().await;
    let sched = scheduler(&db);
    let p = pool(&db, PoolKind::Closed).await;
    let coll = collection(&db, &p, "ships").await;
    let ct = container(&db, coll, "manifest").await;
    for seq in 1..=3 {
        item(&db, ct, seq, Status::NotStarted).await;
    }

    let live = sched
        .next_transcribable(NextRequest::new(&p).reserve_for("a"))
        .await
        .unwrap()
        .expect("live catalog item");
    assert_eq!(live.source, AssignmentSource::LiveCatalog);

    let maintenance = sched.maintenance();
    assert_eq!(maintenance.repopulate(&p, Mode::Transcribe).await.unwrap(), 2);

    let cached = sched
        .next_transcribable(NextRequest::new(&p).reserve_for("b"))
        .await
        .unwrap()
        .expect("cached item");
    assert_eq!(cached.source, AssignmentSource::Cache);
    assert_ne!(cached.item.id, live.item.id);

    // Handing out a cached row consumes it
    let stats = maintenance.cache_stats(p.id).await.unwrap();
    assert_eq!(stats.transcribable, 1);
}

/// Fire `n` reserving requests at once against a pool holding `n` items.
async fn race(cached: bool, n: i64) {
    let db = test_db().await;
    let sched = Arc::new(scheduler(&db));
    let p = pool(&db, PoolKind::Closed).await;
    let coll = collection(&db, &p, "rush").await;
    let ct = container(&db, coll, "stack").await;
    for seq in 1..=n {
        item(&db, ct, seq as i32, Status::NotStarted).await;
    }
    if cached {
        let inserted = sched.maintenance().repopulate(&p, Mode::Transcribe).await.unwrap();
        assert_eq!(inserted, n as u64);
    }

    let barrier = Arc::new(Barrier::new(n as usize));
    let mut handles = Vec::new();
    for worker in 0..n {
        let sched = Arc::clone(&sched);
        let barrier = Arc::clone(&barrier);
        let p = p.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            sched
                .next_transcribable(
                    NextRequest::new(&p)
                        .worker(WorkerId(worker))
                        .reserve_for(format!("worker-{worker}")),
                )
                .await
                .unwrap()
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let assignment = handle.await.unwrap().expect("every request gets an item");
        assert!(assignment.reserved);
        assert!(seen.insert(assignment.item.id), "{} assigned twice", assignment.item.id);
    }
    assert_eq!(seen.len(), n as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires running Postgres
async fn concurrent_requests_on_a_warm_cache_get_distinct_items() {
    race(true, 8).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires running Postgres
async fn concurrent_requests_on_the_live_catalog_get_distinct_items() {
    race(false, 8).await;
}

#[tokio::test]
#[ignore] // Requires running Postgres with pgmq
async fn repopulation_is_requested_only_after_a_live_fallback() {
    let db = test_db().await;
    let sched = scheduler(&db);
    let p = pool(&db, PoolKind::Closed).await;
    let coll = collection(&db, &p, "minutes").await;
    let c1 = container(&db, coll, "C1").await;
    item(&db, c1, 1, Status::NotStarted).await;
    item(&db, c1, 2, Status::NotStarted).await;

    let short = sched
        .next_transcribable(NextRequest::new(&p).container("C1").reserve_for("s"))
        .await
        .unwrap()
        .expect("same-container item");
    assert_eq!(short.source, AssignmentSource::SameContainer);
    assert_eq!(db.pending_repopulate_jobs(p.id).await.unwrap(), 0);

    assert_eq!(sched.maintenance().repopulate(&p, Mode::Transcribe).await.unwrap(), 1);
    let cached = sched
        .next_transcribable(NextRequest::new(&p).reserve_for("c"))
        .await
        .unwrap()
        .expect("cached item");
    assert_eq!(cached.source, AssignmentSource::Cache);
    assert_eq!(db.pending_repopulate_jobs(p.id).await.unwrap(), 0);

    // Added after the cache was filled, so only the live catalog knows it
    let c2 = container(&db, coll, "C2").await;
    let late = item(&db, c2, 1, Status::NotStarted).await;
    let live = sched
        .next_transcribable(NextRequest::new(&p).reserve_for("l"))
        .await
        .unwrap()
        .expect("live item");
    assert_eq!(live.source, AssignmentSource::LiveCatalog);
    assert_eq!(live.item.id, late.id);
    assert_eq!(db.pending_repopulate_jobs(p.id).await.unwrap(), 1);
}
