//! Cron dispatch, restart safety, queue delivery and ingest generation

mod common;

use std::sync::Arc;

use batchops_core::clock::ManualClock;
use batchops_core::Clock;
use batchops_core::models::{DepartmentRecord, JobDefinition, UploadStatus};
use chrono::{TimeZone, Utc};
use common::{drain, engine_over, new_engine};
use serde_json::{json, Map};

/// Scenario: a `*/5 * * * *` job fires at 12:05. The scheduler dies after
/// dispatch and a fresh scheduler takes over the same durable state at
/// 12:06; exactly one enqueue exists for the 12:05 fire.
#[tokio::test]
async fn exactly_one_enqueue_per_fire_across_restart() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 4, 0).unwrap(),
    ));
    let first = new_engine_with_clock(clock.clone()).await;

    let job = JobDefinition::new("every_five", "ingest", "ingest.department_feed", clock.now())
        .with_schedule("*/5 * * * *");
    first.repos.jobs.create(&job).await.unwrap();
    first.engine.reconcile().await.unwrap();

    // Before the fire time nothing dispatches
    assert_eq!(first.scheduler.tick().await.unwrap(), 0);

    // 12:05 passes: one dispatch
    clock.advance(chrono::Duration::seconds(70));
    assert_eq!(first.scheduler.tick().await.unwrap(), 1);
    assert_eq!(first.deps.queue.ready_len().await.unwrap(), 1);

    // "Crash": drop the first engine, rebuild over the same kv store and
    // repositories at 12:06
    let kv = first.kv.clone();
    let repos = first.repos.clone();
    drop(first);
    clock.advance(chrono::Duration::seconds(50));

    let second = engine_over(kv, repos, clock.clone()).await;

    // The restarted scheduler re-derives pending state: the 12:05 fire is
    // already dispatched, so nothing fires again until 12:10
    assert_eq!(second.scheduler.tick().await.unwrap(), 0);
    assert_eq!(second.deps.queue.ready_len().await.unwrap(), 1);

    // The next fire is the 12:10 one
    clock.advance(chrono::Duration::minutes(5));
    assert_eq!(second.scheduler.tick().await.unwrap(), 1);
    assert_eq!(second.deps.queue.ready_len().await.unwrap(), 2);
}

/// Missed fires during downtime are not replayed
#[tokio::test]
async fn missed_fires_are_not_replayed_after_outage() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    ));
    let t = new_engine_with_clock(clock.clone()).await;

    let job = JobDefinition::new("every_five", "ingest", "ingest.department_feed", clock.now())
        .with_schedule("*/5 * * * *");
    t.repos.jobs.create(&job).await.unwrap();
    t.engine.reconcile().await.unwrap();

    // Outage: the process is down from 12:00 to 15:00 and restarts,
    // running startup reconciliation
    clock.advance(chrono::Duration::hours(3));
    t.engine.reconcile().await.unwrap();

    // None of the 36 missed fires replay; the next fire is computed from
    // now (15:05)
    assert_eq!(t.scheduler.tick().await.unwrap(), 0);
    assert_eq!(t.deps.queue.ready_len().await.unwrap(), 0);

    clock.advance(chrono::Duration::minutes(6));
    assert_eq!(t.scheduler.tick().await.unwrap(), 1);
    assert_eq!(t.deps.queue.ready_len().await.unwrap(), 1);
}

/// Queue at-least-once: a crash after claim but before ack returns the
/// entry after lease expiry, and a subsequent claim receives it
#[tokio::test]
async fn lease_expiry_redelivers_unacked_entry() {
    let t = new_engine().await;

    let job = JobDefinition::new("noop", "misc", "nonexistent.fn", t.clock.now());
    t.repos.jobs.create(&job).await.unwrap();
    t.engine.trigger("noop", vec![]).await.unwrap();

    // Claim and "crash" without acking
    let claimed = t
        .deps
        .queue
        .claim(uuid::Uuid::new_v4(), chrono::Duration::seconds(600), t.clock.now())
        .await
        .unwrap()
        .unwrap();

    // Before expiry the entry is invisible
    t.scheduler.tick().await.unwrap();
    assert!(t
        .deps
        .queue
        .claim(uuid::Uuid::new_v4(), chrono::Duration::seconds(600), t.clock.now())
        .await
        .unwrap()
        .is_none());

    // After expiry the tick reaps it back and it is claimable again
    t.clock.advance(chrono::Duration::seconds(601));
    t.scheduler.tick().await.unwrap();
    let again = t
        .deps
        .queue
        .claim(uuid::Uuid::new_v4(), chrono::Duration::seconds(600), t.clock.now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.entry.entry_id, claimed.entry.entry_id);
}

/// Ingest generator: feed rows become a pending upload plus an enqueued
/// pipeline execution, which then publishes
#[tokio::test]
async fn ingest_generator_creates_upload_and_pipeline_run() {
    let t = new_engine().await;

    for (student, score) in [("S1", 90), ("S2", 85)] {
        let mut payload = Map::new();
        payload.insert("student_id".to_string(), json!(student));
        payload.insert("score".to_string(), json!(score));
        t.repos
            .department_records
            .create(&DepartmentRecord::new("registrar", payload, t.clock.now()))
            .await
            .unwrap();
    }

    let mut kwargs = Map::new();
    kwargs.insert("source".to_string(), json!("registrar"));
    let job = JobDefinition::new("registrar_feed", "ingest", "ingest.department_feed", t.clock.now())
        .with_kwargs(kwargs);
    t.repos.jobs.create(&job).await.unwrap();

    t.engine.trigger("registrar_feed", vec![]).await.unwrap();

    // First drain pass runs the generator, which enqueues the pipeline;
    // the second entry publishes the upload
    assert_eq!(drain(&t).await, 2);

    let runs = t.repos.job_runs.list_for_job(job.id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, batchops_core::models::JobRunStatus::Success);

    // The generated upload published with the feed contents
    let pipeline_job = t
        .repos
        .jobs
        .find_by_name(batchops_core::callable::PIPELINE_CALLABLE)
        .await
        .unwrap()
        .unwrap();
    let pipeline_runs = t.repos.job_runs.list_for_job(pipeline_job.id).await.unwrap();
    assert_eq!(pipeline_runs.len(), 1);

    let upload_id = pipeline_runs[0].upload_id.unwrap();
    let upload = t.repos.uploads.find_by_id(upload_id).await.unwrap().unwrap();
    assert_eq!(upload.status, UploadStatus::Published);
    assert_eq!(upload.department, "registrar");
    assert!(upload.report_csv.as_ref().unwrap().contains("row_count,2"));
}

async fn new_engine_with_clock(clock: Arc<ManualClock>) -> common::TestEngine {
    engine_over(
        Arc::new(batchops_core::kv::MemoryStore::new()),
        batchops_core::repository::Repositories::in_memory(),
        clock,
    )
    .await
}
