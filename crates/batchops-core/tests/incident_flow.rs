//! Known-error auto-retry and incident lifecycle scenarios

mod common;

use batchops_core::callable::PIPELINE_CALLABLE;
use batchops_core::Clock;
use batchops_core::models::{
    IncidentCategory, IncidentState, JobDefinition, JobRunStatus, KnownError, ProcessMode,
    Severity, UploadStatus,
};
use common::{drain, new_engine, seed_upload, GRADES_CSV};
use serde_json::json;

/// Scenario: a PDF without a table matches a known error with auto-retry.
/// The first failure opens an incident with auto_retry_count=1; after the
/// file is replaced externally, the scheduled retry publishes and the
/// incident auto-resolves with the failure record intact.
#[tokio::test]
async fn known_error_auto_retry_resolves_after_replacement() {
    let t = new_engine().await;

    let known = KnownError::new(
        "pdf_no_table",
        "No table found in PDF",
        Severity::Medium,
        IncidentCategory::Ingest,
        t.clock.now(),
    )
    .with_auto_retry(2)
    .with_remediation("scanned pdf without a text layer", "re-upload as csv");
    t.repos.known_errors.create(&known).await.unwrap();

    // A well-formed PDF whose text is prose only: standardize raises
    // "No table found in PDF pages"
    let upload = seed_upload(
        &t,
        "report.pdf",
        &common::prose_pdf(),
        ProcessMode::Transform,
        json!({}),
    )
    .await;

    t.engine
        .trigger(PIPELINE_CALLABLE, vec![json!(upload.id.to_string())])
        .await
        .unwrap();
    assert_eq!(drain(&t).await, 1);

    // First failure: incident open, counter bumped, retry in the delayed
    // set with the 30s linear backoff
    let incidents = t.repos.incidents.list_active_for_upload(upload.id).await.unwrap();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(incident.state, IncidentState::Open);
    assert!(incident.is_known);
    assert_eq!(incident.known_error_id, Some(known.id));
    assert_eq!(incident.auto_retry_count, 1);
    assert_eq!(incident.max_auto_retries, 2);
    assert!(incident
        .timeline
        .0
        .iter()
        .any(|e| e.event == "auto_retry_scheduled"));

    let failed = t.repos.uploads.find_by_id(upload.id).await.unwrap().unwrap();
    assert_eq!(failed.status, UploadStatus::Failed);

    // Nothing runnable before the backoff elapses
    t.scheduler.tick().await.unwrap();
    assert!(!t.pool.run_once().await.unwrap());

    // Replacement file arrives externally (same upload, corrected source)
    let mut replaced = failed.clone();
    replaced.filename = "report.csv".to_string();
    t.deps.storage.write_source(&replaced, GRADES_CSV).unwrap();
    t.repos.uploads.update(&replaced).await.unwrap();

    // Backoff elapses; the promoted retry publishes
    t.clock.advance(chrono::Duration::seconds(31));
    t.scheduler.tick().await.unwrap();
    assert_eq!(drain(&t).await, 1);

    let published = t.repos.uploads.find_by_id(upload.id).await.unwrap().unwrap();
    assert_eq!(published.status, UploadStatus::Published);

    let incident = t.repos.incidents.find_by_id(incident.id).await.unwrap().unwrap();
    assert_eq!(incident.state, IncidentState::Resolved);
    assert!(incident.resolved_at.is_some());
    assert_eq!(incident.auto_retry_count, 1);

    // Audit trail: creation, retry scheduling and auto-resolution all
    // present, timestamps non-decreasing
    let events: Vec<&str> = incident.timeline.0.iter().map(|e| e.event.as_str()).collect();
    assert!(events.contains(&"created"));
    assert!(events.contains(&"auto_retry_scheduled"));
    assert!(events.contains(&"auto_resolved"));
    assert!(incident
        .timeline
        .0
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));
}

/// Scenario: retries stop at max_auto_retries and the incident stays open
#[tokio::test]
async fn auto_retry_exhaustion_leaves_incident_open() {
    let t = new_engine().await;

    let known = KnownError::new(
        "pdf_no_table",
        "No table found in PDF",
        Severity::Medium,
        IncidentCategory::Ingest,
        t.clock.now(),
    )
    .with_auto_retry(1);
    t.repos.known_errors.create(&known).await.unwrap();

    let upload = seed_upload(
        &t,
        "report.pdf",
        &common::prose_pdf(),
        ProcessMode::Transform,
        json!({}),
    )
    .await;

    t.engine
        .trigger(PIPELINE_CALLABLE, vec![json!(upload.id.to_string())])
        .await
        .unwrap();
    assert_eq!(drain(&t).await, 1);

    // The single permitted retry fires and fails again
    t.clock.advance(chrono::Duration::seconds(31));
    t.scheduler.tick().await.unwrap();
    assert_eq!(drain(&t).await, 1);

    // No further retry is scheduled
    t.clock.advance(chrono::Duration::seconds(120));
    t.scheduler.tick().await.unwrap();
    assert!(!t.pool.run_once().await.unwrap());

    let incidents = t.repos.incidents.list_active_for_upload(upload.id).await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].state, IncidentState::Open);
    assert_eq!(incidents[0].auto_retry_count, 1);
    assert!(incidents[0].auto_retry_count <= incidents[0].max_auto_retries);
    assert!(incidents[0]
        .timeline
        .0
        .iter()
        .any(|e| e.event == "recurrence"));
}

/// Scenario: an unknown callable fails the run with exit code 2 and no
/// incident, and is never retried
#[tokio::test]
async fn unknown_callable_is_permanent_operator_error() {
    let t = new_engine().await;

    let job = JobDefinition::new("broken", "misc", "nonexistent.fn", t.clock.now());
    t.repos.jobs.create(&job).await.unwrap();

    t.engine.trigger("broken", vec![]).await.unwrap();
    assert_eq!(drain(&t).await, 1);

    // Queue is empty: no retry was enqueued
    assert_eq!(t.deps.queue.ready_len().await.unwrap(), 0);

    // No incident was opened
    assert_eq!(t.deps.metrics.snapshot().incidents_opened, 0);

    // The run carries the unresolved exit code
    assert_eq!(t.deps.metrics.snapshot().runs_failed, 1);
    let runs = t.repos.job_runs.list_for_job(job.id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, JobRunStatus::Failed);
    assert_eq!(runs[0].exit_code, Some(2));
    assert!(runs[0].logs.contains("unknown callable"));
}
