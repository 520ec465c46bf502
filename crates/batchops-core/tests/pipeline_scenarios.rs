//! End-to-end pipeline scenarios over the in-memory ports

mod common;

use batchops_core::callable::PIPELINE_CALLABLE;
use batchops_core::Clock;
use batchops_core::models::{
    IncidentCategory, JobRunStatus, ProcessMode, StepStatus, UploadStatus,
};
use common::{drain, new_engine, seed_upload, GRADES_CSV};
use serde_json::json;

async fn run_pipeline(t: &common::TestEngine, upload_id: uuid::Uuid) {
    t.engine
        .trigger(PIPELINE_CALLABLE, vec![json!(upload_id.to_string())])
        .await
        .unwrap();
    assert_eq!(drain(t).await, 1);
}

#[tokio::test]
async fn happy_path_transform_publishes_summary() {
    let t = new_engine().await;
    let upload = seed_upload(&t, "grades.csv", GRADES_CSV, ProcessMode::Transform, json!({})).await;

    run_pipeline(&t, upload.id).await;

    let upload = t.repos.uploads.find_by_id(upload.id).await.unwrap().unwrap();
    assert_eq!(upload.status, UploadStatus::Published);
    assert!(upload.report_generated_at.is_some());

    let csv = upload.report_csv.as_ref().unwrap();
    assert!(csv.contains("row_count,3"));
    assert!(csv.contains("column_count,2"));
    assert!(csv.contains("score_min,70"));
    assert!(upload.report_pdf.as_ref().unwrap().starts_with(b"%PDF-"));

    // Five step records, all success, in pipeline order
    let run = t
        .repos
        .job_runs
        .latest_for_upload(upload.id, uuid::Uuid::nil())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, JobRunStatus::Success);
    assert_eq!(run.exit_code, Some(0));
    let names: Vec<&str> = run.details.0.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["standardize", "validate", "transform", "summarize", "publish"]
    );
    assert!(run.details.0.iter().all(|s| s.status == StepStatus::Success));

    // Run arithmetic invariants
    let finished = run.finished_at.unwrap();
    assert!(finished >= run.started_at);
    assert_eq!(
        run.duration_ms.unwrap(),
        (finished - run.started_at).num_milliseconds()
    );

    // Artifacts landed in exports/ under names embedding the upload id
    assert!(t.deps.storage.export_csv_path(&upload).exists());
    assert!(t.deps.storage.export_pdf_path(&upload).exists());
}

#[tokio::test]
async fn append_mode_adds_configured_records() {
    let t = new_engine().await;
    let config = json!({ "records": [{ "student_id": "S99", "score": 77 }] });
    let upload = seed_upload(&t, "grades.csv", GRADES_CSV, ProcessMode::Append, config).await;

    run_pipeline(&t, upload.id).await;

    let upload = t.repos.uploads.find_by_id(upload.id).await.unwrap().unwrap();
    assert_eq!(upload.status, UploadStatus::Published);

    let csv = upload.report_csv.as_ref().unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "student_id,score");
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[4], "S99,77");
}

#[tokio::test]
async fn delete_mode_drops_matching_rows() {
    let t = new_engine().await;
    let config = json!({ "column": "student_id", "value": "S2" });
    let upload = seed_upload(&t, "grades.csv", GRADES_CSV, ProcessMode::Delete, config).await;

    run_pipeline(&t, upload.id).await;

    let upload = t.repos.uploads.find_by_id(upload.id).await.unwrap().unwrap();
    let csv = upload.report_csv.as_ref().unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(!csv.contains("S2"));
}

#[tokio::test]
async fn pipeline_is_idempotent_on_redelivery() {
    let t = new_engine().await;
    let upload = seed_upload(&t, "grades.csv", GRADES_CSV, ProcessMode::Transform, json!({})).await;

    run_pipeline(&t, upload.id).await;
    let first = t.repos.uploads.find_by_id(upload.id).await.unwrap().unwrap();

    // Second delivery is a no-op: same artifact, no step progression
    run_pipeline(&t, upload.id).await;
    let second = t.repos.uploads.find_by_id(upload.id).await.unwrap().unwrap();

    assert_eq!(first.report_csv, second.report_csv);
    assert_eq!(first.report_generated_at, second.report_generated_at);

    let noop_run = t
        .repos
        .job_runs
        .latest_for_upload(upload.id, uuid::Uuid::nil())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(noop_run.status, JobRunStatus::Success);
    assert!(noop_run.details.0.is_empty());
    assert!(noop_run.logs.contains("no-op"));
}

#[tokio::test]
async fn invalid_delete_plan_raises_transform_incident() {
    let t = new_engine().await;
    let config = json!({ "column": "ghost", "value": "x" });
    let upload = seed_upload(&t, "grades.csv", GRADES_CSV, ProcessMode::Delete, config).await;

    run_pipeline(&t, upload.id).await;

    let upload = t.repos.uploads.find_by_id(upload.id).await.unwrap().unwrap();
    assert_eq!(upload.status, UploadStatus::Failed);
    assert!(upload.report_csv.is_none());
    assert!(upload.report_pdf.is_none());

    let incidents = t.repos.incidents.list_active_for_upload(upload.id).await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].category, IncidentCategory::Transform);
    assert_eq!(incidents[0].failing_stage, "transform");

    // The run failed at transform; earlier stages succeeded
    let run = t
        .repos
        .job_runs
        .latest_for_upload(upload.id, uuid::Uuid::nil())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, JobRunStatus::Failed);
    assert_eq!(run.details.0.len(), 3);
    assert_eq!(run.details.0[2].status, StepStatus::Failed);
}

#[tokio::test]
async fn unsupported_format_raises_ingest_incident() {
    let t = new_engine().await;
    let upload = seed_upload(&t, "notes.docx", b"whatever", ProcessMode::Transform, json!({})).await;

    run_pipeline(&t, upload.id).await;

    let incidents = t.repos.incidents.list_active_for_upload(upload.id).await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].category, IncidentCategory::Ingest);
    assert_eq!(incidents[0].failing_stage, "standardize");
    assert!(incidents[0].error.contains("unsupported file format"));
}

#[tokio::test]
async fn missing_required_column_raises_validation_incident() {
    let t = new_engine().await;
    let config = json!({ "required_columns": ["student_id", "grade"] });
    let upload = seed_upload(&t, "grades.csv", GRADES_CSV, ProcessMode::Transform, config).await;

    run_pipeline(&t, upload.id).await;

    let incidents = t.repos.incidents.list_active_for_upload(upload.id).await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].category, IncidentCategory::Validation);
    assert!(incidents[0].error.contains("grade"));
}

#[tokio::test]
async fn missing_source_file_retries_then_raises_runtime_incident() {
    let t = new_engine().await;
    // Upload row exists but the source file was never written
    let upload = batchops_core::models::Upload::new(
        "ghost.csv",
        "registrar",
        ProcessMode::Transform,
        t.clock.now(),
    );
    t.repos.uploads.create(&upload).await.unwrap();

    run_pipeline(&t, upload.id).await;

    let run = t
        .repos
        .job_runs
        .latest_for_upload(upload.id, uuid::Uuid::nil())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, JobRunStatus::Failed);
    // The transient retries left their trace on the step log
    assert!(run.details.0[0].logs.contains("retrying"));

    let incidents = t.repos.incidents.list_active_for_upload(upload.id).await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].category, IncidentCategory::Runtime);
}

#[tokio::test]
async fn failed_then_retried_upload_republishes() {
    let t = new_engine().await;
    // Bad plan first
    let config = json!({ "column": "ghost", "value": "x" });
    let upload = seed_upload(&t, "grades.csv", GRADES_CSV, ProcessMode::Delete, config).await;
    run_pipeline(&t, upload.id).await;

    // Operator fixes the plan and retries through the incident
    let mut fixed = t.repos.uploads.find_by_id(upload.id).await.unwrap().unwrap();
    fixed.process_config = sqlx::types::Json(json!({ "column": "student_id", "value": "S2" }));
    t.repos.uploads.update(&fixed).await.unwrap();

    let incident = &t.repos.incidents.list_active_for_upload(upload.id).await.unwrap()[0];
    t.deps
        .incidents
        .retry(incident.id, "plan fixed", "ops")
        .await
        .unwrap();
    assert_eq!(drain(&t).await, 1);

    let upload = t.repos.uploads.find_by_id(upload.id).await.unwrap().unwrap();
    assert_eq!(upload.status, UploadStatus::Published);
    assert!(!upload.report_csv.as_ref().unwrap().contains("S2"));

    // The incident auto-resolved once the retry published
    let incidents = t.repos.incidents.list_active_for_upload(upload.id).await.unwrap();
    assert!(incidents
        .iter()
        .all(|i| i.state == batchops_core::models::IncidentState::Resolved));
}
