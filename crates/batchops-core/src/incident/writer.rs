//! Incident/ticket writer
//!
//! Creates and mutates incident records: one open incident per
//! (upload, failing stage). Engine-side entry points record pipeline
//! failures and auto-resolve after a successful retry; operator actions
//! (assign, analyze, resolve, retry, archive) are idempotent on their
//! final state and every state change lands on the append-only timeline.

use chrono::Duration;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::matcher::KnownErrorMatcher;
use crate::callable::PIPELINE_CALLABLE;
use crate::clock::Clock;
use crate::metrics::EngineMetrics;
use crate::models::{
    DetectionSource, Incident, IncidentState, JobRun, Severity, TimelineEvent, Upload,
    ENGINE_ACTOR,
};
use crate::pipeline::StageError;
use crate::queue::{QueueEntry, WorkQueue};
use crate::repository::Repositories;
use crate::{Error, Result};

/// The incident engine: failure recording, auto-retry and manual actions
#[derive(Clone)]
pub struct IncidentWriter {
    repos: Repositories,
    queue: WorkQueue,
    matcher: KnownErrorMatcher,
    metrics: Arc<EngineMetrics>,
    clock: Arc<dyn Clock>,
}

impl IncidentWriter {
    pub fn new(
        repos: Repositories,
        queue: WorkQueue,
        metrics: Arc<EngineMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let matcher = KnownErrorMatcher::new(repos.clone());
        Self {
            repos,
            queue,
            matcher,
            metrics,
            clock,
        }
    }

    /// Record a pipeline stage failure: create the open incident for the
    /// (upload, stage) pair or update the existing one, atomically with
    /// the run finalisation, then schedule any known-error auto-retry.
    pub async fn record_pipeline_failure(
        &self,
        upload: &Upload,
        run: &JobRun,
        stage: &str,
        stage_error: &StageError,
    ) -> Result<Incident> {
        let now = self.clock.now();
        let message = stage_error.to_string();
        let matched = self.matcher.match_message(&message).await?;

        let existing = self.repos.incidents.find_open_for(upload.id, stage).await?;

        let (mut incident, is_new) = match existing {
            None => {
                let mut incident =
                    Incident::open(upload.id, Some(run.id), stage, message.clone(), now);
                incident.severity = stage_error.severity();
                incident.category = stage_error.category();
                if let Some(known) = &matched {
                    incident.classify(known);
                }
                incident.record(TimelineEvent::new(now, ENGINE_ACTOR, "created", message.clone()));
                (incident, true)
            }
            Some(mut incident) => {
                incident.job_run_id = Some(run.id);
                incident.error = message.clone();
                if !incident.is_known {
                    if let Some(known) = &matched {
                        incident.classify(known);
                    }
                }
                incident.record(TimelineEvent::new(now, ENGINE_ACTOR, "recurrence", message.clone()));
                (incident, false)
            }
        };

        // Decide the auto-retry before the atomic write so the counter and
        // the timeline event land with the failure record
        let retry_delay = self.plan_auto_retry(&mut incident, matched.is_some());

        self.repos
            .incidents
            .record_failure(run, &incident, is_new)
            .await?;

        if is_new {
            self.metrics.incidents_opened.fetch_add(1, Ordering::Relaxed);
            info!(
                "Incident opened: upload={}, stage={}, known={}",
                upload.id, stage, incident.is_known
            );
        }

        if let Some(delay) = retry_delay {
            self.enqueue_pipeline(upload.id, now + delay).await?;
            self.metrics.auto_retries_scheduled.fetch_add(1, Ordering::Relaxed);
            info!(
                "Auto-retry {} of {} scheduled for upload {} in {}s",
                incident.auto_retry_count,
                incident.max_auto_retries,
                upload.id,
                delay.num_seconds()
            );
        }

        Ok(incident)
    }

    fn plan_auto_retry(&self, incident: &mut Incident, matched: bool) -> Option<Duration> {
        if !matched || !incident.can_auto_retry() {
            return None;
        }

        incident.auto_retry_count += 1;
        let delay = KnownErrorMatcher::retry_backoff(incident.auto_retry_count);
        incident.record(TimelineEvent::new(
            self.clock.now(),
            ENGINE_ACTOR,
            "auto_retry_scheduled",
            format!(
                "attempt {} of {}, backoff {}s",
                incident.auto_retry_count,
                incident.max_auto_retries,
                delay.num_seconds()
            ),
        ));

        Some(delay)
    }

    /// Auto-resolve engine-raised incidents for an upload after a
    /// successful publish, preserving the full failure record for audit
    pub async fn auto_resolve_for_upload(&self, upload_id: Uuid, run_id: Uuid) -> Result<()> {
        let now = self.clock.now();

        for mut incident in self.repos.incidents.list_active_for_upload(upload_id).await? {
            if incident.detection_source != DetectionSource::Engine {
                continue;
            }
            if matches!(incident.state, IncidentState::Resolved) {
                continue;
            }

            incident.state = IncidentState::Resolved;
            incident.resolved_at = Some(now);
            incident.resolution_report =
                format!("auto-resolved: pipeline run {} published the upload", run_id);
            incident.record(TimelineEvent::new(
                now,
                ENGINE_ACTOR,
                "auto_resolved",
                format!("run {}", run_id),
            ));
            self.repos.incidents.update(&incident).await?;
            self.metrics.incidents_auto_resolved.fetch_add(1, Ordering::Relaxed);

            info!("Incident {} auto-resolved after successful retry", incident.id);
        }

        Ok(())
    }

    /// Assign the incident; the first assignment moves open to in_progress
    pub async fn assign(&self, incident_id: Uuid, assignee: &str, actor: &str) -> Result<Incident> {
        let mut incident = self.load_active(incident_id).await?;
        let now = self.clock.now();

        if incident.state == IncidentState::Open {
            incident.state = IncidentState::InProgress;
        }
        incident.assignee = Some(assignee.to_string());
        incident.record(TimelineEvent::new(now, actor, "assigned", assignee));

        self.repos.incidents.update(&incident).await?;
        Ok(incident)
    }

    /// Record analysis fields
    pub async fn analyze(
        &self,
        incident_id: Uuid,
        severity: Severity,
        impact_summary: &str,
        analysis_notes: &str,
        actor: &str,
    ) -> Result<Incident> {
        let mut incident = self.load_active(incident_id).await?;
        let now = self.clock.now();

        incident.severity = severity;
        incident.impact_summary = impact_summary.to_string();
        incident.analysis_notes = analysis_notes.to_string();
        incident.record(TimelineEvent::new(now, actor, "analysis_recorded", impact_summary));

        self.repos.incidents.update(&incident).await?;
        Ok(incident)
    }

    /// Resolve the incident; fails from archived, idempotent from resolved
    pub async fn resolve(
        &self,
        incident_id: Uuid,
        root_cause: &str,
        corrective_action: &str,
        resolution_report: &str,
        actor: &str,
    ) -> Result<Incident> {
        let mut incident = self.load_active(incident_id).await?;
        let now = self.clock.now();

        incident.state = IncidentState::Resolved;
        incident.root_cause = root_cause.to_string();
        incident.corrective_action = corrective_action.to_string();
        incident.resolution_report = resolution_report.to_string();
        if incident.resolved_at.is_none() {
            incident.resolved_at = Some(now);
        }
        incident.record(TimelineEvent::new(now, actor, "resolved", resolution_report));

        self.repos.incidents.update(&incident).await?;
        Ok(incident)
    }

    /// Re-enqueue the pipeline for the incident's upload; permitted in any
    /// non-archived state
    pub async fn retry(&self, incident_id: Uuid, notes: &str, actor: &str) -> Result<Incident> {
        let mut incident = self.load_active(incident_id).await?;
        let now = self.clock.now();

        incident.record(TimelineEvent::new(now, actor, "manual_retry", notes));
        self.repos.incidents.update(&incident).await?;

        // A retried upload leaves failed; the executor flips it to
        // processing when the run starts
        if let Some(mut upload) = self.repos.uploads.find_by_id(incident.upload_id).await? {
            if upload.status == crate::models::UploadStatus::Failed {
                upload.status = crate::models::UploadStatus::Pending;
                upload.clear_reports();
                self.repos.uploads.update(&upload).await?;
            }
        }

        self.enqueue_pipeline(incident.upload_id, now).await?;

        Ok(incident)
    }

    /// Archive the incident; only valid from resolved, no-op when already
    /// archived
    pub async fn archive(&self, incident_id: Uuid, actor: &str) -> Result<Incident> {
        let mut incident = self
            .repos
            .incidents
            .find_by_id(incident_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("incident {}", incident_id)))?;

        if incident.state == IncidentState::Archived {
            return Ok(incident);
        }
        if incident.state != IncidentState::Resolved {
            return Err(Error::validation(format!(
                "cannot archive incident in state {}",
                incident.state
            )));
        }

        let now = self.clock.now();
        incident.state = IncidentState::Archived;
        incident.archived_at = Some(now);
        incident.record(TimelineEvent::new(now, actor, "archived", ""));

        self.repos.incidents.update(&incident).await?;
        Ok(incident)
    }

    async fn load_active(&self, incident_id: Uuid) -> Result<Incident> {
        let incident = self
            .repos
            .incidents
            .find_by_id(incident_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("incident {}", incident_id)))?;

        if incident.state == IncidentState::Archived {
            return Err(Error::validation("incident is archived".to_string()));
        }

        Ok(incident)
    }

    /// Enqueue a pipeline execution for the upload, immediately or delayed
    async fn enqueue_pipeline(
        &self,
        upload_id: Uuid,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let job = match self.repos.jobs.find_by_name(PIPELINE_CALLABLE).await? {
            Some(job) => job,
            None => {
                warn!("No '{}' job defined; retry not enqueued", PIPELINE_CALLABLE);
                return Ok(());
            }
        };

        let now = self.clock.now();
        let entry = QueueEntry::new(
            job.id,
            vec![json!(upload_id.to_string())],
            serde_json::Map::new(),
            now,
        );

        if at <= now {
            self.queue.enqueue(&entry).await?;
        } else {
            self.queue.enqueue_at(entry, at).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryStore;
    use crate::models::{
        IncidentCategory, JobDefinition, JobRunStatus, KnownError, ProcessMode, UploadStatus,
        EXIT_FAILURE,
    };
    use chrono::{TimeZone, Utc};

    struct Fixture {
        writer: IncidentWriter,
        repos: Repositories,
        queue: WorkQueue,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let repos = Repositories::in_memory();
        let kv: Arc<dyn crate::kv::KvStore> = Arc::new(MemoryStore::new());
        let queue = WorkQueue::new(kv, "test");
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let writer = IncidentWriter::new(
            repos.clone(),
            queue.clone(),
            Arc::new(EngineMetrics::new()),
            clock.clone(),
        );

        // The pipeline job used for retries
        let job = JobDefinition::new(PIPELINE_CALLABLE, "pipeline", PIPELINE_CALLABLE, clock.now());
        repos.jobs.create(&job).await.unwrap();

        Fixture {
            writer,
            repos,
            queue,
            clock,
        }
    }

    async fn failed_run(f: &Fixture, upload: &Upload) -> JobRun {
        let mut run = JobRun::new(Uuid::new_v4(), f.clock.now()).for_upload(upload.id);
        f.repos.job_runs.create(&run).await.unwrap();
        run.finalize(JobRunStatus::Failed, EXIT_FAILURE, f.clock.now());
        run
    }

    #[tokio::test]
    async fn test_first_failure_opens_incident() {
        let f = fixture().await;
        let upload = Upload::new("a.pdf", "registrar", ProcessMode::Transform, f.clock.now());
        f.repos.uploads.create(&upload).await.unwrap();
        let run = failed_run(&f, &upload).await;

        let incident = f
            .writer
            .record_pipeline_failure(&upload, &run, "standardize", &StageError::NoTableInPdf)
            .await
            .unwrap();

        assert_eq!(incident.state, IncidentState::Open);
        assert_eq!(incident.category, IncidentCategory::Ingest);
        assert!(!incident.is_known);
        assert_eq!(incident.timeline.0[0].event, "created");
    }

    #[tokio::test]
    async fn test_recurrence_updates_same_incident() {
        let f = fixture().await;
        let upload = Upload::new("a.pdf", "registrar", ProcessMode::Transform, f.clock.now());
        f.repos.uploads.create(&upload).await.unwrap();

        let run1 = failed_run(&f, &upload).await;
        let first = f
            .writer
            .record_pipeline_failure(&upload, &run1, "standardize", &StageError::NoTableInPdf)
            .await
            .unwrap();

        let run2 = failed_run(&f, &upload).await;
        let second = f
            .writer
            .record_pipeline_failure(&upload, &run2, "standardize", &StageError::NoTableInPdf)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.timeline.0.iter().any(|e| e.event == "recurrence"));

        // Still exactly one open incident for the pair
        let open = f
            .repos
            .incidents
            .find_open_for(upload.id, "standardize")
            .await
            .unwrap();
        assert_eq!(open.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_known_error_schedules_auto_retry() {
        let f = fixture().await;
        let known = KnownError::new(
            "pdf_no_table",
            "No table found in PDF",
            crate::models::Severity::Medium,
            IncidentCategory::Ingest,
            f.clock.now(),
        )
        .with_auto_retry(2);
        f.repos.known_errors.create(&known).await.unwrap();

        let upload = Upload::new("a.pdf", "registrar", ProcessMode::Transform, f.clock.now());
        f.repos.uploads.create(&upload).await.unwrap();
        let run = failed_run(&f, &upload).await;

        let incident = f
            .writer
            .record_pipeline_failure(&upload, &run, "standardize", &StageError::NoTableInPdf)
            .await
            .unwrap();

        assert!(incident.is_known);
        assert_eq!(incident.auto_retry_count, 1);
        assert!(incident.timeline.0.iter().any(|e| e.event == "auto_retry_scheduled"));

        // The retry is in the delayed set; promote after the 30s backoff
        assert_eq!(
            f.queue.promote(f.clock.now() + Duration::seconds(31)).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_auto_retry_stops_at_bound() {
        let f = fixture().await;
        let known = KnownError::new(
            "pdf_no_table",
            "No table found",
            crate::models::Severity::Medium,
            IncidentCategory::Ingest,
            f.clock.now(),
        )
        .with_auto_retry(1);
        f.repos.known_errors.create(&known).await.unwrap();

        let upload = Upload::new("a.pdf", "registrar", ProcessMode::Transform, f.clock.now());
        f.repos.uploads.create(&upload).await.unwrap();

        let run1 = failed_run(&f, &upload).await;
        let first = f
            .writer
            .record_pipeline_failure(&upload, &run1, "standardize", &StageError::NoTableInPdf)
            .await
            .unwrap();
        assert_eq!(first.auto_retry_count, 1);

        let run2 = failed_run(&f, &upload).await;
        let second = f
            .writer
            .record_pipeline_failure(&upload, &run2, "standardize", &StageError::NoTableInPdf)
            .await
            .unwrap();

        // Counter stays at the bound and no second retry is scheduled
        assert_eq!(second.auto_retry_count, 1);
        assert_eq!(
            second
                .timeline
                .0
                .iter()
                .filter(|e| e.event == "auto_retry_scheduled")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_auto_resolve_after_publish() {
        let f = fixture().await;
        let upload = Upload::new("a.pdf", "registrar", ProcessMode::Transform, f.clock.now());
        f.repos.uploads.create(&upload).await.unwrap();
        let run = failed_run(&f, &upload).await;

        let incident = f
            .writer
            .record_pipeline_failure(&upload, &run, "standardize", &StageError::NoTableInPdf)
            .await
            .unwrap();

        f.writer
            .auto_resolve_for_upload(upload.id, Uuid::new_v4())
            .await
            .unwrap();

        let resolved = f.repos.incidents.find_by_id(incident.id).await.unwrap().unwrap();
        assert_eq!(resolved.state, IncidentState::Resolved);
        assert!(resolved.resolved_at.is_some());
        assert!(resolved.timeline.0.iter().any(|e| e.event == "auto_resolved"));
        // Full failure record preserved
        assert!(resolved.timeline.0.iter().any(|e| e.event == "created"));
    }

    #[tokio::test]
    async fn test_manual_workflow() {
        let f = fixture().await;
        let upload = Upload::new("a.csv", "registrar", ProcessMode::Transform, f.clock.now());
        f.repos.uploads.create(&upload).await.unwrap();
        let run = failed_run(&f, &upload).await;

        let incident = f
            .writer
            .record_pipeline_failure(
                &upload,
                &run,
                "validate",
                &StageError::MissingColumn("score".into()),
            )
            .await
            .unwrap();

        // Assign: open becomes in_progress
        let incident = f.writer.assign(incident.id, "dana", "ops").await.unwrap();
        assert_eq!(incident.state, IncidentState::InProgress);
        assert_eq!(incident.assignee.as_deref(), Some("dana"));

        // Analyze
        let incident = f
            .writer
            .analyze(
                incident.id,
                crate::models::Severity::High,
                "blocks monthly close",
                "column renamed upstream",
                "dana",
            )
            .await
            .unwrap();
        assert_eq!(incident.severity, crate::models::Severity::High);

        // Resolve
        let incident = f
            .writer
            .resolve(incident.id, "upstream rename", "map old name", "fixed mapping", "dana")
            .await
            .unwrap();
        assert_eq!(incident.state, IncidentState::Resolved);
        assert!(incident.resolved_at.is_some());

        // Archive only from resolved
        let incident = f.writer.archive(incident.id, "dana").await.unwrap();
        assert_eq!(incident.state, IncidentState::Archived);

        // Actions on archived incidents fail
        assert!(f.writer.resolve(incident.id, "", "", "", "dana").await.is_err());
        assert!(f.writer.retry(incident.id, "", "dana").await.is_err());

        // Archiving again is a no-op
        assert!(f.writer.archive(incident.id, "dana").await.is_ok());

        // Timeline is ordered and complete
        let events: Vec<&str> = incident.timeline.0.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            events,
            vec!["created", "assigned", "analysis_recorded", "resolved", "archived"]
        );
    }

    #[tokio::test]
    async fn test_archive_requires_resolved() {
        let f = fixture().await;
        let upload = Upload::new("a.csv", "registrar", ProcessMode::Transform, f.clock.now());
        f.repos.uploads.create(&upload).await.unwrap();
        let run = failed_run(&f, &upload).await;

        let incident = f
            .writer
            .record_pipeline_failure(
                &upload,
                &run,
                "validate",
                &StageError::MissingColumn("x".into()),
            )
            .await
            .unwrap();

        assert!(f.writer.archive(incident.id, "ops").await.is_err());
    }

    #[tokio::test]
    async fn test_manual_retry_reenqueues_and_resets_upload() {
        let f = fixture().await;
        let mut upload = Upload::new("a.csv", "registrar", ProcessMode::Transform, f.clock.now());
        upload.status = UploadStatus::Failed;
        f.repos.uploads.create(&upload).await.unwrap();
        let run = failed_run(&f, &upload).await;

        let incident = f
            .writer
            .record_pipeline_failure(
                &upload,
                &run,
                "validate",
                &StageError::MissingColumn("x".into()),
            )
            .await
            .unwrap();

        f.writer.retry(incident.id, "re-running after fix", "ops").await.unwrap();

        let upload = f.repos.uploads.find_by_id(upload.id).await.unwrap().unwrap();
        assert_eq!(upload.status, UploadStatus::Pending);
        assert_eq!(f.queue.ready_len().await.unwrap(), 1);
    }
}
