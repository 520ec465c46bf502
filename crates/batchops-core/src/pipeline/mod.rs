//! Staged pipeline executor
//!
//! Drives one upload through standardize, validate, transform, summarize
//! and publish in strict order, recording each stage as an append-only step on
//! the owning JobRun. Failures finalise the run and hand off to the
//! incident engine; successful publishes set the upload's report fields.
//!
//! The executor is idempotent per (upload, stage): it is driven entirely
//! by the upload's status and the step telemetry of the most recent prior
//! run, so queue re-delivery after a crash resumes instead of repeating.

pub mod publish;
pub mod report;
pub mod standardize;
pub mod summarize;
pub mod table;
pub mod transform;
pub mod validate;

pub use table::DataTable;

use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::EngineDeps;
use crate::models::{
    IncidentCategory, JobRun, JobRunStatus, Severity, StepRecord, StepStatus, Upload,
    UploadStatus, EXIT_FAILURE, EXIT_SUCCESS,
};
use crate::{Error, Result};

/// The fixed stage order
pub const STAGES: [Stage; 5] = [
    Stage::Standardize,
    Stage::Validate,
    Stage::Transform,
    Stage::Summarize,
    Stage::Publish,
];

/// One pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Standardize,
    Validate,
    Transform,
    Summarize,
    Publish,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Standardize => "standardize",
            Stage::Validate => "validate",
            Stage::Transform => "transform",
            Stage::Summarize => "summarize",
            Stage::Publish => "publish",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Stage failure kinds; the incident category and retry behavior hang off
/// these
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("No table found in PDF pages")]
    NoTableInPdf,

    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("empty critical field '{field}' at row {row}")]
    EmptyCriticalField { field: String, row: usize },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("invalid plan payload: {0}")]
    InvalidPlan(String),

    #[error("stage timed out after {0}s")]
    Timeout(u64),

    #[error("io: {0}")]
    Io(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl StageError {
    /// Transient errors retry locally inside the stage; everything else
    /// finalises the run
    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::Io(_))
    }

    /// Incident category per the error taxonomy
    pub fn category(&self) -> IncidentCategory {
        match self {
            StageError::UnsupportedFormat(_) | StageError::Parse(_) | StageError::NoTableInPdf => {
                IncidentCategory::Ingest
            }
            StageError::MissingColumn(_)
            | StageError::EmptyCriticalField { .. }
            | StageError::SchemaMismatch(_) => IncidentCategory::Validation,
            StageError::InvalidPlan(_) => IncidentCategory::Transform,
            StageError::Timeout(_) | StageError::Internal(_) => IncidentCategory::Runtime,
            StageError::Io(_) => IncidentCategory::Runtime,
        }
    }

    /// Default severity when no known error overrides it
    pub fn severity(&self) -> Severity {
        match self {
            StageError::Internal(_) => Severity::High,
            _ => Severity::Medium,
        }
    }
}

/// Stage result type alias
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Outcome of a pipeline execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// All five stages succeeded; the upload is published
    Published,

    /// Nothing to do: the upload was already published with reports
    AlreadyPublished,

    /// A stage failed; the run is finalised and an incident recorded
    Failed { stage: &'static str },
}

/// The pipeline executor, registered as the `pipeline.process_upload`
/// callable
pub struct PipelineExecutor {
    deps: Arc<EngineDeps>,
}

impl PipelineExecutor {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self { deps }
    }

    /// Execute the pipeline for an upload, recording telemetry on the
    /// given run
    pub async fn execute(&self, upload_id: Uuid, run_id: Uuid) -> Result<PipelineOutcome> {
        let deps = &self.deps;

        let mut upload = deps
            .repos
            .uploads
            .find_by_id(upload_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("upload {}", upload_id)))?;

        let mut run = deps
            .repos
            .job_runs
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("job run {}", run_id)))?;

        run.upload_id = Some(upload.id);

        // Re-delivery of a finished upload is a no-op
        if upload.is_published() {
            info!("Upload {} already published, nothing to do", upload.id);
            run.log("upload already published, no-op");
            run.finalize(JobRunStatus::Success, EXIT_SUCCESS, deps.clock.now());
            deps.repos.job_runs.update(&run).await?;
            return Ok(PipelineOutcome::AlreadyPublished);
        }

        // Resume point: skip stages the most recent prior run completed,
        // unless this is a fresh (pending/failed) pass. Publish always
        // re-executes; its writes are overwrites.
        let resume_from = if upload.status == UploadStatus::Processing {
            self.completed_stage_count(&upload, run.id)
                .await?
                .min(STAGES.len() - 1)
        } else {
            0
        };

        // A fresh pass over a previously failed upload drops stale reports
        if upload.has_reports() {
            upload.clear_reports();
        }
        upload.status = UploadStatus::Processing;
        deps.repos.uploads.update(&upload).await?;
        deps.repos.job_runs.update(&run).await?;

        let mut skipped = Vec::new();
        for stage in STAGES.iter().take(resume_from) {
            let mut step = StepRecord::running(stage.name(), deps.clock.now());
            step.status = StepStatus::Skipped;
            step.finished_at = Some(deps.clock.now());
            step.append_log("completed by a previous run");
            skipped.push(step);
        }
        for step in skipped {
            run.push_step(step);
        }

        let mut state = ExecState {
            table: DataTable::default(),
            summary: None,
        };

        for (index, stage) in STAGES.iter().enumerate() {
            if index < resume_from {
                // Skipped stages still need their outputs for later
                // stages; recompute them without fresh telemetry
                match self.run_stage(*stage, &mut upload, &mut state, &mut run).await {
                    Ok(()) => continue,
                    Err(stage_error) => {
                        // A stage that succeeded before should not fail on
                        // recompute; treat it as a fresh failure
                        warn!(
                            "Stage {} failed on resume recompute for upload {}: {}",
                            stage, upload.id, stage_error
                        );
                        return self
                            .fail(&mut upload, &mut run, *stage, stage_error)
                            .await;
                    }
                }
            }

            let step = StepRecord::running(stage.name(), deps.clock.now());
            run.push_step(step);
            deps.repos.job_runs.update(&run).await?;

            info!("Upload {} stage {} running", upload.id, stage);

            match self.run_stage_with_retry(*stage, &mut upload, &mut state, &mut run).await {
                Ok(()) => {
                    let now = deps.clock.now();
                    if let Some(step) = run.last_step_mut() {
                        step.succeed(now);
                    }
                    deps.repos.job_runs.update(&run).await?;
                }
                Err(stage_error) => {
                    return self.fail(&mut upload, &mut run, *stage, stage_error).await;
                }
            }
        }

        run.finalize(JobRunStatus::Success, EXIT_SUCCESS, deps.clock.now());
        deps.repos.job_runs.update(&run).await?;
        deps.metrics.uploads_published.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        // A publish after auto-retry settles any active incidents
        deps.incidents.auto_resolve_for_upload(upload.id, run.id).await?;

        info!("Upload {} published", upload.id);

        Ok(PipelineOutcome::Published)
    }

    /// Number of leading stages the most recent prior run completed
    async fn completed_stage_count(&self, upload: &Upload, current_run: Uuid) -> Result<usize> {
        let prior = self
            .deps
            .repos
            .job_runs
            .latest_for_upload(upload.id, current_run)
            .await?;

        Ok(prior.map(|run| leading_successes(&run)).unwrap_or(0))
    }

    /// Run one stage with the per-stage soft timeout and bounded local
    /// retries for transient errors
    async fn run_stage_with_retry(
        &self,
        stage: Stage,
        upload: &mut Upload,
        state: &mut ExecState,
        run: &mut JobRun,
    ) -> StageResult<()> {
        let deps = self.deps.clone();
        let max_attempts = deps.config.transient_retry_attempts.max(1);
        let mut backoff = std::time::Duration::from_millis(deps.config.transient_backoff_ms);

        for attempt in 1..=max_attempts {
            let outcome = tokio::time::timeout(
                deps.config.stage_timeout(),
                self.run_stage(stage, upload, state, run),
            )
            .await;

            let stage_error = match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => e,
                Err(_) => StageError::Timeout(deps.config.stage_timeout_secs),
            };

            if stage_error.is_transient() && attempt < max_attempts {
                warn!(
                    "Transient error in stage {} (attempt {}/{}): {}",
                    stage, attempt, max_attempts, stage_error
                );
                if let Some(step) = run.last_step_mut() {
                    step.append_log(format!("transient error, retrying: {}", stage_error));
                }
                run.status = JobRunStatus::Retrying;
                let _ = deps.repos.job_runs.update(run).await;

                tokio::time::sleep(backoff).await;
                backoff *= 2;

                run.status = JobRunStatus::Running;
                continue;
            }

            return Err(stage_error);
        }

        unreachable!("retry loop returns before exhausting attempts")
    }

    /// Dispatch one stage
    async fn run_stage(
        &self,
        stage: Stage,
        upload: &mut Upload,
        state: &mut ExecState,
        run: &mut JobRun,
    ) -> StageResult<()> {
        let deps = &self.deps;
        match stage {
            Stage::Standardize => {
                state.table = standardize::run(upload, &deps.storage)?;
            }
            Stage::Validate => {
                validate::run(&state.table, &upload.process_config.0)?;
            }
            Stage::Transform => {
                let note = transform::run(&mut state.table, upload.process_mode, &upload.process_config.0)?;
                if let Some(note) = note {
                    if let Some(step) = run.last_step_mut() {
                        step.append_log(note);
                    }
                }
            }
            Stage::Summarize => {
                state.summary = Some(summarize::run(&state.table)?);
            }
            Stage::Publish => {
                let summary = state
                    .summary
                    .as_ref()
                    .ok_or_else(|| StageError::Internal("summary missing before publish".into()))?;
                publish::run(
                    upload,
                    &state.table,
                    summary,
                    &deps.storage,
                    deps.clock.now(),
                )?;
                deps.repos
                    .uploads
                    .update(upload)
                    .await
                    .map_err(|e| StageError::Io(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Finalise a failed run and hand off to the incident engine
    async fn fail(
        &self,
        upload: &mut Upload,
        run: &mut JobRun,
        stage: Stage,
        stage_error: StageError,
    ) -> Result<PipelineOutcome> {
        let deps = &self.deps;
        let now = deps.clock.now();
        let message = stage_error.to_string();

        error!("Upload {} stage {} failed: {}", upload.id, stage, message);
        deps.metrics.record_stage_failure(stage.name());

        if let Some(step) = run.last_step_mut() {
            if step.status == StepStatus::Running {
                step.fail(now, &message);
            }
        }
        run.log(format!("{} failed: {}", stage, message));
        run.finalize(JobRunStatus::Failed, EXIT_FAILURE, now);

        upload.status = UploadStatus::Failed;
        upload.clear_reports();
        deps.repos.uploads.update(upload).await?;

        // Run finalise + incident write are atomic; the incident engine
        // also schedules any known-error auto-retry
        deps.incidents
            .record_pipeline_failure(upload, run, stage.name(), &stage_error)
            .await?;

        Ok(PipelineOutcome::Failed { stage: stage.name() })
    }
}

struct ExecState {
    table: DataTable,
    summary: Option<summarize::TableSummary>,
}

/// Count of consecutive successful steps from the start of a run
fn leading_successes(run: &JobRun) -> usize {
    let mut count = 0;
    for stage in STAGES.iter() {
        let done = run
            .details
            .0
            .iter()
            .any(|s| s.name == stage.name() && s.status == StepStatus::Success);
        if done {
            count += 1;
        } else {
            break;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_stage_error_categories() {
        assert_eq!(StageError::NoTableInPdf.category(), IncidentCategory::Ingest);
        assert_eq!(
            StageError::MissingColumn("score".into()).category(),
            IncidentCategory::Validation
        );
        assert_eq!(
            StageError::InvalidPlan("records".into()).category(),
            IncidentCategory::Transform
        );
        assert_eq!(StageError::Timeout(600).category(), IncidentCategory::Runtime);
        assert_eq!(StageError::Internal("x".into()).severity(), Severity::High);
    }

    #[test]
    fn test_only_io_is_transient() {
        assert!(StageError::Io("disk".into()).is_transient());
        assert!(!StageError::Parse("bad".into()).is_transient());
        assert!(!StageError::Timeout(600).is_transient());
    }

    #[test]
    fn test_leading_successes() {
        let now = Utc::now();
        let mut run = JobRun::new(Uuid::new_v4(), now);

        let mut s1 = StepRecord::running("standardize", now);
        s1.succeed(now);
        run.push_step(s1);
        let mut s2 = StepRecord::running("validate", now);
        s2.succeed(now);
        run.push_step(s2);
        let mut s3 = StepRecord::running("transform", now);
        s3.fail(now, "boom");
        run.push_step(s3);

        assert_eq!(leading_successes(&run), 2);
    }

    #[test]
    fn test_exact_pdf_error_message() {
        // The known-error library matches on this exact text
        assert_eq!(StageError::NoTableInPdf.to_string(), "No table found in PDF pages");
    }
}
