use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// A runnable definition: a callable plus stored arguments, optionally on
/// a cron schedule. A definition with no schedule is manual-trigger-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobDefinition {
    pub id: Uuid,
    pub name: String,
    pub job_type: String,
    pub config: Json<JobCallableConfig>,
    pub schedule_cron: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The callable binding stored on a job definition
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobCallableConfig {
    /// Symbolic callable identifier, `namespace.function`
    pub callable: String,

    /// Positional arguments
    #[serde(default)]
    pub args: Vec<serde_json::Value>,

    /// Keyword arguments
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl JobDefinition {
    /// Create a new job definition
    pub fn new(
        name: impl Into<String>,
        job_type: impl Into<String>,
        callable: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            job_type: job_type.into(),
            config: Json(JobCallableConfig {
                callable: callable.into(),
                args: Vec::new(),
                kwargs: serde_json::Map::new(),
            }),
            schedule_cron: None,
            created_at,
        }
    }

    /// Attach a cron schedule
    pub fn with_schedule(mut self, cron: impl Into<String>) -> Self {
        self.schedule_cron = Some(cron.into());
        self
    }

    /// Attach stored positional arguments
    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.config.0.args = args;
        self
    }

    /// Attach stored keyword arguments
    pub fn with_kwargs(mut self, kwargs: serde_json::Map<String, serde_json::Value>) -> Self {
        self.config.0.kwargs = kwargs;
        self
    }

    /// Whether the job fires on a schedule
    pub fn is_scheduled(&self) -> bool {
        self.schedule_cron.is_some()
    }
}

/// Execution status of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_run_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    /// Claimed, callable not yet invoked
    Queued,

    /// Callable executing
    Running,

    /// Finished cleanly
    Success,

    /// Finished with a failure
    Failed,

    /// A stage hit a transient error; backoff pending before re-attempt
    Retrying,
}

impl std::fmt::Display for JobRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobRunStatus::Queued => write!(f, "queued"),
            JobRunStatus::Running => write!(f, "running"),
            JobRunStatus::Success => write!(f, "success"),
            JobRunStatus::Failed => write!(f, "failed"),
            JobRunStatus::Retrying => write!(f, "retrying"),
        }
    }
}

impl JobRunStatus {
    /// Check if the run reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobRunStatus::Success | JobRunStatus::Failed)
    }
}

/// One execution of a callable, with append-only step telemetry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub upload_id: Option<Uuid>,
    pub status: JobRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub details: Json<Vec<StepRecord>>,
    pub logs: String,
}

/// Exit code for a clean run
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for an execution failure
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for an unresolvable callable (operator error, never retried)
pub const EXIT_UNRESOLVED: i32 = 2;

impl JobRun {
    /// Create a run at claim time
    pub fn new(job_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            upload_id: None,
            status: JobRunStatus::Queued,
            started_at,
            finished_at: None,
            duration_ms: None,
            exit_code: None,
            details: Json(Vec::new()),
            logs: String::new(),
        }
    }

    /// Bind the run to an upload
    pub fn for_upload(mut self, upload_id: Uuid) -> Self {
        self.upload_id = Some(upload_id);
        self
    }

    /// Mark the callable as executing
    pub fn mark_running(&mut self) {
        self.status = JobRunStatus::Running;
    }

    /// Finalise the run
    pub fn finalize(&mut self, status: JobRunStatus, exit_code: i32, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.exit_code = Some(exit_code);
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
    }

    /// Append a log line
    pub fn log(&mut self, line: impl AsRef<str>) {
        if !self.logs.is_empty() {
            self.logs.push('\n');
        }
        self.logs.push_str(line.as_ref());
    }

    /// Append a step record; steps are append-only within a run
    pub fn push_step(&mut self, step: StepRecord) {
        self.details.0.push(step);
    }

    /// Mutable access to the most recent step
    pub fn last_step_mut(&mut self) -> Option<&mut StepRecord> {
        self.details.0.last_mut()
    }

    /// Step record by name, most recent first
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.details.0.iter().rev().find(|s| s.name == name)
    }
}

/// Status of an individual pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Telemetry for one pipeline step, embedded in JobRun.details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub logs: String,
}

impl StepRecord {
    /// Create a running step record
    pub fn running(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Running,
            started_at: now,
            finished_at: None,
            logs: String::new(),
        }
    }

    /// Mark the step successful
    pub fn succeed(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Success;
        self.finished_at = Some(now);
    }

    /// Mark the step failed with a message
    pub fn fail(&mut self, now: DateTime<Utc>, message: impl AsRef<str>) {
        self.status = StepStatus::Failed;
        self.finished_at = Some(now);
        self.append_log(message);
    }

    /// Append a log line to the step
    pub fn append_log(&mut self, line: impl AsRef<str>) {
        if !self.logs.is_empty() {
            self.logs.push('\n');
        }
        self.logs.push_str(line.as_ref());
    }
}
