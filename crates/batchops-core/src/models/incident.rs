use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Incident workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "incident_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    Open,
    InProgress,
    Resolved,
    Archived,
}

impl std::fmt::Display for IncidentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentState::Open => write!(f, "open"),
            IncidentState::InProgress => write!(f, "in_progress"),
            IncidentState::Resolved => write!(f, "resolved"),
            IncidentState::Archived => write!(f, "archived"),
        }
    }
}

impl IncidentState {
    /// Whether the incident still accepts retries and edits
    pub fn is_active(&self) -> bool {
        !matches!(self, IncidentState::Archived)
    }
}

/// Incident severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "severity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Failure category, mirrors the stage error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "incident_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IncidentCategory {
    Ingest,
    Validation,
    Transform,
    Runtime,
    Other,
}

impl Default for IncidentCategory {
    fn default() -> Self {
        IncidentCategory::Other
    }
}

impl std::fmt::Display for IncidentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentCategory::Ingest => write!(f, "ingest"),
            IncidentCategory::Validation => write!(f, "validation"),
            IncidentCategory::Transform => write!(f, "transform"),
            IncidentCategory::Runtime => write!(f, "runtime"),
            IncidentCategory::Other => write!(f, "other"),
        }
    }
}

/// How the incident was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "detection_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    /// Raised by the pipeline executor
    Engine,

    /// Raised by an operator
    Manual,
}

/// An auditable entry in the incident timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub event: String,
    #[serde(default)]
    pub notes: String,
}

impl TimelineEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        actor: impl Into<String>,
        event: impl Into<String>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            actor: actor.into(),
            event: event.into(),
            notes: notes.into(),
        }
    }
}

/// Actor name recorded for engine-originated timeline events
pub const ENGINE_ACTOR: &str = "engine";

/// A regex-plus-metadata rule for classifying failures
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct KnownError {
    pub id: Uuid,
    pub name: String,
    /// Regex evaluated against the raw failure message
    pub pattern: String,
    pub severity: Severity,
    pub category: IncidentCategory,
    pub corrective_action: String,
    pub root_cause: String,
    pub auto_retry: bool,
    pub max_auto_retries: i32,
    pub created_at: DateTime<Utc>,
}

impl KnownError {
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        severity: Severity,
        category: IncidentCategory,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            pattern: pattern.into(),
            severity,
            category,
            corrective_action: String::new(),
            root_cause: String::new(),
            auto_retry: false,
            max_auto_retries: 0,
            created_at,
        }
    }

    /// Enable bounded auto-retry for matches
    pub fn with_auto_retry(mut self, max_auto_retries: i32) -> Self {
        self.auto_retry = true;
        self.max_auto_retries = max_auto_retries;
        self
    }

    /// Attach suggested remediation text
    pub fn with_remediation(
        mut self,
        root_cause: impl Into<String>,
        corrective_action: impl Into<String>,
    ) -> Self {
        self.root_cause = root_cause.into();
        self.corrective_action = corrective_action.into();
        self
    }
}

/// A durable record of a pipeline failure with workflow state, timeline and
/// retry accounting
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Incident {
    pub id: Uuid,
    pub upload_id: Uuid,
    pub job_run_id: Option<Uuid>,
    pub state: IncidentState,
    pub severity: Severity,
    pub category: IncidentCategory,
    /// Name of the pipeline stage that failed
    pub failing_stage: String,
    pub error: String,
    pub root_cause: String,
    pub corrective_action: String,
    pub impact_summary: String,
    pub analysis_notes: String,
    pub resolution_report: String,
    pub known_error_id: Option<Uuid>,
    pub is_known: bool,
    pub auto_retry_count: i32,
    pub max_auto_retries: i32,
    pub detection_source: DetectionSource,
    pub assignee: Option<String>,
    pub timeline: Json<Vec<TimelineEvent>>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Create an open incident for a failing (upload, stage) pair
    pub fn open(
        upload_id: Uuid,
        job_run_id: Option<Uuid>,
        failing_stage: impl Into<String>,
        error: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            upload_id,
            job_run_id,
            state: IncidentState::Open,
            severity: Severity::default(),
            category: IncidentCategory::default(),
            failing_stage: failing_stage.into(),
            error: error.into(),
            root_cause: String::new(),
            corrective_action: String::new(),
            impact_summary: String::new(),
            analysis_notes: String::new(),
            resolution_report: String::new(),
            known_error_id: None,
            is_known: false,
            auto_retry_count: 0,
            max_auto_retries: 0,
            detection_source: DetectionSource::Engine,
            assignee: None,
            timeline: Json(Vec::new()),
            created_at,
            resolved_at: None,
            archived_at: None,
        }
    }

    /// Populate classification fields from a known-error match
    pub fn classify(&mut self, known: &KnownError) {
        self.severity = known.severity;
        self.category = known.category;
        self.root_cause = known.root_cause.clone();
        self.corrective_action = known.corrective_action.clone();
        self.known_error_id = Some(known.id);
        self.is_known = true;
        self.max_auto_retries = known.max_auto_retries;
    }

    /// Append a timeline event; the timeline is append-only
    pub fn record(&mut self, event: TimelineEvent) {
        self.timeline.0.push(event);
    }

    /// Whether another auto-retry is permitted
    pub fn can_auto_retry(&self) -> bool {
        self.is_known && self.auto_retry_count < self.max_auto_retries
    }
}

impl super::Entity for Incident {
    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
