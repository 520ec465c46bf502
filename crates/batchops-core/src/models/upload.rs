use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Upload lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "upload_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Received, not yet picked up by the pipeline
    Pending,

    /// A pipeline run is in flight
    Processing,

    /// Reports generated and stored
    Published,

    /// Last pipeline run failed
    Failed,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Pending => write!(f, "pending"),
            UploadStatus::Processing => write!(f, "processing"),
            UploadStatus::Published => write!(f, "published"),
            UploadStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Operator-selected transform behavior for an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "process_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Clean cells, coerce numerics, publish the canonical summary
    Transform,

    /// Append rows from process_config.records
    Append,

    /// Delete rows matching process_config rules
    Delete,

    /// No automatic mutation; operator notes only
    Custom,
}

impl std::fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessMode::Transform => write!(f, "transform"),
            ProcessMode::Append => write!(f, "append"),
            ProcessMode::Delete => write!(f, "delete"),
            ProcessMode::Custom => write!(f, "custom"),
        }
    }
}

/// A departmental data file moving through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Upload {
    pub id: Uuid,
    pub filename: String,
    pub department: String,
    pub received_at: DateTime<Utc>,
    pub status: UploadStatus,
    pub process_mode: ProcessMode,
    pub process_config: Json<serde_json::Value>,
    pub report_csv: Option<String>,
    pub report_pdf: Option<Vec<u8>>,
    pub report_generated_at: Option<DateTime<Utc>>,
}

impl Upload {
    /// Create a new pending upload
    pub fn new(
        filename: impl Into<String>,
        department: impl Into<String>,
        process_mode: ProcessMode,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            department: department.into(),
            received_at,
            status: UploadStatus::Pending,
            process_mode,
            process_config: Json(serde_json::Value::Null),
            report_csv: None,
            report_pdf: None,
            report_generated_at: None,
        }
    }

    /// Attach a process configuration payload
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.process_config = Json(config);
        self
    }

    /// Whether both report artifacts are present
    pub fn has_reports(&self) -> bool {
        self.report_csv.is_some() && self.report_pdf.is_some()
    }

    /// Whether the upload is fully published (status + artifacts)
    pub fn is_published(&self) -> bool {
        self.status == UploadStatus::Published && self.has_reports()
    }

    /// Clear report artifacts. Required whenever status leaves Published so
    /// a stale report can never be served for a failed upload.
    pub fn clear_reports(&mut self) {
        self.report_csv = None;
        self.report_pdf = None;
        self.report_generated_at = None;
    }

    /// File extension of the source file, lowercased
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

impl super::Entity for Upload {
    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
