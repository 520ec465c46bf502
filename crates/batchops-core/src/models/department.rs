use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from a department feed. Read-only to the engine; ingest generators
/// turn batches of these into fresh uploads.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DepartmentRecord {
    pub id: Uuid,
    /// Feed identifier, e.g. "registrar" or "finance"
    pub source: String,
    /// Map of column name to cell value
    pub payload: Json<serde_json::Map<String, serde_json::Value>>,
    pub recorded_at: DateTime<Utc>,
}

impl DepartmentRecord {
    pub fn new(
        source: impl Into<String>,
        payload: serde_json::Map<String, serde_json::Value>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            payload: Json(payload),
            recorded_at,
        }
    }
}
