//! Repository traits for database abstraction
//!
//! The database is the source of truth for uploads, jobs, runs and
//! incidents. The engine only sees these small traits, so the pipeline
//! and incident code run unchanged against Postgres or the in-memory
//! fakes used by the test suite.

pub mod memory;
pub mod postgres;

pub use memory::MemoryDb;
pub use postgres::PostgresDb;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    DepartmentRecord, Incident, JobDefinition, JobRun, KnownError, Upload,
};
use crate::Result;

/// Upload repository: the pipeline reads the source fields and writes
/// status and report artifacts
#[async_trait]
pub trait UploadRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Upload>>;

    async fn create(&self, upload: &Upload) -> Result<()>;

    async fn update(&self, upload: &Upload) -> Result<()>;
}

/// Job definition repository
#[async_trait]
pub trait JobRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<JobDefinition>>;

    async fn find_by_name(&self, name: &str) -> Result<Option<JobDefinition>>;

    async fn list(&self) -> Result<Vec<JobDefinition>>;

    async fn create(&self, job: &JobDefinition) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// Job run repository: full lifecycle, runs are never deleted
#[async_trait]
pub trait JobRunRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<JobRun>>;

    async fn create(&self, run: &JobRun) -> Result<()>;

    async fn update(&self, run: &JobRun) -> Result<()>;

    /// Most recent run for an upload, excluding the given run; drives
    /// resume-from-last-successful-step
    async fn latest_for_upload(&self, upload_id: Uuid, exclude: Uuid) -> Result<Option<JobRun>>;

    /// Run history for a job, most recent first
    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<JobRun>>;
}

/// Incident repository
#[async_trait]
pub trait IncidentRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Incident>>;

    /// The open (or in-progress) incident for an (upload, stage) pair;
    /// at most one exists
    async fn find_open_for(&self, upload_id: Uuid, stage: &str) -> Result<Option<Incident>>;

    /// Non-archived incidents for an upload
    async fn list_active_for_upload(&self, upload_id: Uuid) -> Result<Vec<Incident>>;

    async fn update(&self, incident: &Incident) -> Result<()>;

    /// Persist the finalized failed run and the created-or-updated
    /// incident atomically. The only cross-entity transaction in the
    /// engine.
    async fn record_failure(&self, run: &JobRun, incident: &Incident, is_new: bool) -> Result<()>;
}

/// Known-error library, read-only to the engine
#[async_trait]
pub trait KnownErrorRepo: Send + Sync {
    /// All known errors, ascending by creation time then id; the matcher
    /// picks the first match in this order
    async fn list_ordered(&self) -> Result<Vec<KnownError>>;

    async fn create(&self, known: &KnownError) -> Result<()>;
}

/// Department feed rows, read-only to the engine
#[async_trait]
pub trait DepartmentRecordRepo: Send + Sync {
    /// Records, optionally filtered by source, ascending by recorded_at
    async fn list(&self, source: Option<&str>) -> Result<Vec<DepartmentRecord>>;

    async fn create(&self, record: &DepartmentRecord) -> Result<()>;
}

/// Repository container holding all repositories
#[derive(Clone)]
pub struct Repositories {
    pub uploads: Arc<dyn UploadRepo>,
    pub jobs: Arc<dyn JobRepo>,
    pub job_runs: Arc<dyn JobRunRepo>,
    pub incidents: Arc<dyn IncidentRepo>,
    pub known_errors: Arc<dyn KnownErrorRepo>,
    pub department_records: Arc<dyn DepartmentRecordRepo>,
}

impl Repositories {
    /// In-memory repositories for tests and local development
    pub fn in_memory() -> Self {
        let db = MemoryDb::new();
        Self {
            uploads: Arc::new(db.clone()),
            jobs: Arc::new(db.clone()),
            job_runs: Arc::new(db.clone()),
            incidents: Arc::new(db.clone()),
            known_errors: Arc::new(db.clone()),
            department_records: Arc::new(db),
        }
    }

    /// Postgres-backed repositories
    pub fn postgres(db: PostgresDb) -> Self {
        Self {
            uploads: Arc::new(db.clone()),
            jobs: Arc::new(db.clone()),
            job_runs: Arc::new(db.clone()),
            incidents: Arc::new(db.clone()),
            known_errors: Arc::new(db.clone()),
            department_records: Arc::new(db),
        }
    }
}
