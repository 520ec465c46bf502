//! In-memory repositories
//!
//! One shared table set under a single mutex; each repository trait is
//! implemented on a clone of the handle. `record_failure` mutates the run
//! and incident tables in one locked section, matching the transactional
//! guarantee of the Postgres backend.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{
    DepartmentRecordRepo, IncidentRepo, JobRepo, JobRunRepo, KnownErrorRepo, UploadRepo,
};
use crate::models::{
    DepartmentRecord, Incident, IncidentState, JobDefinition, JobRun, KnownError, Upload,
};
use crate::{Error, Result};

#[derive(Default)]
struct Tables {
    uploads: Vec<Upload>,
    jobs: Vec<JobDefinition>,
    job_runs: Vec<JobRun>,
    incidents: Vec<Incident>,
    known_errors: Vec<KnownError>,
    department_records: Vec<DepartmentRecord>,
}

/// In-memory database handle
#[derive(Clone, Default)]
pub struct MemoryDb {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UploadRepo for MemoryDb {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Upload>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.uploads.iter().find(|u| u.id == id).cloned())
    }

    async fn create(&self, upload: &Upload) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if tables.uploads.iter().any(|u| u.id == upload.id) {
            return Err(Error::validation(format!("duplicate upload id {}", upload.id)));
        }
        tables.uploads.push(upload.clone());
        Ok(())
    }

    async fn update(&self, upload: &Upload) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables.uploads.iter_mut().find(|u| u.id == upload.id) {
            Some(existing) => {
                *existing = upload.clone();
                Ok(())
            }
            None => Err(Error::not_found(format!("upload {}", upload.id))),
        }
    }
}

#[async_trait]
impl JobRepo for MemoryDb {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<JobDefinition>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<JobDefinition>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.jobs.iter().find(|j| j.name == name).cloned())
    }

    async fn list(&self) -> Result<Vec<JobDefinition>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.jobs.clone())
    }

    async fn create(&self, job: &JobDefinition) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if tables.jobs.iter().any(|j| j.name == job.name) {
            return Err(Error::validation(format!("duplicate job name '{}'", job.name)));
        }
        tables.jobs.push(job.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().unwrap();
        let before = tables.jobs.len();
        tables.jobs.retain(|j| j.id != id);
        Ok(tables.jobs.len() < before)
    }
}

#[async_trait]
impl JobRunRepo for MemoryDb {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<JobRun>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.job_runs.iter().find(|r| r.id == id).cloned())
    }

    async fn create(&self, run: &JobRun) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.job_runs.push(run.clone());
        Ok(())
    }

    async fn update(&self, run: &JobRun) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables.job_runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => {
                *existing = run.clone();
                Ok(())
            }
            None => Err(Error::not_found(format!("job run {}", run.id))),
        }
    }

    async fn latest_for_upload(&self, upload_id: Uuid, exclude: Uuid) -> Result<Option<JobRun>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .job_runs
            .iter()
            .filter(|r| r.upload_id == Some(upload_id) && r.id != exclude)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<JobRun>> {
        let tables = self.tables.lock().unwrap();
        let mut runs: Vec<JobRun> = tables
            .job_runs
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        Ok(runs)
    }
}

#[async_trait]
impl IncidentRepo for MemoryDb {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Incident>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.incidents.iter().find(|i| i.id == id).cloned())
    }

    async fn find_open_for(&self, upload_id: Uuid, stage: &str) -> Result<Option<Incident>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .incidents
            .iter()
            .find(|i| {
                i.upload_id == upload_id
                    && i.failing_stage == stage
                    && matches!(i.state, IncidentState::Open | IncidentState::InProgress)
            })
            .cloned())
    }

    async fn list_active_for_upload(&self, upload_id: Uuid) -> Result<Vec<Incident>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .incidents
            .iter()
            .filter(|i| i.upload_id == upload_id && i.state.is_active())
            .cloned()
            .collect())
    }

    async fn update(&self, incident: &Incident) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables.incidents.iter_mut().find(|i| i.id == incident.id) {
            Some(existing) => {
                *existing = incident.clone();
                Ok(())
            }
            None => Err(Error::not_found(format!("incident {}", incident.id))),
        }
    }

    async fn record_failure(&self, run: &JobRun, incident: &Incident, is_new: bool) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();

        match tables.job_runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => return Err(Error::not_found(format!("job run {}", run.id))),
        }

        if is_new {
            tables.incidents.push(incident.clone());
        } else {
            match tables.incidents.iter_mut().find(|i| i.id == incident.id) {
                Some(existing) => *existing = incident.clone(),
                None => return Err(Error::not_found(format!("incident {}", incident.id))),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl KnownErrorRepo for MemoryDb {
    async fn list_ordered(&self) -> Result<Vec<KnownError>> {
        let tables = self.tables.lock().unwrap();
        let mut known = tables.known_errors.clone();
        known.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(known)
    }

    async fn create(&self, known: &KnownError) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.known_errors.push(known.clone());
        Ok(())
    }
}

#[async_trait]
impl DepartmentRecordRepo for MemoryDb {
    async fn list(&self, source: Option<&str>) -> Result<Vec<DepartmentRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut records: Vec<DepartmentRecord> = tables
            .department_records
            .iter()
            .filter(|r| source.map(|s| r.source == s).unwrap_or(true))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.recorded_at);
        Ok(records)
    }

    async fn create(&self, record: &DepartmentRecord) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.department_records.push(record.clone());
        Ok(())
    }
}
