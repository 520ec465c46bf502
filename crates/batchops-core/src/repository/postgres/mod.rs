//! Postgres repositories
//!
//! Straight sqlx implementations of the repository traits. Every write is
//! a single statement except `record_failure`, which wraps the run update
//! and the incident write in one transaction.

pub mod schema;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::{
    DepartmentRecordRepo, IncidentRepo, JobRepo, JobRunRepo, KnownErrorRepo, UploadRepo,
};
use crate::config::DatabaseConfig;
use crate::models::{
    DepartmentRecord, Incident, JobDefinition, JobRun, KnownError, Upload,
};
use crate::Result;

/// Postgres database handle
#[derive(Clone)]
pub struct PostgresDb {
    pool: PgPool,
}

impl PostgresDb {
    /// Connect a pool using the configured size and timeout
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        info!("Database pool created: size={}", config.pool_size);

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create enum types, tables and indexes if missing
    pub async fn init_schema(&self) -> Result<()> {
        for statement in schema::CREATE_TYPES.iter().chain(schema::CREATE_TABLES) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema initialised");
        Ok(())
    }
}

#[async_trait]
impl UploadRepo for PostgresDb {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Upload>> {
        let upload = sqlx::query_as::<_, Upload>("SELECT * FROM uploads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(upload)
    }

    async fn create(&self, upload: &Upload) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO uploads (
                id, filename, department, received_at, status, process_mode,
                process_config, report_csv, report_pdf, report_generated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(upload.id)
        .bind(&upload.filename)
        .bind(&upload.department)
        .bind(upload.received_at)
        .bind(upload.status)
        .bind(upload.process_mode)
        .bind(&upload.process_config)
        .bind(&upload.report_csv)
        .bind(&upload.report_pdf)
        .bind(upload.report_generated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, upload: &Upload) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE uploads SET
                filename = $2, department = $3, received_at = $4, status = $5,
                process_mode = $6, process_config = $7, report_csv = $8,
                report_pdf = $9, report_generated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(upload.id)
        .bind(&upload.filename)
        .bind(&upload.department)
        .bind(upload.received_at)
        .bind(upload.status)
        .bind(upload.process_mode)
        .bind(&upload.process_config)
        .bind(&upload.report_csv)
        .bind(&upload.report_pdf)
        .bind(upload.report_generated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl JobRepo for PostgresDb {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<JobDefinition>> {
        let job = sqlx::query_as::<_, JobDefinition>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<JobDefinition>> {
        let job = sqlx::query_as::<_, JobDefinition>("SELECT * FROM jobs WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn list(&self) -> Result<Vec<JobDefinition>> {
        let jobs = sqlx::query_as::<_, JobDefinition>("SELECT * FROM jobs ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        Ok(jobs)
    }

    async fn create(&self, job: &JobDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, name, job_type, config, schedule_cron, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.job_type)
        .bind(&job.config)
        .bind(&job.schedule_cron)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl JobRunRepo for PostgresDb {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<JobRun>> {
        let run = sqlx::query_as::<_, JobRun>("SELECT * FROM job_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(run)
    }

    async fn create(&self, run: &JobRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_runs (
                id, job_id, upload_id, status, started_at, finished_at,
                duration_ms, exit_code, details, logs
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(run.id)
        .bind(run.job_id)
        .bind(run.upload_id)
        .bind(run.status)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.duration_ms)
        .bind(run.exit_code)
        .bind(&run.details)
        .bind(&run.logs)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, run: &JobRun) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_runs SET
                status = $2, finished_at = $3, duration_ms = $4,
                exit_code = $5, details = $6, logs = $7, upload_id = $8
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status)
        .bind(run.finished_at)
        .bind(run.duration_ms)
        .bind(run.exit_code)
        .bind(&run.details)
        .bind(&run.logs)
        .bind(run.upload_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_for_upload(&self, upload_id: Uuid, exclude: Uuid) -> Result<Option<JobRun>> {
        let run = sqlx::query_as::<_, JobRun>(
            r#"
            SELECT * FROM job_runs
            WHERE upload_id = $1 AND id != $2
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(upload_id)
        .bind(exclude)
        .fetch_optional(&self.pool)
        .await?;

        Ok(run)
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<JobRun>> {
        let runs = sqlx::query_as::<_, JobRun>(
            "SELECT * FROM job_runs WHERE job_id = $1 ORDER BY started_at DESC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(runs)
    }
}

#[async_trait]
impl IncidentRepo for PostgresDb {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Incident>> {
        let incident = sqlx::query_as::<_, Incident>("SELECT * FROM incidents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(incident)
    }

    async fn find_open_for(&self, upload_id: Uuid, stage: &str) -> Result<Option<Incident>> {
        let incident = sqlx::query_as::<_, Incident>(
            r#"
            SELECT * FROM incidents
            WHERE upload_id = $1 AND failing_stage = $2
              AND state IN ('open', 'in_progress')
            LIMIT 1
            "#,
        )
        .bind(upload_id)
        .bind(stage)
        .fetch_optional(&self.pool)
        .await?;

        Ok(incident)
    }

    async fn list_active_for_upload(&self, upload_id: Uuid) -> Result<Vec<Incident>> {
        let incidents = sqlx::query_as::<_, Incident>(
            r#"
            SELECT * FROM incidents
            WHERE upload_id = $1 AND state != 'archived'
            ORDER BY created_at
            "#,
        )
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(incidents)
    }

    async fn update(&self, incident: &Incident) -> Result<()> {
        incident_update_query(incident).execute(&self.pool).await?;
        Ok(())
    }

    async fn record_failure(&self, run: &JobRun, incident: &Incident, is_new: bool) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE job_runs SET
                status = $2, finished_at = $3, duration_ms = $4,
                exit_code = $5, details = $6, logs = $7, upload_id = $8
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status)
        .bind(run.finished_at)
        .bind(run.duration_ms)
        .bind(run.exit_code)
        .bind(&run.details)
        .bind(&run.logs)
        .bind(run.upload_id)
        .execute(&mut *tx)
        .await?;

        if is_new {
            incident_insert_query(incident).execute(&mut *tx).await?;
        } else {
            incident_update_query(incident).execute(&mut *tx).await?;
        }

        tx.commit().await?;

        Ok(())
    }
}

fn incident_insert_query(
    incident: &Incident,
) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO incidents (
            id, upload_id, job_run_id, state, severity, category, failing_stage,
            error, root_cause, corrective_action, impact_summary, analysis_notes,
            resolution_report, known_error_id, is_known, auto_retry_count,
            max_auto_retries, detection_source, assignee, timeline, created_at,
            resolved_at, archived_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23)
        "#,
    )
    .bind(incident.id)
    .bind(incident.upload_id)
    .bind(incident.job_run_id)
    .bind(incident.state)
    .bind(incident.severity)
    .bind(incident.category)
    .bind(&incident.failing_stage)
    .bind(&incident.error)
    .bind(&incident.root_cause)
    .bind(&incident.corrective_action)
    .bind(&incident.impact_summary)
    .bind(&incident.analysis_notes)
    .bind(&incident.resolution_report)
    .bind(incident.known_error_id)
    .bind(incident.is_known)
    .bind(incident.auto_retry_count)
    .bind(incident.max_auto_retries)
    .bind(incident.detection_source)
    .bind(&incident.assignee)
    .bind(&incident.timeline)
    .bind(incident.created_at)
    .bind(incident.resolved_at)
    .bind(incident.archived_at)
}

fn incident_update_query(
    incident: &Incident,
) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        UPDATE incidents SET
            job_run_id = $2, state = $3, severity = $4, category = $5,
            error = $6, root_cause = $7, corrective_action = $8,
            impact_summary = $9, analysis_notes = $10, resolution_report = $11,
            known_error_id = $12, is_known = $13, auto_retry_count = $14,
            max_auto_retries = $15, assignee = $16, timeline = $17,
            resolved_at = $18, archived_at = $19
        WHERE id = $1
        "#,
    )
    .bind(incident.id)
    .bind(incident.job_run_id)
    .bind(incident.state)
    .bind(incident.severity)
    .bind(incident.category)
    .bind(&incident.error)
    .bind(&incident.root_cause)
    .bind(&incident.corrective_action)
    .bind(&incident.impact_summary)
    .bind(&incident.analysis_notes)
    .bind(&incident.resolution_report)
    .bind(incident.known_error_id)
    .bind(incident.is_known)
    .bind(incident.auto_retry_count)
    .bind(incident.max_auto_retries)
    .bind(&incident.assignee)
    .bind(&incident.timeline)
    .bind(incident.resolved_at)
    .bind(incident.archived_at)
}

#[async_trait]
impl KnownErrorRepo for PostgresDb {
    async fn list_ordered(&self) -> Result<Vec<KnownError>> {
        let known = sqlx::query_as::<_, KnownError>(
            "SELECT * FROM known_errors ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(known)
    }

    async fn create(&self, known: &KnownError) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO known_errors (
                id, name, pattern, severity, category, corrective_action,
                root_cause, auto_retry, max_auto_retries, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(known.id)
        .bind(&known.name)
        .bind(&known.pattern)
        .bind(known.severity)
        .bind(known.category)
        .bind(&known.corrective_action)
        .bind(&known.root_cause)
        .bind(known.auto_retry)
        .bind(known.max_auto_retries)
        .bind(known.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DepartmentRecordRepo for PostgresDb {
    async fn list(&self, source: Option<&str>) -> Result<Vec<DepartmentRecord>> {
        let records = match source {
            Some(source) => {
                sqlx::query_as::<_, DepartmentRecord>(
                    "SELECT * FROM department_records WHERE source = $1 ORDER BY recorded_at",
                )
                .bind(source)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, DepartmentRecord>(
                    "SELECT * FROM department_records ORDER BY recorded_at",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }

    async fn create(&self, record: &DepartmentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO department_records (id, source, payload, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.id)
        .bind(&record.source)
        .bind(&record.payload)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
