//! Schema bootstrap
//!
//! Executed by the explicit `db init` entry point. Statements are
//! idempotent; there is no migration history.

/// Enum types, created idempotently
pub const CREATE_TYPES: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE upload_status AS ENUM ('pending', 'processing', 'published', 'failed');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE process_mode AS ENUM ('transform', 'append', 'delete', 'custom');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE job_run_status AS ENUM ('queued', 'running', 'success', 'failed', 'retrying');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE incident_state AS ENUM ('open', 'in_progress', 'resolved', 'archived');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE severity AS ENUM ('low', 'medium', 'high', 'critical');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE incident_category AS ENUM ('ingest', 'validation', 'transform', 'runtime', 'other');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE detection_source AS ENUM ('engine', 'manual');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$
    "#,
];

/// Tables and indexes
pub const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS uploads (
        id UUID PRIMARY KEY,
        filename TEXT NOT NULL,
        department TEXT NOT NULL,
        received_at TIMESTAMPTZ NOT NULL,
        status upload_status NOT NULL,
        process_mode process_mode NOT NULL,
        process_config JSONB NOT NULL DEFAULT 'null',
        report_csv TEXT,
        report_pdf BYTEA,
        report_generated_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        job_type TEXT NOT NULL,
        config JSONB NOT NULL,
        schedule_cron TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_runs (
        id UUID PRIMARY KEY,
        job_id UUID NOT NULL REFERENCES jobs(id),
        upload_id UUID REFERENCES uploads(id),
        status job_run_status NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        finished_at TIMESTAMPTZ,
        duration_ms BIGINT,
        exit_code INTEGER,
        details JSONB NOT NULL DEFAULT '[]',
        logs TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS job_runs_upload_idx ON job_runs (upload_id, started_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS known_errors (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        pattern TEXT NOT NULL,
        severity severity NOT NULL,
        category incident_category NOT NULL,
        corrective_action TEXT NOT NULL DEFAULT '',
        root_cause TEXT NOT NULL DEFAULT '',
        auto_retry BOOLEAN NOT NULL DEFAULT FALSE,
        max_auto_retries INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS incidents (
        id UUID PRIMARY KEY,
        upload_id UUID NOT NULL REFERENCES uploads(id),
        job_run_id UUID REFERENCES job_runs(id),
        state incident_state NOT NULL,
        severity severity NOT NULL,
        category incident_category NOT NULL,
        failing_stage TEXT NOT NULL,
        error TEXT NOT NULL,
        root_cause TEXT NOT NULL DEFAULT '',
        corrective_action TEXT NOT NULL DEFAULT '',
        impact_summary TEXT NOT NULL DEFAULT '',
        analysis_notes TEXT NOT NULL DEFAULT '',
        resolution_report TEXT NOT NULL DEFAULT '',
        known_error_id UUID REFERENCES known_errors(id),
        is_known BOOLEAN NOT NULL DEFAULT FALSE,
        auto_retry_count INTEGER NOT NULL DEFAULT 0,
        max_auto_retries INTEGER NOT NULL DEFAULT 0,
        detection_source detection_source NOT NULL,
        assignee TEXT,
        timeline JSONB NOT NULL DEFAULT '[]',
        created_at TIMESTAMPTZ NOT NULL,
        resolved_at TIMESTAMPTZ,
        archived_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS incidents_open_pair_idx
        ON incidents (upload_id, failing_stage)
        WHERE state IN ('open', 'in_progress')
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS department_records (
        id UUID PRIMARY KEY,
        source TEXT NOT NULL,
        payload JSONB NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS department_records_source_idx
        ON department_records (source, recorded_at)
    "#,
];
