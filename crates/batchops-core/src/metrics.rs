//! Engine metrics
//!
//! A capability passed to the scheduler, workers and pipeline executor,
//! never module-level state. Counters are process-local; anything durable
//! lives in JobRun and Incident records.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local engine counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Queue entries claimed by workers
    pub claims: AtomicU64,

    /// Runs finished with status success
    pub runs_succeeded: AtomicU64,

    /// Runs finished with status failed
    pub runs_failed: AtomicU64,

    /// Cron fires handed to the queue
    pub cron_dispatches: AtomicU64,

    /// Incidents created
    pub incidents_opened: AtomicU64,

    /// Incidents auto-resolved after a successful retry
    pub incidents_auto_resolved: AtomicU64,

    /// Auto-retries scheduled by the known-error matcher
    pub auto_retries_scheduled: AtomicU64,

    /// Uploads published
    pub uploads_published: AtomicU64,

    /// Stage failures by stage name
    stage_failures: DashMap<String, u64>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage failure
    pub fn record_stage_failure(&self, stage: &str) {
        *self.stage_failures.entry(stage.to_string()).or_insert(0) += 1;
    }

    /// Point-in-time snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            claims: self.claims.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            cron_dispatches: self.cron_dispatches.load(Ordering::Relaxed),
            incidents_opened: self.incidents_opened.load(Ordering::Relaxed),
            incidents_auto_resolved: self.incidents_auto_resolved.load(Ordering::Relaxed),
            auto_retries_scheduled: self.auto_retries_scheduled.load(Ordering::Relaxed),
            uploads_published: self.uploads_published.load(Ordering::Relaxed),
            stage_failures: self
                .stage_failures
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }
}

/// Point-in-time counter values
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub claims: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub cron_dispatches: u64,
    pub incidents_opened: u64,
    pub incidents_auto_resolved: u64,
    pub auto_retries_scheduled: u64,
    pub uploads_published: u64,
    pub stage_failures: HashMap<String, u64>,
}

impl MetricsSnapshot {
    /// Format as human-readable
    pub fn format(&self) -> String {
        let mut lines = vec![
            format!("claims={}", self.claims),
            format!("runs: ok={} failed={}", self.runs_succeeded, self.runs_failed),
            format!("cron_dispatches={}", self.cron_dispatches),
            format!(
                "incidents: opened={} auto_resolved={} retries={}",
                self.incidents_opened, self.incidents_auto_resolved, self.auto_retries_scheduled
            ),
            format!("uploads_published={}", self.uploads_published),
        ];
        for (stage, count) in &self.stage_failures {
            lines.push(format!("stage_failures.{}={}", stage, count));
        }
        lines.join("\n")
    }
}
