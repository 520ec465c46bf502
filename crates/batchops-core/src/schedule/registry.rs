//! Durable schedule registry
//!
//! One hash in the key/value store maps job id to schedule entry: the cron
//! expression, the computed next fire, and the last fire already handed to
//! the queue. `due` re-derives pending fires from `last_dispatched`, so a
//! dispatch is at-most-once per (job, fireTime) even across process
//! restarts: the enqueue and the bookkeeping update travel in one atomic
//! batch, and a fire is only pending while `last_dispatched` trails
//! `next_fire`.
//!
//! Missed fires while the process was down are not replayed; `reconcile`
//! and `register` always compute the next fire from now. This avoids a
//! thundering herd after an outage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cron::CronSchedule;
use crate::kv::{KvError, KvResult, KvStore, WriteOp};
use crate::models::JobDefinition;
use crate::queue::WorkQueue;

/// Durable registry state for one scheduled job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub job_id: Uuid,
    pub cron: String,
    pub next_fire: DateTime<Utc>,
    pub last_dispatched: Option<DateTime<Utc>>,
}

/// A fire whose time has come and which has not been dispatched yet
#[derive(Debug, Clone)]
pub struct DueFire {
    pub job_id: Uuid,
    pub fire_time: DateTime<Utc>,
    pub schedule: CronSchedule,
}

/// Registry of cron schedules over the key/value store
#[derive(Clone)]
pub struct ScheduleRegistry {
    kv: Arc<dyn KvStore>,
    entries_key: String,
}

impl ScheduleRegistry {
    pub fn new(kv: Arc<dyn KvStore>, namespace: &str) -> Self {
        Self {
            kv,
            entries_key: format!("{}:schedule:entries", namespace),
        }
    }

    /// Register or replace the schedule for a job. Idempotent.
    pub async fn register(
        &self,
        job_id: Uuid,
        cron: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<()> {
        let schedule = CronSchedule::parse(cron)?;
        let next_fire = schedule
            .next_fire_after(now)
            .ok_or_else(|| crate::Error::schedule(format!("'{}' never fires", cron)))?;

        let entry = ScheduleEntry {
            job_id,
            cron: cron.to_string(),
            next_fire,
            last_dispatched: None,
        };
        self.kv
            .hash_set(&self.entries_key, &job_id.to_string(), &encode(&entry))
            .await?;

        info!("Registered schedule: job={}, cron='{}', next={}", job_id, cron, next_fire);

        Ok(())
    }

    /// Remove the durable entry and any not-yet-fired pending dispatch
    pub async fn unregister(&self, job_id: Uuid, queue: &WorkQueue) -> crate::Result<()> {
        self.kv
            .hash_del(&self.entries_key, &job_id.to_string())
            .await?;
        let dropped = queue.remove_delayed_for_job(job_id).await?;

        info!("Unregistered schedule: job={}, dropped_pending={}", job_id, dropped);

        Ok(())
    }

    /// Fires with fire_time <= now that have not been marked dispatched
    pub async fn due(&self, now: DateTime<Utc>) -> KvResult<Vec<DueFire>> {
        let raw_entries = self.kv.hash_get_all(&self.entries_key).await?;

        let mut fires = Vec::new();
        for (field, raw) in raw_entries {
            let entry: ScheduleEntry = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping malformed schedule entry {}: {}", field, e);
                    continue;
                }
            };

            if entry.next_fire > now {
                continue;
            }
            if entry.last_dispatched == Some(entry.next_fire) {
                continue;
            }

            let schedule = match CronSchedule::parse(&entry.cron) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!("Skipping entry with malformed cron {}: {}", entry.cron, e);
                    continue;
                }
            };

            fires.push(DueFire {
                job_id: entry.job_id,
                fire_time: entry.next_fire,
                schedule,
            });
        }

        // Stable dispatch order across jobs
        fires.sort_by_key(|f| (f.fire_time, f.job_id));

        Ok(fires)
    }

    /// The bookkeeping half of a dispatch: record the fire as handed to the
    /// queue and advance next_fire. Must travel in the same atomic batch as
    /// the enqueue; the scheduler composes this with the queue op. An
    /// expression with no further fire keeps next_fire == last_dispatched,
    /// which `due` never reports.
    pub fn mark_dispatched_op(&self, fire: &DueFire) -> WriteOp {
        let next_fire = fire
            .schedule
            .next_fire_after(fire.fire_time)
            .unwrap_or(fire.fire_time);
        let entry = ScheduleEntry {
            job_id: fire.job_id,
            cron: fire.schedule.expression().to_string(),
            next_fire,
            last_dispatched: Some(fire.fire_time),
        };
        WriteOp::HashSet {
            key: self.entries_key.clone(),
            field: fire.job_id.to_string(),
            value: encode(&entry),
        }
    }

    /// Atomically apply a dispatch batch
    pub async fn commit_dispatch(&self, ops: Vec<WriteOp>) -> KvResult<()> {
        self.kv.exec(ops).await
    }

    /// Reconcile the registry against the authoritative job set: add
    /// missing registrations, refresh changed expressions, drop orphans.
    /// Invoked at startup and after any job mutation.
    pub async fn reconcile(
        &self,
        jobs: &[JobDefinition],
        queue: &WorkQueue,
        now: DateTime<Utc>,
    ) -> crate::Result<()> {
        let existing = self.kv.hash_get_all(&self.entries_key).await?;

        for job in jobs {
            match &job.schedule_cron {
                Some(cron) => {
                    let current = existing
                        .iter()
                        .find(|(field, _)| field == &job.id.to_string())
                        .and_then(|(_, raw)| serde_json::from_str::<ScheduleEntry>(raw).ok());

                    let unchanged = current.as_ref().map(|e| e.cron == *cron).unwrap_or(false);
                    // A stale undispatched fire means the process was down
                    // past it; skip to the next future fire instead of
                    // replaying. Dispatched entries keep their state so a
                    // restart cannot double-fire.
                    let stale = current
                        .as_ref()
                        .map(|e| e.next_fire <= now && e.last_dispatched != Some(e.next_fire))
                        .unwrap_or(false);
                    if !unchanged || stale {
                        self.register(job.id, cron, now).await?;
                    }
                }
                None => {
                    if existing.iter().any(|(field, _)| field == &job.id.to_string()) {
                        self.unregister(job.id, queue).await?;
                    }
                }
            }
        }

        // Drop entries whose job no longer exists
        for (field, _) in &existing {
            let known = jobs.iter().any(|j| &j.id.to_string() == field);
            if !known {
                if let Ok(job_id) = field.parse::<Uuid>() {
                    self.unregister(job_id, queue).await?;
                } else {
                    self.kv.hash_del(&self.entries_key, field).await?;
                }
            }
        }

        debug!("Schedule registry reconciled: {} jobs", jobs.len());

        Ok(())
    }

    /// Current registry entries, for inspection
    pub async fn entries(&self) -> KvResult<Vec<ScheduleEntry>> {
        let raw_entries = self.kv.hash_get_all(&self.entries_key).await?;
        let mut entries = Vec::new();
        for (field, raw) in raw_entries {
            match serde_json::from_str(&raw) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    return Err(KvError::MalformedValue {
                        key: format!("{}:{}", self.entries_key, field),
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(entries)
    }
}

fn encode(entry: &ScheduleEntry) -> String {
    serde_json::to_string(entry).expect("schedule entry serializes")
}
