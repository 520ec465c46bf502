//! Scheduler loop
//!
//! One loop per deployment. Each tick: return expired leases to the
//! queue, promote due delayed entries, then dispatch due cron fires. A
//! dispatch is a single atomic batch pairing the delayed enqueue (keyed
//! at the fire time) with the registry bookkeeping, so a crash at any
//! point yields at-most-one enqueue per (job, fireTime): `due` derives
//! pending fires from the committed state on the next pass.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::engine::EngineDeps;
use crate::queue::QueueEntry;
use crate::Result;

/// The scheduler loop
pub struct Scheduler {
    deps: Arc<EngineDeps>,
}

impl Scheduler {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self { deps }
    }

    /// Run until shutdown, backing off on key/value store errors
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Scheduler running: tick={}s",
            self.deps.config.tick_interval_secs
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Ok(dispatched) => {
                    if dispatched > 0 {
                        debug!("Scheduler tick dispatched {} fires", dispatched);
                    }
                }
                Err(e) => {
                    error!("Scheduler tick failed, backing off: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.deps.config.tick_interval()) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("Scheduler stopped");
    }

    /// One scheduler pass; returns the number of fires dispatched
    pub async fn tick(&self) -> Result<usize> {
        let deps = &self.deps;
        let now = deps.clock.now();

        deps.queue.reap_expired(now).await?;
        deps.queue.promote(now).await?;

        let fires = deps.schedules.due(now).await?;
        let mut dispatched = 0;

        for fire in fires {
            let job = match deps.repos.jobs.find_by_id(fire.job_id).await? {
                Some(job) => job,
                None => {
                    // Job deleted under the registry entry; reconciliation
                    // will drop it
                    debug!("Skipping fire for missing job {}", fire.job_id);
                    continue;
                }
            };

            let entry = QueueEntry::new(
                job.id,
                job.config.0.args.clone(),
                job.config.0.kwargs.clone(),
                now,
            );

            deps.schedules
                .commit_dispatch(vec![
                    deps.queue.enqueue_at_op(entry, fire.fire_time),
                    deps.schedules.mark_dispatched_op(&fire),
                ])
                .await?;

            deps.metrics.cron_dispatches.fetch_add(1, Ordering::Relaxed);
            info!(
                "Dispatched cron fire: job='{}', fire_time={}",
                job.name, fire.fire_time
            );
            dispatched += 1;
        }

        // Fires keyed at-or-before now become runnable immediately
        if dispatched > 0 {
            deps.queue.promote(now).await?;
        }

        Ok(dispatched)
    }
}
