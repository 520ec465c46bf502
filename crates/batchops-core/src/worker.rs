//! Worker pool
//!
//! N cooperating executors loop: claim an entry, record a JobRun, resolve
//! the callable, invoke it, finalise, ack. Callables that manage their own run record
//! (the pipeline executor) finalise it themselves; the worker only
//! finalises runs the callable left open. Shutdown is cooperative between
//! jobs; a forced shutdown relies on lease expiry for re-delivery.

use serde_json::{Map, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::callable::JobContext;
use crate::engine::EngineDeps;
use crate::models::{JobRun, JobRunStatus, EXIT_FAILURE, EXIT_SUCCESS, EXIT_UNRESOLVED};
use crate::queue::ClaimedEntry;
use crate::Result;

/// Fixed-size pool of queue executors
pub struct WorkerPool {
    deps: Arc<EngineDeps>,
}

impl WorkerPool {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self { deps }
    }

    /// Claim, execute and ack a single entry. Returns false when the
    /// queue is empty. Used for manual drains and by the test suites.
    pub async fn run_once(&self) -> Result<bool> {
        let executor = Executor {
            id: Uuid::new_v4(),
            index: 0,
            deps: self.deps.clone(),
        };

        let claimed = self
            .deps
            .queue
            .claim(
                executor.id,
                self.deps.config.lease_duration(),
                self.deps.clock.now(),
            )
            .await?;

        match claimed {
            Some(claimed) => {
                self.deps.metrics.claims.fetch_add(1, Ordering::Relaxed);
                let result = executor.process(&claimed).await;
                self.deps.queue.ack(&claimed).await?;
                result?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Spawn the configured number of executors
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let pool_size = self.deps.config.worker_pool_size;
        info!("Starting worker pool: size={}", pool_size);

        (0..pool_size)
            .map(|index| {
                let executor = Executor {
                    id: Uuid::new_v4(),
                    index,
                    deps: self.deps.clone(),
                };
                let shutdown = shutdown.clone();
                tokio::spawn(async move { executor.run(shutdown).await })
            })
            .collect()
    }
}

struct Executor {
    id: Uuid,
    index: usize,
    deps: Arc<EngineDeps>,
}

impl Executor {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Worker {} ({}) running", self.index, self.id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let claim = self
                .deps
                .queue
                .claim(
                    self.id,
                    self.deps.config.lease_duration(),
                    self.deps.clock.now(),
                )
                .await;

            match claim {
                Ok(Some(claimed)) => {
                    self.deps.metrics.claims.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = self.process(&claimed).await {
                        error!("Worker {} failed processing entry: {}", self.index, e);
                    }
                    // Success and recorded failure both ack
                    if let Err(e) = self.deps.queue.ack(&claimed).await {
                        warn!("Worker {} ack failed: {}", self.index, e);
                    }
                }
                Ok(None) => {
                    // Bounded wait on empty
                    tokio::select! {
                        _ = tokio::time::sleep(self.deps.config.idle_wait()) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    warn!("Worker {} claim error, backing off: {}", self.index, e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }

        info!("Worker {} stopped", self.index);
    }

    async fn process(&self, claimed: &ClaimedEntry) -> Result<()> {
        let deps = &self.deps;
        let entry = &claimed.entry;

        let job = match deps.repos.jobs.find_by_id(entry.job_id).await? {
            Some(job) => job,
            None => {
                warn!("Dropping queue entry for deleted job {}", entry.job_id);
                return Ok(());
            }
        };

        // The run record is created on claim and carried by id through the
        // callable's context
        let mut run = JobRun::new(job.id, deps.clock.now());
        deps.repos.job_runs.create(&run).await?;

        let callable = job.config.0.callable.clone();
        let args: Vec<Value> = if entry.args.is_empty() {
            job.config.0.args.clone()
        } else {
            entry.args.clone()
        };
        let kwargs: Map<String, Value> = if entry.kwargs.is_empty() {
            job.config.0.kwargs.clone()
        } else {
            entry.kwargs.clone()
        };

        // Unknown callables are a permanent operator error: exit code 2,
        // no incident, never retried
        if !deps.registry.is_registered(&callable) {
            error!("Job '{}' references unknown callable '{}'", job.name, callable);
            run.log(format!("unknown callable '{}'", callable));
            run.finalize(JobRunStatus::Failed, EXIT_UNRESOLVED, deps.clock.now());
            deps.repos.job_runs.update(&run).await?;
            deps.metrics.runs_failed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        run.mark_running();
        deps.repos.job_runs.update(&run).await?;

        let ctx = JobContext {
            job_run_id: run.id,
            job_id: job.id,
            job_name: job.name.clone(),
            claimed_at: deps.clock.now(),
        };

        let outcome = deps
            .registry
            .call(&callable, args, kwargs, ctx, deps.clone())
            .await;

        // The callable may have finalised the run itself (the pipeline
        // executor does); only finalise runs still open
        let mut current = deps
            .repos
            .job_runs
            .find_by_id(run.id)
            .await?
            .unwrap_or(run);

        match outcome {
            Ok(_) => {
                if !current.status.is_terminal() {
                    current.finalize(JobRunStatus::Success, EXIT_SUCCESS, deps.clock.now());
                    deps.repos.job_runs.update(&current).await?;
                }
            }
            Err(e) => {
                if !current.status.is_terminal() {
                    current.log(format!("callable failed: {}", e));
                    current.finalize(JobRunStatus::Failed, EXIT_FAILURE, deps.clock.now());
                    deps.repos.job_runs.update(&current).await?;
                }
                warn!("Job '{}' run {} failed: {}", job.name, current.id, e);
            }
        }

        match current.status {
            JobRunStatus::Success => {
                deps.metrics.runs_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            JobRunStatus::Failed => {
                deps.metrics.runs_failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        Ok(())
    }
}
