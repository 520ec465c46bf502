//! Engine composition
//!
//! Builds the dependency set (repositories, queue, schedule registry,
//! storage, metrics, incident writer, callable registry), registers the
//! built-in callables, and runs the scheduler loop plus the worker pool.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::callable::{CallableRegistry, INGEST_CALLABLE, PIPELINE_CALLABLE};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::incident::IncidentWriter;
use crate::ingest;
use crate::kv::KvStore;
use crate::metrics::EngineMetrics;
use crate::models::JobDefinition;
use crate::pipeline::PipelineExecutor;
use crate::queue::{QueueEntry, WorkQueue};
use crate::repository::Repositories;
use crate::schedule::ScheduleRegistry;
use crate::scheduler::Scheduler;
use crate::storage::FileStorage;
use crate::worker::WorkerPool;
use crate::{Error, Result};

/// Everything the moving parts share. Handed around as one Arc; metrics
/// and the incident writer are capabilities on it, not globals.
pub struct EngineDeps {
    pub repos: Repositories,
    pub kv: Arc<dyn KvStore>,
    pub queue: WorkQueue,
    pub schedules: ScheduleRegistry,
    pub storage: FileStorage,
    pub metrics: Arc<EngineMetrics>,
    pub clock: Arc<dyn Clock>,
    pub config: EngineConfig,
    pub incidents: IncidentWriter,
    pub registry: Arc<CallableRegistry>,
}

/// The batch engine: one scheduler loop plus a worker pool
pub struct Engine {
    deps: Arc<EngineDeps>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Wire an engine from its ports. Registers the built-in callables;
    /// `register_extra` may bind more before the registry is sealed.
    pub fn new(
        repos: Repositories,
        kv: Arc<dyn KvStore>,
        storage: FileStorage,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        namespace: &str,
        register_extra: impl FnOnce(&mut CallableRegistry),
    ) -> Result<Self> {
        let queue = WorkQueue::new(kv.clone(), namespace);
        let schedules = ScheduleRegistry::new(kv.clone(), namespace);
        let metrics = Arc::new(EngineMetrics::new());
        let incidents = IncidentWriter::new(
            repos.clone(),
            queue.clone(),
            metrics.clone(),
            clock.clone(),
        );

        let mut registry = CallableRegistry::new();
        registry.register(PIPELINE_CALLABLE, pipeline_callable)?;
        registry.register(INGEST_CALLABLE, ingest::department_feed)?;
        register_extra(&mut registry);

        let (shutdown_tx, _) = watch::channel(false);

        let deps = Arc::new(EngineDeps {
            repos,
            kv,
            queue,
            schedules,
            storage,
            metrics,
            clock,
            config,
            incidents,
            registry: Arc::new(registry),
        });

        Ok(Self {
            deps,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn deps(&self) -> Arc<EngineDeps> {
        self.deps.clone()
    }

    /// Prepare durable state: storage layout, the built-in pipeline job,
    /// and schedule reconciliation. Separate from `start` so callers can
    /// drive the scheduler and workers manually.
    pub async fn prepare(&self) -> Result<()> {
        self.deps.storage.ensure_layout()?;
        self.ensure_pipeline_job().await?;
        self.reconcile().await
    }

    /// Prepare durable state and start the scheduler and workers
    pub async fn start(&self) -> Result<()> {
        let deps = &self.deps;

        self.prepare().await?;

        let shutdown_rx = self.shutdown_tx.subscribe();

        let scheduler_deps = deps.clone();
        let scheduler_rx = shutdown_rx.clone();
        let scheduler_handle = tokio::spawn(async move {
            Scheduler::new(scheduler_deps).run(scheduler_rx).await;
        });

        let pool = WorkerPool::new(deps.clone());
        let mut handles = pool.start(shutdown_rx);
        handles.push(scheduler_handle);

        *self.tasks.lock().await = handles;

        info!(
            "Engine started: workers={}, callables={:?}",
            deps.config.worker_pool_size,
            deps.registry.registered_names()
        );

        Ok(())
    }

    /// Stop claiming, wait out the grace window for in-flight work, then
    /// force-exit. Leases on anything still running expire and re-deliver.
    pub async fn shutdown(&self) {
        info!("Engine shutting down");
        let _ = self.shutdown_tx.send(true);

        let grace = std::time::Duration::from_secs(self.deps.config.shutdown_grace_secs);
        let mut tasks = self.tasks.lock().await;
        let drain = futures::future::join_all(tasks.drain(..));

        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Shutdown grace window elapsed, abandoning in-flight work");
        }

        info!("Engine stopped");
    }

    /// Re-derive schedule registrations from the job table. The REST
    /// surface calls this after any job mutation; startup calls it too.
    pub async fn reconcile(&self) -> Result<()> {
        let jobs = self.deps.repos.jobs.list().await?;
        self.deps
            .schedules
            .reconcile(&jobs, &self.deps.queue, self.deps.clock.now())
            .await
    }

    /// Manually trigger a job by name, now
    pub async fn trigger(&self, job_name: &str, args: Vec<Value>) -> Result<()> {
        let job = self
            .deps
            .repos
            .jobs
            .find_by_name(job_name)
            .await?
            .ok_or_else(|| Error::not_found(format!("job '{}'", job_name)))?;

        let entry = QueueEntry::new(job.id, args, Map::new(), self.deps.clock.now());
        self.deps.queue.enqueue(&entry).await?;

        info!("Triggered job '{}'", job_name);
        Ok(())
    }

    /// The pipeline job definition every pipeline enqueue references
    async fn ensure_pipeline_job(&self) -> Result<()> {
        let deps = &self.deps;
        if deps.repos.jobs.find_by_name(PIPELINE_CALLABLE).await?.is_none() {
            let job = JobDefinition::new(
                PIPELINE_CALLABLE,
                "pipeline",
                PIPELINE_CALLABLE,
                deps.clock.now(),
            );
            deps.repos.jobs.create(&job).await?;
            info!("Created built-in job '{}'", PIPELINE_CALLABLE);
        }
        Ok(())
    }
}

/// The `pipeline.process_upload` entry point: args[0] is the upload id.
/// Stage failures are handled inside the executor (run finalised,
/// incident recorded), so they surface here as a normal return.
async fn pipeline_callable(
    args: Vec<Value>,
    _kwargs: Map<String, Value>,
    ctx: crate::callable::JobContext,
    deps: Arc<EngineDeps>,
) -> Result<Value> {
    let upload_id = args
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::validation("pipeline.process_upload requires an upload id"))?
        .parse::<uuid::Uuid>()?;

    let executor = PipelineExecutor::new(deps.clone());
    let outcome = executor.execute(upload_id, ctx.job_run_id).await?;

    Ok(json!({ "outcome": format!("{:?}", outcome) }))
}
