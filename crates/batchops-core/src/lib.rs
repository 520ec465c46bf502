pub mod callable;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod incident;
pub mod ingest;
pub mod kv;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod repository;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod worker;

// Re-export commonly used types
pub use callable::{CallableRegistry, JobContext, PIPELINE_CALLABLE};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::{Engine, EngineDeps};
pub use error::{Error, Result};
pub use incident::{IncidentWriter, KnownErrorMatcher};
pub use kv::{KvStore, MemoryStore, RedisStore};
pub use metrics::EngineMetrics;
pub use pipeline::PipelineExecutor;
pub use queue::{ClaimedEntry, QueueEntry, WorkQueue};
pub use repository::Repositories;
pub use schedule::{CronSchedule, ScheduleRegistry};
pub use scheduler::Scheduler;
pub use storage::FileStorage;
pub use worker::WorkerPool;

/// Current version of batchops
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
