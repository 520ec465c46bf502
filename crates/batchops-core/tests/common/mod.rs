#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use batchops_core::clock::{Clock, ManualClock};
use batchops_core::config::EngineConfig;
use batchops_core::engine::{Engine, EngineDeps};
use batchops_core::kv::{KvStore, MemoryStore};
use batchops_core::models::{ProcessMode, Upload};
use batchops_core::repository::Repositories;
use batchops_core::scheduler::Scheduler;
use batchops_core::storage::FileStorage;
use batchops_core::worker::WorkerPool;

/// A fully wired engine over in-memory ports with a manual clock
pub struct TestEngine {
    pub engine: Engine,
    pub deps: Arc<EngineDeps>,
    pub pool: WorkerPool,
    pub scheduler: Scheduler,
    pub clock: Arc<ManualClock>,
    pub repos: Repositories,
    pub kv: Arc<dyn KvStore>,
    _tmp: tempfile::TempDir,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Build an engine over the given shared state; lets tests simulate a
/// process restart by rebuilding over the same kv store and repositories
pub async fn engine_over(
    kv: Arc<dyn KvStore>,
    repos: Repositories,
    clock: Arc<ManualClock>,
) -> TestEngine {
    let tmp = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(tmp.path());

    let engine_clock: Arc<dyn Clock> = clock.clone();
    let engine = Engine::new(
        repos.clone(),
        kv.clone(),
        storage,
        engine_clock,
        EngineConfig::default(),
        "test",
        |_| {},
    )
    .unwrap();
    engine.prepare().await.unwrap();

    let deps = engine.deps();
    TestEngine {
        pool: WorkerPool::new(deps.clone()),
        scheduler: Scheduler::new(deps.clone()),
        engine,
        deps,
        clock,
        repos,
        kv,
        _tmp: tmp,
    }
}

pub async fn new_engine() -> TestEngine {
    engine_over(
        Arc::new(MemoryStore::new()),
        Repositories::in_memory(),
        Arc::new(ManualClock::new(start_time())),
    )
    .await
}

/// Create an upload row with its source file on disk
pub async fn seed_upload(
    t: &TestEngine,
    filename: &str,
    content: &[u8],
    mode: ProcessMode,
    config: serde_json::Value,
) -> Upload {
    let upload = Upload::new(filename, "registrar", mode, t.clock.now()).with_config(config);
    t.deps.storage.write_source(&upload, content).unwrap();
    t.repos.uploads.create(&upload).await.unwrap();
    upload
}

/// The grades.csv sample used across scenarios
pub const GRADES_CSV: &[u8] = b"student_id,score\nS1,90\nS2,85\nS3,70\n";

/// A well-formed PDF whose extracted text is prose only; standardize
/// finds no table in it
pub fn prose_pdf() -> Vec<u8> {
    use batchops_core::pipeline::{report, summarize, DataTable};

    let mut table = DataTable::new(vec!["note".to_string()]);
    table.push_row(vec!["narrative".to_string()]);
    let summary = summarize::run(&table).unwrap();
    report::render_pdf("Quarterly narrative", start_time(), &summary).unwrap()
}

/// Run workers until the queue is drained; returns entries processed
pub async fn drain(t: &TestEngine) -> usize {
    let mut processed = 0;
    while t.pool.run_once().await.unwrap() {
        processed += 1;
    }
    processed
}
