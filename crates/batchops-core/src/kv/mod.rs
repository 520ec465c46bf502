//! Key/value store port backing the queue and schedule registry
//!
//! The engine shares queue and schedule state across processes through an
//! external key/value store. Everything it needs is expressed through this
//! trait: plain keys, hashes, lists, sorted sets, and an atomic write
//! batch. The Redis implementation maps each operation onto one command;
//! `exec` becomes a MULTI/EXEC pipeline. The in-memory implementation runs
//! every operation under a single mutex and backs the test suite.

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;

/// Key/value result type alias
pub type KvResult<T> = Result<T, KvError>;

/// Key/value store error types
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation failed: {0}")]
    Operation(String),

    #[error("malformed value at {key}: {reason}")]
    MalformedValue { key: String, reason: String },
}

impl KvError {
    /// All KV errors are transient from the caller's perspective; the
    /// scheduler loop backs off and retries on the next tick.
    pub fn is_transient(&self) -> bool {
        true
    }
}

/// A single mutation, for atomic batches
#[derive(Debug, Clone)]
pub enum WriteOp {
    Set { key: String, value: String },
    Del { key: String },
    HashSet { key: String, field: String, value: String },
    HashDel { key: String, field: String },
    ListPushBack { key: String, value: String },
    /// Remove every occurrence of the value from the list
    ListRemove { key: String, value: String },
    ZsetAdd { key: String, score: f64, member: String },
    ZsetRemove { key: String, member: String },
}

/// Port over the external key/value store
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> KvResult<()>;
    async fn del(&self, key: &str) -> KvResult<()>;

    async fn hash_get(&self, key: &str, field: &str) -> KvResult<Option<String>>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> KvResult<()>;
    async fn hash_del(&self, key: &str, field: &str) -> KvResult<()>;
    async fn hash_get_all(&self, key: &str) -> KvResult<Vec<(String, String)>>;

    async fn list_push_back(&self, key: &str, value: &str) -> KvResult<()>;
    async fn list_pop_front(&self, key: &str) -> KvResult<Option<String>>;
    /// Atomically move the front of `src` to the back of `dst` and return
    /// it. The reliable-queue primitive: a crash cannot lose the element.
    async fn list_move(&self, src: &str, dst: &str) -> KvResult<Option<String>>;
    async fn list_range(&self, key: &str) -> KvResult<Vec<String>>;
    async fn list_len(&self, key: &str) -> KvResult<u64>;

    async fn zset_add(&self, key: &str, score: f64, member: &str) -> KvResult<()>;
    /// Members with score <= max, ascending by score (ties in lexical
    /// member order)
    async fn zset_range_by_score(&self, key: &str, max: f64) -> KvResult<Vec<String>>;
    async fn zset_remove(&self, key: &str, member: &str) -> KvResult<u64>;

    /// Apply all mutations atomically: either every op is visible or none
    async fn exec(&self, ops: Vec<WriteOp>) -> KvResult<()>;
}
