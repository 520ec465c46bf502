//! Redis-backed key/value store
//!
//! One command per trait operation; atomic batches become MULTI/EXEC
//! pipelines. Connection management is delegated to the redis crate's
//! `ConnectionManager`, which transparently reconnects; errors surface as
//! transient `KvError`s and the caller backs off.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tracing::info;

use super::{KvError, KvResult, KvStore, WriteOp};
use crate::config::KvConfig;

/// Redis KvStore implementation
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis and validate the connection with a PING
    pub async fn connect(config: &KvConfig) -> KvResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| KvError::Connection(e.to_string()))?;

        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;

        let store = Self { manager };

        let mut conn = store.manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        if pong != "PONG" {
            return Err(KvError::Connection("Redis PING failed".to_string()));
        }

        info!("Redis store connected: url={}", config.url);

        Ok(store)
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn map_err(e: RedisError) -> KvError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        KvError::Connection(e.to_string())
    } else {
        KvError::Operation(e.to_string())
    }
}

fn push_op(pipe: &mut redis::Pipeline, op: &WriteOp) {
    match op {
        WriteOp::Set { key, value } => {
            pipe.cmd("SET").arg(key).arg(value).ignore();
        }
        WriteOp::Del { key } => {
            pipe.cmd("DEL").arg(key).ignore();
        }
        WriteOp::HashSet { key, field, value } => {
            pipe.cmd("HSET").arg(key).arg(field).arg(value).ignore();
        }
        WriteOp::HashDel { key, field } => {
            pipe.cmd("HDEL").arg(key).arg(field).ignore();
        }
        WriteOp::ListPushBack { key, value } => {
            pipe.cmd("RPUSH").arg(key).arg(value).ignore();
        }
        WriteOp::ListRemove { key, value } => {
            pipe.cmd("LREM").arg(key).arg(0).arg(value).ignore();
        }
        WriteOp::ZsetAdd { key, score, member } => {
            pipe.cmd("ZADD").arg(key).arg(*score).arg(member).ignore();
        }
        WriteOp::ZsetRemove { key, member } => {
            pipe.cmd("ZREM").arg(key).arg(member).ignore();
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut conn = self.conn();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut conn = self.conn();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn hash_get(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn();
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> KvResult<()> {
        let mut conn = self.conn();
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn hash_del(&self, key: &str, field: &str) -> KvResult<()> {
        let mut conn = self.conn();
        redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn hash_get_all(&self, key: &str) -> KvResult<Vec<(String, String)>> {
        let mut conn = self.conn();
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn list_push_back(&self, key: &str, value: &str) -> KvResult<()> {
        let mut conn = self.conn();
        redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn list_pop_front(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn();
        redis::cmd("LPOP")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn list_move(&self, src: &str, dst: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn();
        redis::cmd("LMOVE")
            .arg(src)
            .arg(dst)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn list_range(&self, key: &str) -> KvResult<Vec<String>> {
        let mut conn = self.conn();
        redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn list_len(&self, key: &str) -> KvResult<u64> {
        let mut conn = self.conn();
        redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn zset_add(&self, key: &str, score: f64, member: &str) -> KvResult<()> {
        let mut conn = self.conn();
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn zset_range_by_score(&self, key: &str, max: f64) -> KvResult<Vec<String>> {
        let mut conn = self.conn();
        redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn zset_remove(&self, key: &str, member: &str) -> KvResult<u64> {
        let mut conn = self.conn();
        redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn exec(&self, ops: Vec<WriteOp>) -> KvResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            push_op(&mut pipe, op);
        }

        let mut conn = self.conn();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_err)
    }
}
