//! In-memory key/value store
//!
//! Single-process stand-in for Redis, used by the test suite and local
//! development. Every operation, including `exec` batches, runs under one
//! mutex, which gives the same atomicity the Redis backend gets from
//! MULTI/EXEC.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::{KvResult, KvStore, WriteOp};

#[derive(Default)]
struct Inner {
    strings: HashMap<String, String>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
    // Keyed by (score bits, member) so members stay ordered by score then
    // member, mirroring Redis sorted-set iteration order
    zsets: HashMap<String, BTreeMap<(u64, String), f64>>,
}

/// In-memory KvStore implementation
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(inner: &mut Inner, op: &WriteOp) {
        match op {
            WriteOp::Set { key, value } => {
                inner.strings.insert(key.clone(), value.clone());
            }
            WriteOp::Del { key } => {
                inner.strings.remove(key);
                inner.hashes.remove(key);
                inner.lists.remove(key);
                inner.zsets.remove(key);
            }
            WriteOp::HashSet { key, field, value } => {
                inner
                    .hashes
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), value.clone());
            }
            WriteOp::HashDel { key, field } => {
                if let Some(hash) = inner.hashes.get_mut(key) {
                    hash.remove(field);
                }
            }
            WriteOp::ListPushBack { key, value } => {
                inner
                    .lists
                    .entry(key.clone())
                    .or_default()
                    .push_back(value.clone());
            }
            WriteOp::ListRemove { key, value } => {
                if let Some(list) = inner.lists.get_mut(key) {
                    list.retain(|v| v != value);
                }
            }
            WriteOp::ZsetAdd { key, score, member } => {
                let zset = inner.zsets.entry(key.clone()).or_default();
                // Replace any previous score for the member
                zset.retain(|(_, m), _| m != member);
                zset.insert((score_bits(*score), member.clone()), *score);
            }
            WriteOp::ZsetRemove { key, member } => {
                if let Some(zset) = inner.zsets.get_mut(key) {
                    zset.retain(|(_, m), _| m != member);
                }
            }
        }
    }
}

// Order-preserving bit mapping for non-negative finite scores (epoch
// timestamps in practice)
fn score_bits(score: f64) -> u64 {
    let bits = score.to_bits();
    if score >= 0.0 {
        bits | (1 << 63)
    } else {
        !bits
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        Ok(self.inner.lock().unwrap().strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.inner
            .lock()
            .unwrap()
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::apply(&mut inner, &WriteOp::Del { key: key.to_string() });
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> KvResult<()> {
        self.inner
            .lock()
            .unwrap()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_del(&self, key: &str, field: &str) -> KvResult<()> {
        if let Some(hash) = self.inner.lock().unwrap().hashes.get_mut(key) {
            hash.remove(field);
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> KvResult<Vec<(String, String)>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn list_push_back(&self, key: &str, value: &str) -> KvResult<()> {
        self.inner
            .lock()
            .unwrap()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn list_pop_front(&self, key: &str) -> KvResult<Option<String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .lists
            .get_mut(key)
            .and_then(|l| l.pop_front()))
    }

    async fn list_move(&self, src: &str, dst: &str) -> KvResult<Option<String>> {
        let mut inner = self.inner.lock().unwrap();
        let value = inner.lists.get_mut(src).and_then(|l| l.pop_front());
        if let Some(ref value) = value {
            inner
                .lists
                .entry(dst.to_string())
                .or_default()
                .push_back(value.clone());
        }
        Ok(value)
    }

    async fn list_range(&self, key: &str) -> KvResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_len(&self, key: &str) -> KvResult<u64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .lists
            .get(key)
            .map(|l| l.len() as u64)
            .unwrap_or(0))
    }

    async fn zset_add(&self, key: &str, score: f64, member: &str) -> KvResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::apply(
            &mut inner,
            &WriteOp::ZsetAdd {
                key: key.to_string(),
                score,
                member: member.to_string(),
            },
        );
        Ok(())
    }

    async fn zset_range_by_score(&self, key: &str, max: f64) -> KvResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .zsets
            .get(key)
            .map(|z| {
                z.iter()
                    .filter(|(_, score)| **score <= max)
                    .map(|((_, member), _)| member.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zset_remove(&self, key: &str, member: &str) -> KvResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.zsets.get(key).map(|z| z.len()).unwrap_or(0);
        Self::apply(
            &mut inner,
            &WriteOp::ZsetRemove {
                key: key.to_string(),
                member: member.to_string(),
            },
        );
        let after = inner.zsets.get(key).map(|z| z.len()).unwrap_or(0);
        Ok((before - after) as u64)
    }

    async fn exec(&self, ops: Vec<WriteOp>) -> KvResult<()> {
        let mut inner = self.inner.lock().unwrap();
        for op in &ops {
            Self::apply(&mut inner, op);
        }
        Ok(())
    }
}
