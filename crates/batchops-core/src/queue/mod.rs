//! Job queue over the key/value store
//!
//! Two logical structures share the backing store: a FIFO of immediately
//! runnable entries and a delayed set keyed by target fire time. Claimed
//! entries sit on a processing list with a lease; lease expiry returns
//! them to the FIFO, which gives at-least-once delivery. The pipeline
//! executor is idempotent per (upload, stage), so re-delivery is safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::kv::{KvError, KvResult, KvStore, WriteOp};

/// A self-contained queue entry. The serialized JSON is the list element
/// itself, so no separate per-entry key is needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique per enqueue; lease bookkeeping is keyed by this
    pub entry_id: Uuid,

    /// Job definition to run
    pub job_id: Uuid,

    /// Positional arguments; empty means use the job's stored args
    #[serde(default)]
    pub args: Vec<Value>,

    /// Keyword arguments; empty means use the job's stored kwargs
    #[serde(default)]
    pub kwargs: Map<String, Value>,

    pub enqueued_at: DateTime<Utc>,

    /// Target fire time for delayed entries
    pub target_time: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(job_id: Uuid, args: Vec<Value>, kwargs: Map<String, Value>, now: DateTime<Utc>) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            job_id,
            args,
            kwargs,
            enqueued_at: now,
            target_time: None,
        }
    }

    fn encode(&self) -> String {
        // QueueEntry has no non-serializable fields; this cannot fail
        serde_json::to_string(self).expect("queue entry serializes")
    }

    fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// A claimed entry: the decoded payload plus the raw list element needed
/// to ack it
#[derive(Debug, Clone)]
pub struct ClaimedEntry {
    pub entry: QueueEntry,
    raw: String,
}

/// Lease recorded for a claimed entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Lease {
    worker_id: Uuid,
    deadline: DateTime<Utc>,
}

/// FIFO + delayed-set job queue over the key/value store
#[derive(Clone)]
pub struct WorkQueue {
    kv: Arc<dyn KvStore>,
    ready_key: String,
    delayed_key: String,
    processing_key: String,
    leases_key: String,
}

impl WorkQueue {
    pub fn new(kv: Arc<dyn KvStore>, namespace: &str) -> Self {
        Self {
            kv,
            ready_key: format!("{}:queue:ready", namespace),
            delayed_key: format!("{}:queue:delayed", namespace),
            processing_key: format!("{}:queue:processing", namespace),
            leases_key: format!("{}:queue:leases", namespace),
        }
    }

    /// Append an entry to the FIFO
    pub async fn enqueue(&self, entry: &QueueEntry) -> KvResult<()> {
        self.kv.list_push_back(&self.ready_key, &entry.encode()).await
    }

    /// Insert an entry into the delayed set at its target time
    pub async fn enqueue_at(&self, mut entry: QueueEntry, at: DateTime<Utc>) -> KvResult<()> {
        entry.target_time = Some(at);
        self.kv
            .zset_add(&self.delayed_key, at.timestamp() as f64, &entry.encode())
            .await
    }

    /// The atomic batch op for a delayed enqueue; the scheduler bundles
    /// this with its dispatch bookkeeping in one `exec`
    pub fn enqueue_at_op(&self, mut entry: QueueEntry, at: DateTime<Utc>) -> WriteOp {
        entry.target_time = Some(at);
        WriteOp::ZsetAdd {
            key: self.delayed_key.clone(),
            score: at.timestamp() as f64,
            member: entry.encode(),
        }
    }

    /// Move all delayed entries with target time <= now into the FIFO,
    /// preserving their relative target order
    pub async fn promote(&self, now: DateTime<Utc>) -> KvResult<usize> {
        let due = self
            .kv
            .zset_range_by_score(&self.delayed_key, now.timestamp() as f64)
            .await?;

        let mut promoted = 0;
        for member in due {
            // Per-entry atomic pair: a crash can leave an entry delayed,
            // never duplicated
            self.kv
                .exec(vec![
                    WriteOp::ZsetRemove {
                        key: self.delayed_key.clone(),
                        member: member.clone(),
                    },
                    WriteOp::ListPushBack {
                        key: self.ready_key.clone(),
                        value: member,
                    },
                ])
                .await?;
            promoted += 1;
        }

        if promoted > 0 {
            debug!("Promoted {} delayed entries", promoted);
        }

        Ok(promoted)
    }

    /// Atomically pop one FIFO entry and record a lease. Returns None when
    /// the queue is empty.
    ///
    /// The list move is the atomicity anchor: once an entry is on the
    /// processing list it can only be acked or reaped, never lost. The
    /// lease record lands just after; the reaper treats a processing entry
    /// without a lease as expired.
    pub async fn claim(
        &self,
        worker_id: Uuid,
        lease_duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> KvResult<Option<ClaimedEntry>> {
        let raw = match self.kv.list_move(&self.ready_key, &self.processing_key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let entry = QueueEntry::decode(&raw).map_err(|e| KvError::MalformedValue {
            key: self.ready_key.clone(),
            reason: e.to_string(),
        })?;

        let lease = Lease {
            worker_id,
            deadline: now + lease_duration,
        };
        self.kv
            .hash_set(
                &self.leases_key,
                &entry.entry_id.to_string(),
                &serde_json::to_string(&lease).expect("lease serializes"),
            )
            .await?;

        Ok(Some(ClaimedEntry { entry, raw }))
    }

    /// Remove the lease and the processing entry. A successful run and a
    /// recorded failure both ack.
    pub async fn ack(&self, claimed: &ClaimedEntry) -> KvResult<()> {
        self.kv
            .exec(vec![
                WriteOp::ListRemove {
                    key: self.processing_key.clone(),
                    value: claimed.raw.clone(),
                },
                WriteOp::HashDel {
                    key: self.leases_key.clone(),
                    field: claimed.entry.entry_id.to_string(),
                },
            ])
            .await
    }

    /// Return entries with expired (or missing) leases to the FIFO
    pub async fn reap_expired(&self, now: DateTime<Utc>) -> KvResult<usize> {
        let processing = self.kv.list_range(&self.processing_key).await?;

        let mut reaped = 0;
        for raw in processing {
            let entry = match QueueEntry::decode(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Dropping malformed processing entry: {}", e);
                    self.kv
                        .exec(vec![WriteOp::ListRemove {
                            key: self.processing_key.clone(),
                            value: raw,
                        }])
                        .await?;
                    continue;
                }
            };

            let field = entry.entry_id.to_string();
            let expired = match self.kv.hash_get(&self.leases_key, &field).await? {
                Some(raw_lease) => match serde_json::from_str::<Lease>(&raw_lease) {
                    Ok(lease) => lease.deadline <= now,
                    Err(_) => true,
                },
                // Crash window between claim's list move and lease write
                None => true,
            };

            if expired {
                self.kv
                    .exec(vec![
                        WriteOp::ListRemove {
                            key: self.processing_key.clone(),
                            value: raw.clone(),
                        },
                        WriteOp::ListPushBack {
                            key: self.ready_key.clone(),
                            value: raw,
                        },
                        WriteOp::HashDel {
                            key: self.leases_key.clone(),
                            field,
                        },
                    ])
                    .await?;
                reaped += 1;
            }
        }

        if reaped > 0 {
            warn!("Reaped {} expired leases back to the queue", reaped);
        }

        Ok(reaped)
    }

    /// Drop not-yet-fired delayed entries for a job; used when a job is
    /// unregistered
    pub async fn remove_delayed_for_job(&self, job_id: Uuid) -> KvResult<usize> {
        let all = self.kv.zset_range_by_score(&self.delayed_key, f64::MAX).await?;

        let mut removed = 0;
        for member in all {
            if let Ok(entry) = QueueEntry::decode(&member) {
                if entry.job_id == job_id {
                    self.kv.zset_remove(&self.delayed_key, &member).await?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    /// Number of immediately runnable entries
    pub async fn ready_len(&self) -> KvResult<u64> {
        self.kv.list_len(&self.ready_key).await
    }
}
