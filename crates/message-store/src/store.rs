//! Message store with destructive, at-most-once reads.
//!
//! Live state sits in memory behind a single lock. Every read-and-delete and
//! every batch purge happens inside one critical section that never awaits,
//! so concurrent receivers and the sweeper can never hand out the same
//! message twice.
//!
//! With durable snapshots a mutation is staged on a copy of the state and only
//! swapped in once its snapshot is on disk. Mutations queue on a commit lock,
//! so memory and disk never disagree about what was stored or delivered.

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::types::{Message, MessageId, MessageReceipt, PayloadPolicy, StoreLimits};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use vault::Snapshots;

/// Snapshot schema version.
const DATA_VERSION: u32 = 1;

/// Persistent form of the store.
#[derive(Debug, Serialize, Deserialize)]
struct MessageStoreData {
    version: u32,
    /// Pending messages in insertion order.
    messages: Vec<Message>,
}

/// Pending messages grouped by recipient, each queue ordered by insertion.
#[derive(Clone, Default)]
struct StoreState {
    queues: HashMap<String, BTreeMap<u64, Message>>,
    next_seq: u64,
    /// Bumped on every mutation; orders snapshot writes.
    generation: u64,
    count: usize,
}

impl StoreState {
    fn from_data(data: MessageStoreData) -> Self {
        let mut state = Self::default();
        for message in data.messages {
            state.insert(message);
        }
        state
    }

    fn to_data(&self) -> MessageStoreData {
        let mut sequenced: Vec<(u64, &Message)> = self
            .queues
            .values()
            .flat_map(|queue| queue.iter().map(|(seq, m)| (*seq, m)))
            .collect();
        sequenced.sort_by_key(|(seq, _)| *seq);

        MessageStoreData {
            version: DATA_VERSION,
            messages: sequenced.into_iter().map(|(_, m)| m.clone()).collect(),
        }
    }

    fn insert(&mut self, message: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queues
            .entry(message.recipient.clone())
            .or_default()
            .insert(seq, message);
        self.count += 1;
    }

    fn remove(&mut self, recipient: &str, seq: u64) -> Option<Message> {
        let queue = self.queues.get_mut(recipient)?;
        let message = queue.remove(&seq);
        if queue.is_empty() {
            self.queues.remove(recipient);
        }
        if message.is_some() {
            self.count -= 1;
        }
        message
    }

    /// Remove and return the oldest live message for `recipient`.
    fn take_live(&mut self, recipient: &str, now: DateTime<Utc>) -> Option<Message> {
        let seq = self
            .queues
            .get(recipient)?
            .iter()
            .find(|(_, m)| m.is_live(now))
            .map(|(seq, _)| *seq)?;
        self.remove(recipient, seq)
    }

    fn has_live(&self, recipient: &str, now: DateTime<Utc>) -> bool {
        self.queues
            .get(recipient)
            .is_some_and(|queue| queue.values().any(|m| m.is_live(now)))
    }

    fn count_expired(&self, cutoff: DateTime<Utc>) -> usize {
        self.queues
            .values()
            .flat_map(|queue| queue.values())
            .filter(|m| m.expires_at <= cutoff)
            .count()
    }

    fn purge(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.count;
        self.queues.retain(|_, queue| {
            queue.retain(|_, m| m.expires_at > cutoff);
            !queue.is_empty()
        });
        self.count = self.queues.values().map(BTreeMap::len).sum();
        before - self.count
    }
}

/// Ephemeral message store.
pub struct MessageStore {
    state: RwLock<StoreState>,
    /// Held from staging a mutation until its snapshot is written.
    commit_lock: Mutex<()>,
    snapshots: Snapshots,
    policy: PayloadPolicy,
    limits: StoreLimits,
    clock: Arc<dyn Clock>,
}

impl MessageStore {
    /// Open a store, loading the last snapshot if one exists.
    pub async fn open(
        snapshots: Snapshots,
        policy: PayloadPolicy,
        limits: StoreLimits,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let state = match snapshots.load().await? {
            Some(bytes) => {
                let data: MessageStoreData = serde_json::from_slice(&bytes)?;
                if data.version != DATA_VERSION {
                    warn!(
                        "Message snapshot version {} differs from {}",
                        data.version, DATA_VERSION
                    );
                }
                StoreState::from_data(data)
            }
            None => StoreState::default(),
        };

        info!(
            pending = state.count,
            payload_policy = policy.name(),
            persistent = snapshots.is_persistent(),
            "Message store opened"
        );

        Ok(Self {
            state: RwLock::new(state),
            commit_lock: Mutex::new(()),
            snapshots,
            policy,
            limits,
            clock,
        })
    }

    /// Memory-only store with opaque payloads, default limits and the system clock.
    pub fn in_memory() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Memory-only store with opaque payloads and a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            commit_lock: Mutex::new(()),
            snapshots: Snapshots::memory(),
            policy: PayloadPolicy::Opaque,
            limits: StoreLimits::default(),
            clock,
        }
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Apply `change` all-or-nothing.
    ///
    /// `change` returns `None` when it left the state untouched. Memory-only
    /// stores mutate in place under the write lock. Durable stores stage the
    /// change on a copy and publish it only after the snapshot is saved; if the
    /// save fails the live state is unchanged and the error is returned.
    async fn commit<T>(
        &self,
        change: impl FnOnce(&mut StoreState) -> Option<T>,
    ) -> Result<Option<T>, StoreError> {
        if !self.snapshots.is_persistent() {
            let mut state = self.state.write().await;
            let outcome = change(&mut state);
            if outcome.is_some() {
                state.generation += 1;
            }
            return Ok(outcome);
        }

        let _commit = self.commit_lock.lock().await;
        let mut staged = self.state.read().await.clone();
        let Some(outcome) = change(&mut staged) else {
            return Ok(None);
        };
        staged.generation += 1;

        let bytes = serde_json::to_vec(&staged.to_data())?;
        self.snapshots.save(staged.generation, &bytes).await?;

        *self.state.write().await = staged;
        Ok(Some(outcome))
    }

    /// Store a message for `recipient` that expires `ttl_seconds` from now.
    #[instrument(skip(self, payload), fields(payload_len = payload.len()))]
    pub async fn put(
        &self,
        sender: &str,
        recipient: &str,
        payload: Vec<u8>,
        ttl_seconds: i64,
    ) -> Result<MessageReceipt, StoreError> {
        if ttl_seconds <= 0 || ttl_seconds as u64 > self.limits.max_ttl.as_secs() {
            return Err(StoreError::InvalidTtl(ttl_seconds));
        }
        if payload.len() > self.limits.max_payload_bytes {
            return Err(StoreError::PayloadTooLarge {
                size: payload.len(),
                max: self.limits.max_payload_bytes,
            });
        }

        let created_at = self.clock.now();
        let expires_at = Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .ok_or(StoreError::InvalidTtl(ttl_seconds))?;

        let message = Message {
            id: Uuid::new_v4(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            payload: self.policy.seal(payload)?,
            created_at,
            expires_at,
        };
        let receipt = MessageReceipt {
            id: message.id,
            expires_at: message.expires_at,
        };

        let stored = self
            .commit(|state| {
                state.insert(message);
                Some(())
            })
            .await;
        if let Err(e) = stored {
            error!(message_id = %receipt.id, "Failed to persist message, not stored: {}", e);
            return Err(e);
        }

        debug!(message_id = %receipt.id, expires_at = %receipt.expires_at, "Message stored");
        Ok(receipt)
    }

    /// Atomically remove and return the oldest live message for `recipient`.
    ///
    /// The payload is returned opened. A sealed payload that cannot be opened
    /// is still consumed and reported as [`StoreError::Decryption`].
    #[instrument(skip(self))]
    pub async fn take_for_recipient(&self, recipient: &str) -> Result<Option<Message>, StoreError> {
        let now = self.clock.now();

        let taken = self
            .commit(|state| state.take_live(recipient, now))
            .await
            .map_err(|e| {
                error!("Failed to persist message removal, nothing delivered: {}", e);
                e
            })?;
        let Some(mut message) = taken else {
            return Ok(None);
        };

        let stored = std::mem::take(&mut message.payload);
        message.payload = self.policy.open(stored).map_err(|_| {
            error!(message_id = %message.id, "Consumed message could not be decrypted");
            StoreError::Decryption(message.id)
        })?;

        debug!(message_id = %message.id, "Message delivered and removed");
        Ok(Some(message))
    }

    /// Whether a live message is waiting for `recipient`. Never mutates.
    pub async fn exists_for_recipient(&self, recipient: &str) -> bool {
        let now = self.clock.now();
        self.state.read().await.has_live(recipient, now)
    }

    /// Number of records with `expires_at <= cutoff`. Read-only.
    pub async fn count_expired(&self, cutoff: DateTime<Utc>) -> usize {
        self.state.read().await.count_expired(cutoff)
    }

    /// Delete every record with `expires_at <= cutoff` in one batch.
    ///
    /// If the result cannot be persisted nothing is removed and the error is
    /// returned; the next purge retries the whole batch.
    pub async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = self
            .commit(|state| match state.purge(cutoff) {
                0 => None,
                removed => Some(removed),
            })
            .await?;
        Ok(removed.unwrap_or(0))
    }

    /// Total records held, expired or not.
    pub async fn len(&self) -> usize {
        self.state.read().await.count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a record with this id is still held. Used by tests and diagnostics.
    pub async fn contains(&self, id: MessageId) -> bool {
        self.state
            .read()
            .await
            .queues
            .values()
            .any(|queue| queue.values().any(|m| m.id == id))
    }
}
