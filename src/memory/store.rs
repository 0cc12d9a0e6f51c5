//! Dual-partition memory store
//!
//! Holds the Permanent and TimeBased partitions behind a single
//! `tokio::sync::RwLock`, which serializes mutation across conversations
//! sharing the same profile. Partitions are insertion-ordered for
//! deterministic serialization, with an id index for O(1) duplicate checks.
//!
//! When a persistence sink is attached the store is write-through: every
//! mutation that changes state flushes a full snapshot before the write lock
//! is released, so no reader ever observes state that was not persisted.

use super::entry::{MemoryEntry, MemoryKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Serializable snapshot of both partitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub permanent: Vec<MemoryEntry>,
    pub time_based: Vec<MemoryEntry>,
}

/// Sink for write-through persistence of store snapshots
#[async_trait]
pub trait MemoryPersistence: Send + Sync {
    /// Persist a full snapshot of both partitions
    async fn save(&self, snapshot: &MemorySnapshot) -> Result<()>;
}

struct StoreInner {
    permanent: Vec<MemoryEntry>,
    time_based: Vec<MemoryEntry>,
    /// Every id currently held, mapped to its owning partition
    index: HashMap<Uuid, MemoryKind>,
}

impl StoreInner {
    fn partition(&self, kind: MemoryKind) -> &Vec<MemoryEntry> {
        match kind {
            MemoryKind::Permanent => &self.permanent,
            MemoryKind::TimeBased => &self.time_based,
        }
    }

    fn partition_mut(&mut self, kind: MemoryKind) -> &mut Vec<MemoryEntry> {
        match kind {
            MemoryKind::Permanent => &mut self.permanent,
            MemoryKind::TimeBased => &mut self.time_based,
        }
    }

    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            permanent: self.permanent.clone(),
            time_based: self.time_based.clone(),
        }
    }
}

/// Profile-wide memory store with Permanent and TimeBased partitions
pub struct MemoryStore {
    inner: Arc<RwLock<StoreInner>>,
    sink: Option<Arc<dyn MemoryPersistence>>,
}

impl MemoryStore {
    /// Create an empty store with no persistence
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                permanent: Vec::new(),
                time_based: Vec::new(),
                index: HashMap::new(),
            })),
            sink: None,
        }
    }

    /// Attach a write-through persistence sink
    pub fn with_persistence(mut self, sink: Arc<dyn MemoryPersistence>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Rebuild a store from a persisted snapshot.
    ///
    /// Entries violating the kind/expiry invariant or duplicating an id are
    /// rejected; a snapshot written by this store never contains them.
    pub fn from_snapshot(snapshot: MemorySnapshot) -> Result<Self> {
        let mut index = HashMap::new();
        for (kind, entries) in [
            (MemoryKind::Permanent, &snapshot.permanent),
            (MemoryKind::TimeBased, &snapshot.time_based),
        ] {
            for entry in entries {
                if entry.kind != kind {
                    return Err(Error::Validation(format!(
                        "entry {} is in the wrong partition",
                        entry.id
                    )));
                }
                if (entry.kind == MemoryKind::TimeBased) != entry.expires_at.is_some() {
                    return Err(Error::Validation(format!(
                        "entry {} violates the kind/expiry invariant",
                        entry.id
                    )));
                }
                if index.insert(entry.id, kind).is_some() {
                    return Err(Error::Conflict(entry.id));
                }
            }
        }

        Ok(Self {
            inner: Arc::new(RwLock::new(StoreInner {
                permanent: snapshot.permanent,
                time_based: snapshot.time_based,
                index,
            })),
            sink: None,
        })
    }

    /// Insert an entry into the partition matching its kind.
    ///
    /// Never silently overwrites: a duplicate id in either partition fails
    /// with [`Error::Conflict`] and leaves the store unchanged. Insertion is
    /// all-or-nothing; the entry is either fully stored and persisted or not
    /// stored at all.
    pub async fn insert(&self, entry: MemoryEntry) -> Result<()> {
        let mut inner = self.inner.write().await;

        if inner.index.contains_key(&entry.id) {
            return Err(Error::Conflict(entry.id));
        }

        let id = entry.id;
        let kind = entry.kind;
        inner.index.insert(id, kind);
        inner.partition_mut(kind).push(entry);

        if let Err(e) = self.flush(&inner).await {
            // A failed persist must not leave a half-inserted entry
            inner.index.remove(&id);
            inner.partition_mut(kind).retain(|e| e.id != id);
            return Err(e);
        }
        Ok(())
    }

    /// Return the full ordered contents of a partition
    pub async fn get_all(&self, kind: MemoryKind) -> Vec<MemoryEntry> {
        self.inner.read().await.partition(kind).clone()
    }

    /// Look up a single entry by id
    pub async fn get(&self, id: &Uuid) -> Option<MemoryEntry> {
        let inner = self.inner.read().await;
        let kind = *inner.index.get(id)?;
        inner.partition(kind).iter().find(|e| e.id == *id).cloned()
    }

    /// Total entry count across both partitions
    pub async fn len(&self) -> usize {
        self.inner.read().await.index.len()
    }

    /// Whether the store holds no entries
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.index.is_empty()
    }

    /// Remove every TimeBased entry whose `expires_at <= now`.
    ///
    /// Removal is permanent. Returns the number of entries removed;
    /// idempotent, and a no-op sweep does not touch the persistence sink.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.write().await;

        let expired: Vec<Uuid> = inner
            .time_based
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.id)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        inner.time_based.retain(|e| !e.is_expired(now));
        for id in &expired {
            inner.index.remove(id);
        }

        tracing::debug!("Swept {} expired time-based entries", expired.len());
        self.flush(&inner).await?;
        Ok(expired.len())
    }

    /// Atomically replace a whole partition.
    ///
    /// Validates before mutating: every new entry must belong to `kind`, and
    /// no id may collide within the new set or with the other partition. On
    /// any failure the store retains its previous state.
    pub async fn replace_partition(
        &self,
        kind: MemoryKind,
        new_entries: Vec<MemoryEntry>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;

        let mut new_index: HashMap<Uuid, MemoryKind> = inner
            .index
            .iter()
            .filter(|(_, k)| **k != kind)
            .map(|(id, k)| (*id, *k))
            .collect();

        for entry in &new_entries {
            if entry.kind != kind {
                return Err(Error::Validation(format!(
                    "entry {} has kind {:?}, expected {:?}",
                    entry.id, entry.kind, kind
                )));
            }
            if new_index.insert(entry.id, kind).is_some() {
                return Err(Error::Conflict(entry.id));
            }
        }

        let old_entries = std::mem::replace(inner.partition_mut(kind), new_entries);
        let old_index = std::mem::replace(&mut inner.index, new_index);

        if let Err(e) = self.flush(&inner).await {
            // A failed persist must not leave the rewrite visible to readers
            *inner.partition_mut(kind) = old_entries;
            inner.index = old_index;
            return Err(e);
        }
        Ok(())
    }

    /// Snapshot both partitions for serialization
    pub async fn snapshot(&self) -> MemorySnapshot {
        self.inner.read().await.snapshot()
    }

    async fn flush(&self, inner: &StoreInner) -> Result<()> {
        if let Some(sink) = &self.sink {
            sink.save(&inner.snapshot()).await?;
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
