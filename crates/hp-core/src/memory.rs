//! In-memory storage backend
//!
//! Backs the store in tests and serves as the base for the CLI's
//! file-backed areas. Behaves like the browser areas: per-item quota
//! enforcement on write and a change-notification stream.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::storage::{
    serialized_size, StorageArea, StorageChange, StorageError, Tier, SYNC_QUOTA_BYTES,
};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

pub struct MemoryArea {
    tier: Tier,
    quota: Option<usize>,
    entries: RwLock<HashMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryArea {
    pub fn new(tier: Tier, quota: Option<usize>) -> Self {
        Self::with_entries(tier, quota, HashMap::new())
    }

    /// An area pre-seeded with entries, bypassing quota checks (the entries
    /// were accepted by a previous writer).
    pub fn with_entries(tier: Tier, quota: Option<usize>, entries: HashMap<String, Value>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tier,
            quota,
            entries: RwLock::new(entries),
            changes,
        }
    }

    /// An unbounded local-tier area.
    pub fn local() -> Self {
        Self::new(Tier::Local, None)
    }

    /// A sync-tier area with the browser's per-item quota.
    pub fn sync() -> Self {
        Self::new(Tier::Sync, Some(SYNC_QUOTA_BYTES))
    }

    /// Copy of the full key-value map.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.read().await.clone()
    }

    fn notify(&self, changed: Vec<String>) {
        if changed.is_empty() {
            return;
        }
        // No receivers is fine; the send result only reports that.
        let _ = self.changes.send(StorageChange {
            tier: self.tier,
            keys: changed,
        });
    }
}

#[async_trait]
impl StorageArea for MemoryArea {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, StorageError> {
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<(), StorageError> {
        let mut rejected: Option<StorageError> = None;
        let mut written = Vec::new();
        {
            let mut map = self.entries.write().await;
            for (key, value) in entries {
                if let Some(quota) = self.quota {
                    let size = serialized_size(&value);
                    if size > quota {
                        if rejected.is_none() {
                            rejected = Some(StorageError::QuotaExceeded { key, size, quota });
                        }
                        continue;
                    }
                }
                map.insert(key.clone(), value);
                written.push(key);
            }
        }
        self.notify(written);
        match rejected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut removed = Vec::new();
        {
            let mut map = self.entries.write().await;
            for key in keys {
                if map.remove(key).is_some() {
                    removed.push(key.clone());
                }
            }
        }
        self.notify(removed);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let removed: Vec<String> = {
            let mut map = self.entries.write().await;
            let keys = map.keys().cloned().collect();
            map.clear();
            keys
        };
        self.notify(removed);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    fn quota_bytes_per_item(&self) -> Option<usize> {
        self.quota
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
