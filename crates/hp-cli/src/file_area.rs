//! JSON-file storage backend
//!
//! Persists one storage tier as a single pretty-printed JSON object so a
//! profile directory can be inspected and diffed by hand. Quota and
//! change-notification behavior come from the wrapped in-memory area; every
//! mutation is flushed to disk, including the committed part of a batch
//! that also contained an over-quota entry.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use hp_core::memory::MemoryArea;
use hp_core::storage::{StorageArea, StorageChange, StorageError, Tier};

pub struct FileArea {
    path: PathBuf,
    inner: MemoryArea,
}

impl FileArea {
    pub fn open(path: PathBuf, tier: Tier, quota: Option<usize>) -> Result<Self, StorageError> {
        let entries = if path.exists() {
            let text = fs::read_to_string(&path)
                .map_err(|e| StorageError::Backend(format!("reading {}: {e}", path.display())))?;
            serde_json::from_str::<HashMap<String, Value>>(&text)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            inner: MemoryArea::with_entries(tier, quota, entries),
        })
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let snapshot = self.inner.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&self.path, json)
            .map_err(|e| StorageError::Backend(format!("writing {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl StorageArea for FileArea {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.inner.get(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, StorageError> {
        self.inner.get_many(keys).await
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<(), StorageError> {
        let result = self.inner.set(entries).await;
        self.persist().await?;
        result
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        self.inner.remove(keys).await?;
        self.persist().await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.inner.clear().await?;
        self.persist().await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.inner.keys().await
    }

    fn tier(&self) -> Tier {
        self.inner.tier()
    }

    fn quota_bytes_per_item(&self) -> Option<usize> {
        self.inner.quota_bytes_per_item()
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.subscribe()
    }
}
