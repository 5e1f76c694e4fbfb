//! Two-tier key-value storage port
//!
//! The host browser exposes two storage areas with very different
//! characteristics: a large, fast `local` tier that stays on the device,
//! and a small `sync` tier that roams across a user's devices but enforces
//! a per-item byte quota. Both are consumed through the [`StorageArea`]
//! trait so the store can be driven by the real extension bridge, the
//! in-memory backend, or the CLI's file backend interchangeably.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// Per-item byte quota of the sync tier.
pub const SYNC_QUOTA_BYTES: usize = 8192;

/// Which storage backend an area represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Local,
    Sync,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Local => write!(f, "local"),
            Tier::Sync => write!(f, "sync"),
        }
    }
}

/// One batch of keys that changed in an area, delivered on the area's
/// change-notification stream.
#[derive(Debug, Clone)]
pub struct StorageChange {
    pub tier: Tier,
    pub keys: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("'{key}' is {size} bytes, over the {quota}-byte per-item quota")]
    QuotaExceeded {
        key: String,
        size: usize,
        quota: usize,
    },
    #[error("storage backend: {0}")]
    Backend(String),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A key-value storage area.
///
/// `set` enforces the per-item quota entry by entry: an oversized entry is
/// rejected with [`StorageError::QuotaExceeded`], never truncated, while
/// in-quota entries of the same batch are still committed. Writers that
/// need all-or-nothing semantics write one entry per call.
#[async_trait]
pub trait StorageArea: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, StorageError>;

    async fn set(&self, entries: HashMap<String, Value>) -> Result<(), StorageError>;

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError>;

    async fn clear(&self) -> Result<(), StorageError>;

    /// Every key currently present in the area.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    fn tier(&self) -> Tier;

    /// Per-item byte quota, or `None` if the area is effectively unbounded.
    fn quota_bytes_per_item(&self) -> Option<usize>;

    /// Subscribe to the area's change-notification stream.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Byte size of a value as it would be persisted, used for quota checks.
pub fn serialized_size(value: &Value) -> usize {
    value.to_string().len()
}

/// Persisted key layout shared by every storage backend.
pub mod keys {
    /// The `SettingsMeta` record.
    pub const META: &str = "settings_v3_meta";
    /// Pre-sharding single-blob settings, read once for migration and then
    /// deleted.
    pub const LEGACY_BLOB: &str = "settings_v2";
    /// Legacy mirror of the selected page index.
    pub const SELECTED_PAGE: &str = "selectedPage";
    pub const DARK_MODE: &str = "darkMode";
    /// Epoch millis of the last successful sync-tier mirror.
    pub const LAST_SYNC_TIME: &str = "last_sync_time";
    /// Review-nag bookkeeping record.
    pub const REVIEW_PROMPT: &str = "reviewPrompt";

    pub fn page(index: u32) -> String {
        format!("page_{index}")
    }

    /// Parse a `page_<n>` key back into its shard index.
    pub fn page_index(key: &str) -> Option<u32> {
        key.strip_prefix("page_")?.parse().ok()
    }

    /// Keys whose change should cause rules to be re-derived.
    pub fn is_settings_key(key: &str) -> bool {
        key == META || key == SELECTED_PAGE || page_index(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_keys_round_trip() {
        assert_eq!(keys::page(0), "page_0");
        assert_eq!(keys::page_index("page_12"), Some(12));
        assert_eq!(keys::page_index("page_"), None);
        assert_eq!(keys::page_index("settings_v3_meta"), None);
    }

    #[test]
    fn settings_keys_trigger_rule_rederivation() {
        assert!(keys::is_settings_key(keys::META));
        assert!(keys::is_settings_key(keys::SELECTED_PAGE));
        assert!(keys::is_settings_key("page_3"));
        assert!(!keys::is_settings_key(keys::DARK_MODE));
        assert!(!keys::is_settings_key(keys::LAST_SYNC_TIME));
    }
}
