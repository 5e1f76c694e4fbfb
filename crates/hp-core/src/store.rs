//! The settings store
//!
//! Owns the canonical in-memory settings graph and mediates every read and
//! write against the two storage tiers. The local tier is the
//! authoritative fast-write target; the sync tier is mirrored
//! opportunistically by a periodic job and consulted on load only when the
//! local tier is empty.
//!
//! Persistence is sharded: one `page_<n>` entry per page plus a small meta
//! record, so a single large graph cannot overflow the sync tier's
//! per-item quota. An oversized page is skipped with a surfaced error; it
//! never aborts the writes of its siblings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::migrate::{migrate_v2, LegacyPagesData, SCHEMA_V3};
use crate::storage::{keys, serialized_size, StorageArea, StorageError};
use crate::types::{Page, Settings, SettingsMeta};

/// How long saves stay suppressed after a failed save, to avoid retry
/// storms against a broken backend.
pub const SAVE_ERROR_COOLDOWN: Duration = Duration::from_secs(60);

pub const REVIEW_PROMPT_MIN_SAVES: u64 = 25;
pub const REVIEW_PROMPT_INTERVAL_MILLIS: u64 = 14 * 24 * 60 * 60 * 1000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("save suppressed for {retry_in_secs}s after a recent save failure")]
    CooldownActive { retry_in_secs: u64 },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A page that was too large for its target tier and was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPage {
    pub page_id: u32,
    pub size: usize,
    pub quota: usize,
}

#[derive(Debug, Default)]
pub struct SaveReport {
    /// True when a save was already in flight and this request was folded
    /// into its trailing re-save.
    pub deferred: bool,
    pub pages_written: usize,
    pub skipped: Vec<SkippedPage>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub pages_mirrored: usize,
    pub skipped: Vec<SkippedPage>,
}

/// Review-nag bookkeeping stored under the `reviewPrompt` key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPromptState {
    #[serde(default)]
    pub save_count: u64,
    #[serde(default)]
    pub last_prompted_at: Option<u64>,
    #[serde(default)]
    pub dismissed: bool,
}

impl ReviewPromptState {
    pub fn should_prompt(&self, now_millis: u64) -> bool {
        if self.dismissed || self.save_count < REVIEW_PROMPT_MIN_SAVES {
            return false;
        }
        match self.last_prompted_at {
            None => true,
            Some(at) => now_millis.saturating_sub(at) >= REVIEW_PROMPT_INTERVAL_MILLIS,
        }
    }
}

pub struct SettingsStore {
    local: Arc<dyn StorageArea>,
    sync: Arc<dyn StorageArea>,
    state: RwLock<Settings>,
    saving: AtomicBool,
    pending: AtomicBool,
    last_save_error: Mutex<Option<Instant>>,
}

impl SettingsStore {
    pub fn new(local: Arc<dyn StorageArea>, sync: Arc<dyn StorageArea>) -> Self {
        Self {
            local,
            sync,
            state: RwLock::new(Settings::default()),
            saving: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            last_save_error: Mutex::new(None),
        }
    }

    pub fn local_area(&self) -> Arc<dyn StorageArea> {
        Arc::clone(&self.local)
    }

    pub fn sync_area(&self) -> Arc<dyn StorageArea> {
        Arc::clone(&self.sync)
    }

    /// Snapshot of the current in-memory graph.
    pub async fn settings(&self) -> Settings {
        self.state.read().await.clone()
    }

    /// Apply a mutation to the in-memory graph, then persist it. The graph
    /// is updated synchronously so readers see the edit immediately even if
    /// the save ends up deferred or suppressed.
    pub async fn update<F, R>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Settings) -> R,
    {
        let result = {
            let mut state = self.state.write().await;
            mutate(&mut state)
        };
        self.save().await?;
        Ok(result)
    }

    // =========================================================================
    // Load
    // =========================================================================

    /// Load the graph: sharded layout from local, else sync; else migrate a
    /// legacy v2 blob; else install the default graph. The loaded graph
    /// becomes the store's in-memory state.
    pub async fn load(&self) -> Result<Settings, StoreError> {
        if let Some(settings) = self.load_sharded().await? {
            *self.state.write().await = settings.clone();
            return Ok(settings);
        }

        if let Some(settings) = self.load_legacy().await? {
            *self.state.write().await = settings.clone();
            self.save().await?;
            // The legacy blob is deleted only once the sharded layout has
            // been written out.
            self.local.remove(&[keys::LEGACY_BLOB.to_string()]).await?;
            self.sync.remove(&[keys::LEGACY_BLOB.to_string()]).await?;
            return Ok(settings);
        }

        debug!("no stored settings found, installing the default page");
        let settings = Settings::default();
        *self.state.write().await = settings.clone();
        self.save().await?;
        Ok(settings)
    }

    async fn load_sharded(&self) -> Result<Option<Settings>, StoreError> {
        let (area, meta) = match read_meta(self.local.as_ref()).await? {
            Some(meta) => (&self.local, meta),
            None => match read_meta(self.sync.as_ref()).await? {
                Some(meta) => (&self.sync, meta),
                None => return Ok(None),
            },
        };

        if meta.version != SCHEMA_V3 {
            debug!("meta record carries schema version {}", meta.version);
        }

        // Fan out the shard reads and await them together.
        let shard_keys: Vec<String> = (0..meta.page_count).map(keys::page).collect();
        let reads = shard_keys.iter().map(|key| area.get(key));
        let mut results = Vec::with_capacity(meta.page_count as usize);
        for (i, result) in join_all(reads).await.into_iter().enumerate() {
            match result? {
                Some(value) if !value.is_null() => {
                    match serde_json::from_value::<Page>(value) {
                        Ok(page) => results.push(page),
                        Err(e) => warn!("dropping unreadable page shard {i}: {e}"),
                    }
                }
                // Missing or null shards are dropped, not an error.
                _ => {}
            }
        }

        if results.is_empty() {
            return Ok(Some(Settings::default()));
        }

        let mut settings = Settings { pages: results };
        settings.reindex();
        settings.select_page(meta.selected_page);
        Ok(Some(settings))
    }

    async fn load_legacy(&self) -> Result<Option<Settings>, StoreError> {
        for area in [&self.local, &self.sync] {
            let Some(value) = area.get(keys::LEGACY_BLOB).await? else {
                continue;
            };
            match serde_json::from_value::<LegacyPagesData>(value) {
                Ok(legacy) => {
                    debug!("migrating legacy settings blob from the {} tier", area.tier());
                    return Ok(Some(migrate_v2(legacy)));
                }
                Err(e) => {
                    warn!("ignoring unreadable legacy blob in the {} tier: {e}", area.tier());
                }
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Save
    // =========================================================================

    /// Persist the in-memory graph to the local tier.
    ///
    /// Single-flight: while a save is running, further calls coalesce into
    /// at most one trailing re-save that picks up the latest graph. The
    /// guard is advisory within this process only; writers in other
    /// processes remain last-write-wins at the storage layer.
    pub async fn save(&self) -> Result<SaveReport, StoreError> {
        if self.saving.swap(true, Ordering::AcqRel) {
            self.pending.store(true, Ordering::Release);
            return Ok(SaveReport {
                deferred: true,
                ..SaveReport::default()
            });
        }

        let mut result = self.save_once().await;
        while self.pending.swap(false, Ordering::AcqRel) {
            result = self.save_once().await;
        }
        self.saving.store(false, Ordering::Release);
        result
    }

    async fn save_once(&self) -> Result<SaveReport, StoreError> {
        if let Some(remaining) = self.cooldown_remaining() {
            let retry_in_secs = remaining.as_secs().max(1);
            warn!("save suppressed: a save failed recently, retrying in {retry_in_secs}s");
            return Err(StoreError::CooldownActive { retry_in_secs });
        }

        match self.write_graph().await {
            Ok(report) => {
                self.clear_save_failure();
                if let Err(e) = self.bump_review_counter().await {
                    debug!("review prompt bookkeeping failed: {e}");
                }
                Ok(report)
            }
            Err(e) => {
                self.note_save_failure();
                Err(e)
            }
        }
    }

    async fn write_graph(&self) -> Result<SaveReport, StoreError> {
        let settings = self.state.read().await.clone();
        let meta = SettingsMeta {
            version: SCHEMA_V3,
            selected_page: settings.selected_page(),
            page_count: settings.pages.len() as u32,
        };

        let mut report = SaveReport::default();
        let quota = self.local.quota_bytes_per_item();

        // One entry per write so an oversized page skips without touching
        // its siblings.
        let mut batches: Vec<HashMap<String, Value>> = vec![HashMap::from([
            (keys::META.to_string(), serde_json::to_value(meta)?),
            (
                keys::SELECTED_PAGE.to_string(),
                Value::from(meta.selected_page),
            ),
        ])];

        for page in &settings.pages {
            let value = serde_json::to_value(page)?;
            if let Some(quota) = quota {
                let size = serialized_size(&value);
                if size > quota {
                    warn!(
                        "page {} '{}' is {size} bytes, over the {quota}-byte quota; not saved",
                        page.id, page.name
                    );
                    report.skipped.push(SkippedPage {
                        page_id: page.id,
                        size,
                        quota,
                    });
                    continue;
                }
            }
            report.pages_written += 1;
            batches.push(HashMap::from([(keys::page(page.id), value)]));
        }

        for result in join_all(batches.into_iter().map(|b| self.local.set(b))).await {
            result?;
        }

        // Drop shards left over from a previously larger page set.
        let stale: Vec<String> = self
            .local
            .keys()
            .await?
            .into_iter()
            .filter(|k| keys::page_index(k).is_some_and(|i| i >= meta.page_count))
            .collect();
        if !stale.is_empty() {
            debug!("removing {} stale page shard(s)", stale.len());
            self.local.remove(&stale).await?;
        }

        Ok(report)
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        let last = self.last_save_error.lock().expect("save-error lock poisoned");
        let at = (*last)?;
        let elapsed = at.elapsed();
        if elapsed < SAVE_ERROR_COOLDOWN {
            Some(SAVE_ERROR_COOLDOWN - elapsed)
        } else {
            None
        }
    }

    fn note_save_failure(&self) {
        *self.last_save_error.lock().expect("save-error lock poisoned") = Some(Instant::now());
    }

    fn clear_save_failure(&self) {
        *self.last_save_error.lock().expect("save-error lock poisoned") = None;
    }

    // =========================================================================
    // Sync mirroring
    // =========================================================================

    /// Mirror the local tier's current meta and page shards into the sync
    /// tier, skipping pages over the sync quota. Runs on a fixed interval
    /// independent of user edits; a skipped page is reported and logged,
    /// never fatal.
    pub async fn sync_to_remote(&self) -> Result<SyncReport, StoreError> {
        let Some(meta_value) = self.local.get(keys::META).await? else {
            debug!("nothing to mirror: the local tier holds no meta record");
            return Ok(SyncReport::default());
        };
        let meta: SettingsMeta = serde_json::from_value(meta_value.clone())?;

        let page_keys: Vec<String> = (0..meta.page_count).map(keys::page).collect();
        let shards = self.local.get_many(&page_keys).await?;
        let quota = self.sync.quota_bytes_per_item();

        let mut report = SyncReport::default();
        for (index, key) in page_keys.iter().enumerate() {
            let Some(value) = shards.get(key) else {
                continue;
            };
            if let Some(quota) = quota {
                let size = serialized_size(value);
                if size > quota {
                    warn!("page {index} exceeds the sync quota ({size} > {quota} bytes); skipped");
                    report.skipped.push(SkippedPage {
                        page_id: index as u32,
                        size,
                        quota,
                    });
                    continue;
                }
            }
            self.sync
                .set(HashMap::from([(key.clone(), value.clone())]))
                .await?;
            report.pages_mirrored += 1;
        }

        let mut entries = HashMap::from([(keys::META.to_string(), meta_value)]);
        if let Some(selected) = self.local.get(keys::SELECTED_PAGE).await? {
            entries.insert(keys::SELECTED_PAGE.to_string(), selected);
        }
        if let Some(dark) = self.local.get(keys::DARK_MODE).await? {
            entries.insert(keys::DARK_MODE.to_string(), dark);
        }
        self.sync.set(entries).await?;

        // Mirrored shards past the current count would resurrect deleted
        // pages on another device.
        let stale: Vec<String> = self
            .sync
            .keys()
            .await?
            .into_iter()
            .filter(|k| keys::page_index(k).is_some_and(|i| i >= meta.page_count))
            .collect();
        if !stale.is_empty() {
            self.sync.remove(&stale).await?;
        }

        self.local
            .set(HashMap::from([(
                keys::LAST_SYNC_TIME.to_string(),
                Value::from(now_millis()),
            )]))
            .await?;

        Ok(report)
    }

    /// Run [`Self::sync_to_remote`] on a fixed interval until the task is
    /// aborted. Failures are logged and the loop keeps going.
    pub fn spawn_sync_loop(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.sync_to_remote().await {
                    Ok(report) if !report.skipped.is_empty() => {
                        warn!("sync pass skipped {} page(s) over quota", report.skipped.len());
                    }
                    Ok(_) => {}
                    Err(e) => warn!("periodic sync failed: {e}"),
                }
            }
        })
    }

    // =========================================================================
    // Import / export
    // =========================================================================

    /// Import a JSON array of page-shaped objects. Anything that is not an
    /// array of pages is silently ignored; there is no partial import.
    /// Imported ids are remapped to avoid collisions with existing pages.
    pub async fn import_json(&self, json: &str) -> Result<usize, StoreError> {
        let Ok(value) = serde_json::from_str::<Value>(json) else {
            debug!("import ignored: input is not valid JSON");
            return Ok(0);
        };
        let Value::Array(items) = value else {
            debug!("import ignored: input is not a JSON array");
            return Ok(0);
        };

        let mut pages = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<Page>(item) {
                Ok(page) => pages.push(page),
                Err(e) => {
                    debug!("import ignored: entry is not a page: {e}");
                    return Ok(0);
                }
            }
        }
        if pages.is_empty() {
            return Ok(0);
        }

        self.update(|settings| settings.import_pages(pages)).await
    }

    /// Export the pages as a pretty-printed JSON array, the same shape
    /// import consumes.
    pub async fn export_json(&self) -> Result<String, StoreError> {
        let pages = self.state.read().await.export_pages();
        Ok(serde_json::to_string_pretty(&pages)?)
    }

    // =========================================================================
    // Auxiliary records
    // =========================================================================

    pub async fn dark_mode(&self) -> Result<bool, StoreError> {
        Ok(self
            .local
            .get(keys::DARK_MODE)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    pub async fn set_dark_mode(&self, on: bool) -> Result<(), StoreError> {
        self.local
            .set(HashMap::from([(keys::DARK_MODE.to_string(), Value::from(on))]))
            .await?;
        Ok(())
    }

    pub async fn review_prompt(&self) -> Result<ReviewPromptState, StoreError> {
        Ok(match self.local.get(keys::REVIEW_PROMPT).await? {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => ReviewPromptState::default(),
        })
    }

    pub async fn mark_review_prompted(&self) -> Result<(), StoreError> {
        let mut state = self.review_prompt().await?;
        state.last_prompted_at = Some(now_millis());
        self.write_review_prompt(state).await
    }

    pub async fn dismiss_review_prompt(&self) -> Result<(), StoreError> {
        let mut state = self.review_prompt().await?;
        state.dismissed = true;
        self.write_review_prompt(state).await
    }

    async fn bump_review_counter(&self) -> Result<(), StoreError> {
        let mut state = self.review_prompt().await?;
        state.save_count += 1;
        self.write_review_prompt(state).await
    }

    async fn write_review_prompt(&self, state: ReviewPromptState) -> Result<(), StoreError> {
        self.local
            .set(HashMap::from([(
                keys::REVIEW_PROMPT.to_string(),
                serde_json::to_value(state)?,
            )]))
            .await?;
        Ok(())
    }

    // =========================================================================
    // Reset
    // =========================================================================

    /// Clear both tiers and reinstate the default graph.
    pub async fn reset_all(&self) -> Result<(), StoreError> {
        self.local.clear().await?;
        self.sync.clear().await?;
        self.clear_save_failure();
        *self.state.write().await = Settings::default();
        self.save().await?;
        Ok(())
    }
}

async fn read_meta(area: &dyn StorageArea) -> Result<Option<SettingsMeta>, StoreError> {
    match area.get(keys::META).await? {
        Some(value) => match serde_json::from_value(value) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                warn!("ignoring unreadable meta record in the {} tier: {e}", area.tier());
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryArea;
    use crate::storage::{StorageChange, Tier};
    use crate::types::{HeaderKind, DEFAULT_PAGE_NAME};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::{broadcast, Semaphore};

    fn fresh_store() -> SettingsStore {
        SettingsStore::new(Arc::new(MemoryArea::local()), Arc::new(MemoryArea::sync()))
    }

    #[tokio::test]
    async fn fresh_install_creates_default_graph() {
        let store = fresh_store();
        let settings = store.load().await.unwrap();

        assert_eq!(settings.pages.len(), 1);
        assert_eq!(settings.pages[0].name, DEFAULT_PAGE_NAME);
        assert_eq!(settings.selected_page(), 0);
        assert_eq!(settings.pages[0].headers[0].name, "X-Frame-Options");

        // The default graph is persisted in sharded form right away.
        let local = store.local_area();
        assert!(local.get(keys::META).await.unwrap().is_some());
        assert!(local.get("page_0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn load_after_save_round_trips_the_graph() {
        let local = Arc::new(MemoryArea::local());
        let sync = Arc::new(MemoryArea::sync());

        let store = SettingsStore::new(local.clone(), sync.clone());
        store.load().await.unwrap();
        store
            .update(|s| {
                s.add_page("Work");
                s.select_page(1);
                s.add_header(1);
                let header = &mut s.page_mut(1).unwrap().headers[0];
                header.name = "X-Env".to_string();
                header.value = "staging".to_string();
                header.kind = HeaderKind::Response;
                s.add_filter(1);
                s.page_mut(1).unwrap().filters[0].value = "api\\..*".to_string();
            })
            .await
            .unwrap();
        let saved = store.settings().await;

        let reloaded_store = SettingsStore::new(local, sync);
        let reloaded = reloaded_store.load().await.unwrap();
        assert_eq!(reloaded, saved);
        assert_eq!(reloaded.selected_page(), 1);
    }

    #[tokio::test]
    async fn meta_falls_back_to_sync_tier() {
        let sync = Arc::new(MemoryArea::sync());
        let mut page = Page::new("Roamed");
        page.enabled = true;
        sync.set(HashMap::from([
            (
                keys::META.to_string(),
                json!({"version": 3, "selectedPage": 0, "pageCount": 1}),
            ),
            ("page_0".to_string(), serde_json::to_value(&page).unwrap()),
        ]))
        .await
        .unwrap();

        let store = SettingsStore::new(Arc::new(MemoryArea::local()), sync);
        let settings = store.load().await.unwrap();
        assert_eq!(settings.pages.len(), 1);
        assert_eq!(settings.pages[0].name, "Roamed");
    }

    #[tokio::test]
    async fn legacy_blob_migrates_into_shards() {
        let local = Arc::new(MemoryArea::local());
        local
            .set(HashMap::from([(
                keys::LEGACY_BLOB.to_string(),
                json!({
                    "pages": [
                        {"name": "Old A", "headers": [
                            {"headerName": "X-Old", "headerValue": "1", "headerEnabled": true}
                        ]},
                        {"name": "Old B"}
                    ],
                    "selectedPage": 1
                }),
            )]))
            .await
            .unwrap();

        let store = SettingsStore::new(local.clone(), Arc::new(MemoryArea::sync()));
        let settings = store.load().await.unwrap();

        assert_eq!(settings.pages.len(), 2);
        assert_eq!(settings.selected_page(), 1);
        assert_eq!(settings.pages[0].headers[0].kind, HeaderKind::Request);

        // Sharded layout written, legacy key deleted.
        assert!(local.get(keys::META).await.unwrap().is_some());
        assert!(local.get("page_1").await.unwrap().is_some());
        assert!(local.get(keys::LEGACY_BLOB).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_shards_are_dropped_without_error() {
        let local = Arc::new(MemoryArea::local());
        let mut page = Page::new("Survivor");
        page.enabled = true;
        local
            .set(HashMap::from([
                (
                    keys::META.to_string(),
                    json!({"version": 3, "selectedPage": 0, "pageCount": 3}),
                ),
                ("page_1".to_string(), serde_json::to_value(&page).unwrap()),
            ]))
            .await
            .unwrap();

        let store = SettingsStore::new(local, Arc::new(MemoryArea::sync()));
        let settings = store.load().await.unwrap();

        assert_eq!(settings.pages.len(), 1);
        assert_eq!(settings.pages[0].id, 0);
        assert_eq!(settings.pages[0].name, "Survivor");
    }

    #[tokio::test]
    async fn stale_shards_are_removed_when_the_graph_shrinks() {
        let store = fresh_store();
        store.load().await.unwrap();
        store
            .update(|s| {
                s.add_page("A");
                s.add_page("B");
            })
            .await
            .unwrap();

        let local = store.local_area();
        assert!(local.get("page_2").await.unwrap().is_some());

        store
            .update(|s| {
                s.remove_page(2);
                s.remove_page(1);
            })
            .await
            .unwrap();

        assert!(local.get("page_0").await.unwrap().is_some());
        assert!(local.get("page_1").await.unwrap().is_none());
        assert!(local.get("page_2").await.unwrap().is_none());
    }

    struct FailingArea {
        inner: MemoryArea,
        fail_writes: AtomicBool,
    }

    impl FailingArea {
        fn new() -> Self {
            Self {
                inner: MemoryArea::local(),
                fail_writes: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl StorageArea for FailingArea {
        async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
            self.inner.get(key).await
        }

        async fn get_many(
            &self,
            keys: &[String],
        ) -> Result<HashMap<String, Value>, StorageError> {
            self.inner.get_many(keys).await
        }

        async fn set(&self, entries: HashMap<String, Value>) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::Acquire) {
                return Err(StorageError::Backend("injected write failure".to_string()));
            }
            self.inner.set(entries).await
        }

        async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
            self.inner.remove(keys).await
        }

        async fn clear(&self) -> Result<(), StorageError> {
            self.inner.clear().await
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

    #[tokio::test]
    async fn failed_save_engages_the_cooldown() {
        let local = Arc::new(FailingArea::new());
        let store = SettingsStore::new(local.clone(), Arc::new(MemoryArea::sync()));
        store.load().await.unwrap();

        local.fail_writes.store(true, Ordering::Release);
        let err = store
            .update(|s| s.rename_page(0, "Broken"))
            .await
            .expect_err("save against a failing backend should error");
        assert!(matches!(err, StoreError::Storage(_)));

        // The backend recovers, but saves stay suppressed for the cooldown.
        local.fail_writes.store(false, Ordering::Release);
        let err = store.save().await.expect_err("cooldown should suppress");
        assert!(matches!(err, StoreError::CooldownActive { .. }));
    }

    #[tokio::test]
    async fn oversized_page_skips_sync_mirror_but_not_local_saves() {
        let local = Arc::new(MemoryArea::local());
        let sync = Arc::new(MemoryArea::sync());
        let store = SettingsStore::new(local.clone(), sync.clone());
        store.load().await.unwrap();

        store
            .update(|s| {
                s.add_page("Big");
                s.add_header(1);
                s.page_mut(1).unwrap().headers[0].value = "x".repeat(2 * 8192);
            })
            .await
            .unwrap();

        let report = store.sync_to_remote().await.unwrap();
        assert_eq!(report.pages_mirrored, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].page_id, 1);
        assert!(sync.get("page_0").await.unwrap().is_some());
        assert!(sync.get("page_1").await.unwrap().is_none());
        assert!(local.get(keys::LAST_SYNC_TIME).await.unwrap().is_some());

        // Sync-quota overflow must not raise the local cooldown.
        let report = store.save().await.unwrap();
        assert!(!report.deferred);
        assert!(report.skipped.is_empty());
        assert!(local.get("page_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn import_silently_ignores_malformed_input() {
        let store = fresh_store();
        store.load().await.unwrap();

        assert_eq!(store.import_json("{\"not\": \"an array\"}").await.unwrap(), 0);
        assert_eq!(store.import_json("not json at all").await.unwrap(), 0);
        assert_eq!(store.import_json("[{\"noName\": true}]").await.unwrap(), 0);
        assert_eq!(store.settings().await.pages.len(), 1);

        let count = store
            .import_json(r#"[{"name": "A"}, {"name": "B", "headers": [
                {"headerName": "X-Legacy", "headerValue": "1", "headerEnabled": true}
            ]}]"#)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let settings = store.settings().await;
        let ids: Vec<u32> = settings.pages.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(
            settings.page(2).unwrap().headers[0].kind,
            HeaderKind::Request
        );
    }

    struct GatedArea {
        inner: MemoryArea,
        gate: Semaphore,
    }

    #[async_trait]
    impl StorageArea for GatedArea {
        async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
            self.inner.get(key).await
        }

        async fn get_many(
            &self,
            keys: &[String],
        ) -> Result<HashMap<String, Value>, StorageError> {
            self.inner.get_many(keys).await
        }

        async fn set(&self, entries: HashMap<String, Value>) -> Result<(), StorageError> {
            self.gate
                .acquire()
                .await
                .expect("gate closed")
                .forget();
            self.inner.set(entries).await
        }

        async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
            self.inner.remove(keys).await
        }

        async fn clear(&self) -> Result<(), StorageError> {
            self.inner.clear().await
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

    #[tokio::test]
    async fn concurrent_save_is_deferred_and_coalesced() {
        let local = Arc::new(GatedArea {
            inner: MemoryArea::local(),
            gate: Semaphore::new(0),
        });
        let store = Arc::new(SettingsStore::new(
            local.clone(),
            Arc::new(MemoryArea::sync()),
        ));

        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.update(|s| s.rename_page(0, "First")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The first save is parked on the gate; this one must fold into it.
        let report = store.save().await.unwrap();
        assert!(report.deferred);

        local.gate.add_permits(1000);
        first.await.unwrap().unwrap();

        let page = local.inner.get("page_0").await.unwrap().unwrap();
        assert_eq!(page["name"], "First");
    }

    #[tokio::test]
    async fn periodic_sync_mirrors_without_user_edits() {
        let store = Arc::new(fresh_store());
        store.load().await.unwrap();

        let ticker = store.spawn_sync_loop(Duration::from_millis(10));

        let sync = store.sync_area();
        let mut mirrored = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if sync.get(keys::META).await.unwrap().is_some() {
                mirrored = true;
                break;
            }
        }
        assert!(mirrored);
        assert!(sync.get("page_0").await.unwrap().is_some());

        ticker.abort();
    }

    #[tokio::test]
    async fn reset_reinstates_the_default_graph() {
        let store = fresh_store();
        store.load().await.unwrap();
        store
            .update(|s| {
                s.add_page("Custom");
                s.select_page(1);
            })
            .await
            .unwrap();

        store.reset_all().await.unwrap();

        let settings = store.settings().await;
        assert_eq!(settings.pages.len(), 1);
        assert_eq!(settings.pages[0].name, DEFAULT_PAGE_NAME);
        assert!(store.local_area().get("page_1").await.unwrap().is_none());
        assert!(store.sync_area().get("page_0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dark_mode_round_trips() {
        let store = fresh_store();
        assert!(!store.dark_mode().await.unwrap());
        store.set_dark_mode(true).await.unwrap();
        assert!(store.dark_mode().await.unwrap());
    }

    #[tokio::test]
    async fn review_prompt_counts_saves_and_respects_dismissal() {
        let store = fresh_store();
        store.load().await.unwrap();
        store.update(|s| s.rename_page(0, "One")).await.unwrap();

        let state = store.review_prompt().await.unwrap();
        assert!(state.save_count >= 2);

        store.mark_review_prompted().await.unwrap();
        assert!(store
            .review_prompt()
            .await
            .unwrap()
            .last_prompted_at
            .is_some());

        store.dismiss_review_prompt().await.unwrap();
        assert!(store.review_prompt().await.unwrap().dismissed);
    }

    #[test]
    fn review_prompt_policy_thresholds() {
        let now = 1_700_000_000_000u64;
        let mut state = ReviewPromptState {
            save_count: REVIEW_PROMPT_MIN_SAVES,
            last_prompted_at: None,
            dismissed: false,
        };
        assert!(state.should_prompt(now));

        state.last_prompted_at = Some(now);
        assert!(!state.should_prompt(now + 1000));
        assert!(state.should_prompt(now + REVIEW_PROMPT_INTERVAL_MILLIS));

        state.dismissed = true;
        assert!(!state.should_prompt(now + REVIEW_PROMPT_INTERVAL_MILLIS));

        let early = ReviewPromptState {
            save_count: REVIEW_PROMPT_MIN_SAVES - 1,
            last_prompted_at: None,
            dismissed: false,
        };
        assert!(!early.should_prompt(now));
    }
}
