//! Apply pipeline
//!
//! Replaces whatever dynamic rule set the engine currently holds with the
//! rules compiled from the current settings graph. There is no incremental
//! diffing: the old ids are removed and the fresh rules added in one batch.
//! Any error leaves the engine's installed rules untouched; the next
//! relevant storage change re-runs the whole pipeline from scratch.

use std::sync::Arc;

use log::{debug, error, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use hp_core::engine::{EngineError, RuleEngine};
use hp_core::storage::keys;
use hp_core::store::SettingsStore;
use hp_core::types::Settings;

use crate::alloc::RuleIdAllocator;
use crate::builder::compile_rules;

/// Compile the graph and submit one full-replace batch to the engine.
/// Returns the number of rules now installed for the graph.
pub async fn apply_settings(
    settings: &Settings,
    engine: &dyn RuleEngine,
) -> Result<usize, EngineError> {
    let old = engine.get_dynamic_rules().await?;
    let old_ids: Vec<u32> = old.iter().map(|r| r.id).collect();

    let mut ids = RuleIdAllocator::new(old_ids.iter().copied());
    let rules = compile_rules(&settings.pages, &mut ids);
    let added = rules.len();

    engine.update_dynamic_rules(old_ids, rules).await?;
    debug!("replaced {} installed rule(s) with {added}", old.len());
    Ok(added)
}

/// Watch both tiers' change streams and re-derive the rules whenever the
/// meta record, a page shard or the selection mirror changes. This covers
/// edits from any writer, including the periodic sync job's own mirror
/// pass.
pub fn spawn_watcher(store: Arc<SettingsStore>, engine: Arc<dyn RuleEngine>) -> JoinHandle<()> {
    let mut local = store.local_area().subscribe();
    let mut sync = store.sync_area().subscribe();
    tokio::spawn(async move {
        loop {
            let change = tokio::select! {
                change = local.recv() => change,
                change = sync.recv() => change,
            };
            match change {
                Ok(change) => {
                    if !change.keys.iter().any(|k| keys::is_settings_key(k)) {
                        continue;
                    }
                    reapply(&store, engine.as_ref()).await;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("storage change stream lagged by {missed}; re-applying");
                    reapply(&store, engine.as_ref()).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn reapply(store: &SettingsStore, engine: &dyn RuleEngine) {
    match store.load().await {
        Ok(settings) => {
            if let Err(e) = apply_settings(&settings, engine).await {
                error!("rule update failed, keeping the previous rules: {e}");
            }
        }
        Err(e) => error!("reloading settings after a storage change failed: {e}"),
    }
}
