//! Versioned storage schema migrations
//!
//! Each schema bump gets one explicit migration function instead of ad hoc
//! per-field fallbacks scattered across read paths. v2 stored the whole
//! graph as a single blob; v3 shards it into per-page entries plus a meta
//! record so the sync tier's per-item quota cannot be overflowed by one
//! large graph.

use serde::Deserialize;

use crate::types::{Page, Settings};

pub const SCHEMA_V2: u32 = 2;
pub const SCHEMA_V3: u32 = 3;

/// The v2 single-blob layout, kept only as a migration source.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPagesData {
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default)]
    pub selected_page: u32,
}

/// v2 -> v3: lift the blob into an in-memory graph with the invariants
/// re-established. Missing `headerType` fields were already backfilled to
/// `request` by deserialization. The caller persists the sharded layout and
/// deletes the legacy key.
pub fn migrate_v2(legacy: LegacyPagesData) -> Settings {
    if legacy.pages.is_empty() {
        return Settings::default();
    }
    let mut settings = Settings {
        pages: legacy.pages,
    };
    settings.reindex();
    settings.select_page(legacy.selected_page);
    settings
}
