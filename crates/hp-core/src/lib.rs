//! HeadPages Core Library
//!
//! This crate provides the settings model and persistence layer for the
//! HeadPages header-override extension. A user defines named "pages" of
//! HTTP request/response header overrides and URL filters; this crate owns
//! the canonical in-memory graph and keeps it persisted across a two-tier
//! key-value storage service (a fast local tier and a small quota-limited
//! sync tier).
//!
//! # Architecture
//!
//! The browser-provided collaborators are consumed through capability
//! traits: [`storage::StorageArea`] for the key-value tiers and
//! [`engine::RuleEngine`] for the declarative network rule engine. The
//! settings graph is sharded into one storage entry per page plus a small
//! meta record, so that a large graph never overflows the sync tier's
//! per-item byte quota.
//!
//! # Modules
//!
//! - `types`: settings graph (pages, header overrides, URL filters)
//! - `storage`: two-tier key-value storage port and persisted key layout
//! - `memory`: in-memory storage backend
//! - `migrate`: versioned storage schema migrations
//! - `store`: the settings store (load/migrate/save/sync)
//! - `rules`: declarative header-modification rule model
//! - `engine`: declarative rule engine port

pub mod engine;
pub mod memory;
pub mod migrate;
pub mod rules;
pub mod storage;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use engine::{EngineError, MemoryEngine, RuleEngine};
pub use memory::MemoryArea;
pub use rules::{Rule, RuleAction, RuleCondition, ResourceType};
pub use storage::{StorageArea, StorageChange, StorageError, Tier, SYNC_QUOTA_BYTES};
pub use store::{SettingsStore, StoreError};
pub use types::{Filter, FilterKind, HeaderKind, HeaderSetting, Page, Settings, SettingsMeta};
