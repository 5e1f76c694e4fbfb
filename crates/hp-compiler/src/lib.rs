//! HeadPages Rule Compiler
//!
//! This crate turns the settings graph into declarative header-modification
//! rules and submits them to the host rule engine with full-replace
//! semantics. Compilation itself is pure; only the apply step talks to the
//! engine.

pub mod alloc;
pub mod apply;
pub mod builder;
pub mod filter;

pub use alloc::RuleIdAllocator;
pub use apply::{apply_settings, spawn_watcher};
pub use builder::compile_rules;
pub use filter::{compose_filter, validate_filters, DEFAULT_FILTER};
