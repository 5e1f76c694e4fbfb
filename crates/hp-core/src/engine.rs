//! Declarative rule engine port
//!
//! The host browser's request-filtering engine, reduced to the three calls
//! this system needs: read the installed dynamic rules, replace them in one
//! batch, and probe whether a regex pattern is supported.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::rules::Rule;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("rule engine rejected the update: {0}")]
    Rejected(String),
    #[error("rule engine unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RuleEngine: Send + Sync {
    async fn get_dynamic_rules(&self) -> Result<Vec<Rule>, EngineError>;

    /// Apply one batch update: remove `remove_ids`, then add `add`. The
    /// engine applies the batch atomically or not at all.
    async fn update_dynamic_rules(
        &self,
        remove_ids: Vec<u32>,
        add: Vec<Rule>,
    ) -> Result<(), EngineError>;

    async fn is_regex_supported(&self, regex: &str) -> Result<bool, EngineError>;
}

/// In-memory engine for tests and the CLI preview path.
pub struct MemoryEngine {
    rules: RwLock<HashMap<u32, Rule>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// An engine that already holds rules, as after a previous extension
    /// run.
    pub fn seeded(rules: Vec<Rule>) -> Self {
        Self {
            rules: RwLock::new(rules.into_iter().map(|r| (r.id, r)).collect()),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleEngine for MemoryEngine {
    async fn get_dynamic_rules(&self) -> Result<Vec<Rule>, EngineError> {
        let mut rules: Vec<Rule> = self.rules.read().await.values().cloned().collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn update_dynamic_rules(
        &self,
        remove_ids: Vec<u32>,
        add: Vec<Rule>,
    ) -> Result<(), EngineError> {
        let mut rules = self.rules.write().await;

        // Stage the whole batch so a rejected update leaves the installed
        // set untouched.
        let mut staged = rules.clone();
        for id in &remove_ids {
            staged.remove(id);
        }
        for rule in add {
            let id = rule.id;
            if staged.insert(id, rule).is_some() {
                return Err(EngineError::Rejected(format!("duplicate rule id {id}")));
            }
        }

        *rules = staged;
        Ok(())
    }

    async fn is_regex_supported(&self, regex: &str) -> Result<bool, EngineError> {
        Ok(regex_probe(regex))
    }
}

/// Conservative screen for constructs RE2-class engines reject. Real
/// validity stays the host engine's call; this only has to agree on the
/// obvious rejections.
fn regex_probe(regex: &str) -> bool {
    for lookaround in ["(?=", "(?!", "(?<=", "(?<!"] {
        if regex.contains(lookaround) {
            return false;
        }
    }
    // Backreferences: a backslash followed by a nonzero digit.
    let bytes = regex.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes[i + 1].is_ascii_digit() && bytes[i + 1] != b'0' {
                return false;
            }
            // Skip the escaped char so `\\1` is not misread.
            i += 2;
            continue;
        }
        i += 1;
    }
    true
}
