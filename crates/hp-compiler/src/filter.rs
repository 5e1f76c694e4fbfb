//! URL filter composition
//!
//! A page's filter list collapses into one combined regex filter string
//! for the engine: include filters contribute their value as written,
//! exclude filters contribute it prefixed with `~`, and contributions are
//! joined with `|` in list order. A page with nothing to contribute matches
//! all HTTP(S) traffic.

use hp_core::engine::{EngineError, RuleEngine};
use hp_core::types::{Filter, FilterKind, Page};

/// Filter applied when a page has no contributing filters.
pub const DEFAULT_FILTER: &str = "|http*";

pub fn compose_filter(filters: &[Filter]) -> String {
    let mut parts = Vec::new();
    for filter in filters {
        if !filter.enabled || !filter.valid || filter.value.is_empty() {
            continue;
        }
        match filter.kind {
            FilterKind::Include => parts.push(filter.value.clone()),
            FilterKind::Exclude => parts.push(format!("~{}", filter.value)),
        }
    }

    if parts.is_empty() {
        DEFAULT_FILTER.to_string()
    } else {
        parts.join("|")
    }
}

/// Refresh each filter's cached `valid` flag through the engine's
/// regex-support probe.
pub async fn validate_filters(page: &mut Page, engine: &dyn RuleEngine) -> Result<(), EngineError> {
    for filter in &mut page.filters {
        filter.valid = engine.is_regex_supported(&filter.value).await?;
    }
    Ok(())
}
