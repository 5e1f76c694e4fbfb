//! Rule emission
//!
//! Walks the active pages and emits one header-modification rule per
//! enabled, named header entry. Disabled headers, inactive pages and empty
//! header names are silently skipped; they produce neither a rule nor an
//! error.

use hp_core::rules::{
    ActionKind, HeaderMod, HeaderOperation, ResourceType, Rule, RuleAction, RuleCondition,
    RULE_PRIORITY,
};
use hp_core::types::{HeaderKind, Page};

use crate::alloc::RuleIdAllocator;
use crate::filter::compose_filter;

pub fn compile_rules(pages: &[Page], ids: &mut RuleIdAllocator) -> Vec<Rule> {
    let mut rules = Vec::new();

    for page in pages.iter().filter(|p| p.is_active()) {
        let regex_filter = compose_filter(&page.filters);

        for header in &page.headers {
            if !header.enabled || header.name.is_empty() {
                continue;
            }

            let edit = HeaderMod {
                header: header.name.clone(),
                operation: HeaderOperation::Set,
                value: header.value.clone(),
            };
            let (request_headers, response_headers) = match header.kind {
                HeaderKind::Request => (Some(vec![edit]), None),
                HeaderKind::Response => (None, Some(vec![edit])),
            };

            rules.push(Rule {
                id: ids.allocate(),
                priority: RULE_PRIORITY,
                action: RuleAction {
                    kind: ActionKind::ModifyHeaders,
                    request_headers,
                    response_headers,
                },
                condition: RuleCondition {
                    regex_filter: regex_filter.clone(),
                    resource_types: ResourceType::ALL.to_vec(),
                },
            });
        }
    }

    rules
}
