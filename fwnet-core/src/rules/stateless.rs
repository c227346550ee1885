//! Stateless 5-tuple rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::matching::MatchAttributes;
use crate::error::{ModelError, Result};
use crate::eval::Flow;

/// Action of a stateless rule or stateless default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatelessAction {
    Pass,
    Drop,
    /// Hand the flow to stateful evaluation.
    ForwardToInspection,
}

impl fmt::Display for StatelessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatelessAction::Pass => f.write_str("PASS"),
            StatelessAction::Drop => f.write_str("DROP"),
            StatelessAction::ForwardToInspection => f.write_str("FORWARD_TO_INSPECTION"),
        }
    }
}

/// One stateless rule unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAction {
    /// Unique within the group; lower evaluates first.
    pub priority: u32,
    pub action: StatelessAction,
    #[serde(rename = "match", default)]
    pub match_attributes: MatchAttributes,
}

impl MatchAction {
    pub fn new(priority: u32, action: StatelessAction, match_attributes: MatchAttributes) -> Self {
        Self {
            priority,
            action,
            match_attributes,
        }
    }
}

pub(crate) fn validate(group: &str, rules: &[MatchAction]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for rule in rules {
        if rule.priority == 0 {
            return Err(ModelError::InvalidPriority {
                group: group.to_string(),
            });
        }
        if !seen.insert(rule.priority) {
            return Err(ModelError::DuplicatePriority {
                group: group.to_string(),
                priority: rule.priority,
            });
        }
        if let Some(range) = rule.match_attributes.invalid_port_range() {
            return Err(ModelError::InvalidRule {
                group: group.to_string(),
                reason: format!(
                    "rule {} has reversed port range {}-{}",
                    rule.priority, range.from, range.to
                ),
            });
        }
    }
    Ok(())
}

/// First matching rule in ascending priority order.
pub(crate) fn first_match<'a>(rules: &'a [MatchAction], flow: &Flow) -> Option<&'a MatchAction> {
    let mut ordered: Vec<&MatchAction> = rules.iter().collect();
    ordered.sort_by_key(|r| r.priority);
    ordered
        .into_iter()
        .find(|r| r.match_attributes.matches(flow))
}
