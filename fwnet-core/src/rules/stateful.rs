//! Stateful 5-tuple rules evaluated in strict order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::matching::StatefulHeader;
use crate::error::{ModelError, Result};
use crate::eval::Flow;

/// Action of a stateful rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatefulAction {
    Pass,
    Drop,
    /// Record an alert and keep evaluating.
    Alert,
}

impl StatefulAction {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatefulAction::Alert)
    }
}

impl fmt::Display for StatefulAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatefulAction::Pass => f.write_str("pass"),
            StatefulAction::Drop => f.write_str("drop"),
            StatefulAction::Alert => f.write_str("alert"),
        }
    }
}

/// One stateful rule unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatefulRule {
    /// Unique within the group.
    pub sid: u64,
    pub action: StatefulAction,
    pub header: StatefulHeader,
    /// Extra rule option keywords, passed through verbatim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

pub(crate) fn validate(group: &str, rules: &[StatefulRule]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for rule in rules {
        if !seen.insert(rule.sid) {
            return Err(ModelError::DuplicateRuleId {
                group: group.to_string(),
                sid: rule.sid,
            });
        }
    }
    Ok(())
}

/// First rule matching in declared order.
pub(crate) fn first_match<'a>(rules: &'a [StatefulRule], flow: &Flow) -> Option<&'a StatefulRule> {
    rules.iter().find(|r| r.header.matches(flow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::matching::{AddressMatch, Direction, PortMatch, PortRange, StatefulProtocol};

    fn rule(sid: u64, action: StatefulAction, port: u16) -> StatefulRule {
        StatefulRule {
            sid,
            action,
            header: StatefulHeader {
                protocol: StatefulProtocol::Tcp,
                source: AddressMatch::Any,
                source_port: PortMatch::Any,
                direction: Direction::Forward,
                destination: AddressMatch::Any,
                destination_port: PortMatch::Range(PortRange::single(port)),
            },
            options: vec![],
        }
    }

    #[test]
    fn test_duplicate_sid_rejected() {
        let rules = vec![
            rule(11111, StatefulAction::Pass, 80),
            rule(11111, StatefulAction::Drop, 81),
        ];
        assert_eq!(
            validate("http", &rules),
            Err(ModelError::DuplicateRuleId {
                group: "http".to_string(),
                sid: 11111
            })
        );
    }

    #[test]
    fn test_strict_order_first_match() {
        let rules = vec![
            rule(2, StatefulAction::Drop, 80),
            rule(1, StatefulAction::Pass, 80),
        ];
        let flow = Flow::tcp(
            "1.2.3.4".parse().unwrap(),
            4000,
            "10.0.0.1".parse().unwrap(),
            80,
        );
        assert_eq!(first_match(&rules, &flow).map(|r| r.sid), Some(2));
    }

    #[test]
    fn test_rule_from_json() {
        let rule: StatefulRule = serde_json::from_str(
            r#"{
                "sid": 11111,
                "action": "PASS",
                "header": {
                    "protocol": "HTTP",
                    "source": "ANY",
                    "source_port": "ANY",
                    "direction": "FORWARD",
                    "destination": "10.1.0.32/28",
                    "destination_port": "80"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(rule.header.protocol, StatefulProtocol::Http);
        assert_eq!(
            rule.header.destination_port,
            PortMatch::Range(PortRange::single(80))
        );
    }
}
