//! Rule groups: capacity-bounded units of filtering logic.
//!
//! A group is one envelope (name, description, capacity, class, rule order)
//! around a payload tagged by `kind`:
//! - `five_tuple_match`: stateless `MatchAction`s or stateful `StatefulRule`s
//! - `domain_allowlist`: a `DomainAllowlistRule`
//! - `raw_signature`: Suricata-style text
//!
//! `RuleGroup::new` is the single validation entry point and dispatches on
//! the payload kind. A validated group is immutable; a change is a new group
//! under the same name.

pub mod domain;
pub mod matching;
pub mod signature;
pub mod stateful;
pub mod stateless;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::error::{ModelError, Result};
use crate::eval::Flow;

pub use domain::{DomainAllowlistRule, DomainSurface};
pub use matching::{
    AddressMatch, Direction, MatchAttributes, PortMatch, PortRange, StatefulHeader,
    StatefulProtocol,
};
pub use signature::{RawSignatureRules, Signature};
pub use stateful::{StatefulAction, StatefulRule};
pub use stateless::{MatchAction, StatelessAction};

/// Stateless (per packet) or stateful (per flow) evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleClass {
    Stateless,
    Stateful,
}

impl fmt::Display for RuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleClass::Stateless => f.write_str("stateless"),
            RuleClass::Stateful => f.write_str("stateful"),
        }
    }
}

/// Payload discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    FiveTupleMatch,
    DomainAllowlist,
    RawSignature,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::FiveTupleMatch => f.write_str("five_tuple_match"),
            RuleKind::DomainAllowlist => f.write_str("domain_allowlist"),
            RuleKind::RawSignature => f.write_str("raw_signature"),
        }
    }
}

/// Rule order discipline inside a stateful group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleOrder {
    /// Rules run exactly in the declared sequence; first match terminates.
    #[default]
    StrictOrder,
    DefaultActionOrder,
}

impl fmt::Display for RuleOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleOrder::StrictOrder => f.write_str("STRICT_ORDER"),
            RuleOrder::DefaultActionOrder => f.write_str("DEFAULT_ACTION_ORDER"),
        }
    }
}

/// Kind-specific payload of a rule group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RulePayload {
    FiveTupleMatch {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        stateless_rules: Vec<MatchAction>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        stateful_rules: Vec<StatefulRule>,
    },
    DomainAllowlist(DomainAllowlistRule),
    RawSignature(RawSignatureRules),
}

impl RulePayload {
    pub fn kind(&self) -> RuleKind {
        match self {
            RulePayload::FiveTupleMatch { .. } => RuleKind::FiveTupleMatch,
            RulePayload::DomainAllowlist(_) => RuleKind::DomainAllowlist,
            RulePayload::RawSignature(_) => RuleKind::RawSignature,
        }
    }
}

/// Unvalidated rule group, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleGroupSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub capacity: u32,
    pub class: RuleClass,
    #[serde(default)]
    pub rule_order: RuleOrder,
    #[serde(flatten)]
    pub payload: RulePayload,
}

impl RuleGroupSpec {
    pub fn stateless(name: impl Into<String>, capacity: u32, rules: Vec<MatchAction>) -> Self {
        Self::with_payload(
            name,
            capacity,
            RuleClass::Stateless,
            RulePayload::FiveTupleMatch {
                stateless_rules: rules,
                stateful_rules: Vec::new(),
            },
        )
    }

    pub fn stateful(name: impl Into<String>, capacity: u32, rules: Vec<StatefulRule>) -> Self {
        Self::with_payload(
            name,
            capacity,
            RuleClass::Stateful,
            RulePayload::FiveTupleMatch {
                stateless_rules: Vec::new(),
                stateful_rules: rules,
            },
        )
    }

    pub fn domain_allowlist(
        name: impl Into<String>,
        capacity: u32,
        rule: DomainAllowlistRule,
    ) -> Self {
        Self::with_payload(
            name,
            capacity,
            RuleClass::Stateful,
            RulePayload::DomainAllowlist(rule),
        )
    }

    pub fn raw_signature(name: impl Into<String>, capacity: u32, rules: impl Into<String>) -> Self {
        Self::with_payload(
            name,
            capacity,
            RuleClass::Stateful,
            RulePayload::RawSignature(RawSignatureRules::new(rules)),
        )
    }

    fn with_payload(
        name: impl Into<String>,
        capacity: u32,
        class: RuleClass,
        payload: RulePayload,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            capacity,
            class,
            rule_order: RuleOrder::StrictOrder,
            payload,
        }
    }
}

/// Outcome of a stateful group matching a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatefulMatch {
    pub action: StatefulAction,
    /// Rule id, `None` for implicit domain allow-list rules.
    pub sid: Option<u64>,
}

/// A validated, immutable rule group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleGroupSpec", into = "RuleGroupSpec")]
pub struct RuleGroup {
    spec: RuleGroupSpec,
    /// Parsed form of a raw signature payload.
    signatures: Vec<Signature>,
}

impl RuleGroup {
    /// Validate a spec into a rule group.
    pub fn new(spec: RuleGroupSpec) -> Result<Self> {
        let group = spec.name.trim();
        if group.is_empty() {
            return Err(ModelError::InvalidRule {
                group: spec.name.clone(),
                reason: "rule group name is required".to_string(),
            });
        }
        if group != spec.name {
            return Err(ModelError::InvalidRule {
                group: spec.name.clone(),
                reason: "rule group name has surrounding whitespace".to_string(),
            });
        }
        if spec.capacity == 0 {
            return Err(ModelError::ZeroCapacity(group.to_string()));
        }

        let require_stateful = || {
            if spec.class == RuleClass::Stateful {
                Ok(())
            } else {
                Err(ModelError::ClassMismatch {
                    group: group.to_string(),
                    declared: spec.class,
                    actual: RuleClass::Stateful,
                })
            }
        };

        let mut signatures = Vec::new();
        let units = match &spec.payload {
            RulePayload::FiveTupleMatch {
                stateless_rules,
                stateful_rules,
            } => match spec.class {
                RuleClass::Stateless if !stateful_rules.is_empty() => {
                    return Err(ModelError::ClassMismatch {
                        group: group.to_string(),
                        declared: RuleClass::Stateless,
                        actual: RuleClass::Stateful,
                    });
                }
                RuleClass::Stateful if !stateless_rules.is_empty() => {
                    return Err(ModelError::ClassMismatch {
                        group: group.to_string(),
                        declared: RuleClass::Stateful,
                        actual: RuleClass::Stateless,
                    });
                }
                RuleClass::Stateless => stateless_rules.len(),
                RuleClass::Stateful => stateful_rules.len(),
            },
            RulePayload::DomainAllowlist(rule) => {
                require_stateful()?;
                rule.targets.len()
            }
            RulePayload::RawSignature(raw) => {
                require_stateful()?;
                signatures = raw.parse(group)?;
                signatures.len()
            }
        };

        if units > spec.capacity as usize {
            return Err(ModelError::CapacityExceeded {
                group: group.to_string(),
                capacity: spec.capacity,
                units,
            });
        }

        match &spec.payload {
            RulePayload::FiveTupleMatch {
                stateless_rules,
                stateful_rules,
            } => {
                stateless::validate(group, stateless_rules)?;
                stateful::validate(group, stateful_rules)?;
            }
            RulePayload::DomainAllowlist(rule) => rule.validate(group)?,
            RulePayload::RawSignature(_) => {
                let mut seen = BTreeSet::new();
                for sig in &signatures {
                    if !seen.insert(sig.sid) {
                        return Err(ModelError::DuplicateRuleId {
                            group: group.to_string(),
                            sid: sig.sid,
                        });
                    }
                }
            }
        }

        if spec.class == RuleClass::Stateful && spec.rule_order != RuleOrder::StrictOrder {
            return Err(ModelError::UnsupportedRuleOrder {
                group: group.to_string(),
                order: spec.rule_order,
            });
        }

        debug!(
            group,
            class = %spec.class,
            kind = %spec.payload.kind(),
            units,
            capacity = spec.capacity,
            "Validated rule group"
        );

        Ok(Self { spec, signatures })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn description(&self) -> Option<&str> {
        self.spec.description.as_deref()
    }

    pub fn capacity(&self) -> u32 {
        self.spec.capacity
    }

    pub fn class(&self) -> RuleClass {
        self.spec.class
    }

    pub fn kind(&self) -> RuleKind {
        self.spec.payload.kind()
    }

    pub fn rule_order(&self) -> RuleOrder {
        self.spec.rule_order
    }

    pub fn payload(&self) -> &RulePayload {
        &self.spec.payload
    }

    pub fn spec(&self) -> &RuleGroupSpec {
        &self.spec
    }

    /// Number of rule units counted against capacity.
    pub fn rule_units(&self) -> usize {
        match &self.spec.payload {
            RulePayload::FiveTupleMatch {
                stateless_rules,
                stateful_rules,
            } => stateless_rules.len() + stateful_rules.len(),
            RulePayload::DomainAllowlist(rule) => rule.targets.len(),
            RulePayload::RawSignature(_) => self.signatures.len(),
        }
    }

    /// First stateless rule matching the flow, by ascending priority.
    pub fn first_stateless_match(&self, flow: &Flow) -> Option<&MatchAction> {
        match &self.spec.payload {
            RulePayload::FiveTupleMatch {
                stateless_rules, ..
            } => stateless::first_match(stateless_rules, flow),
            _ => None,
        }
    }

    /// First stateful match in strict order.
    pub fn first_stateful_match(&self, flow: &Flow) -> Option<StatefulMatch> {
        match &self.spec.payload {
            RulePayload::FiveTupleMatch { stateful_rules, .. } => {
                stateful::first_match(stateful_rules, flow).map(|r| StatefulMatch {
                    action: r.action,
                    sid: Some(r.sid),
                })
            }
            RulePayload::DomainAllowlist(rule) => rule.matches(flow).then_some(StatefulMatch {
                action: StatefulAction::Pass,
                sid: None,
            }),
            RulePayload::RawSignature(_) => self
                .signatures
                .iter()
                .find(|s| s.matches(flow))
                .map(|s| StatefulMatch {
                    action: s.action,
                    sid: Some(s.sid),
                }),
        }
    }

    /// Human-readable rule lines, in evaluation order.
    pub fn rule_text(&self) -> Vec<String> {
        match &self.spec.payload {
            RulePayload::FiveTupleMatch {
                stateless_rules,
                stateful_rules,
            } => {
                let mut stateless: Vec<&MatchAction> = stateless_rules.iter().collect();
                stateless.sort_by_key(|r| r.priority);
                stateless
                    .into_iter()
                    .map(|r| format!("{:>5}  {}  {:?}", r.priority, r.action, r.match_attributes))
                    .chain(stateful_rules.iter().map(|r| {
                        let h = &r.header;
                        let dir = match h.direction {
                            Direction::Forward => "->",
                            Direction::Any => "<>",
                        };
                        let mut options: String =
                            r.options.iter().map(|o| format!("{}; ", o)).collect();
                        options.push_str(&format!("sid:{};", r.sid));
                        format!(
                            "{} {} {} {} {} {} {} ({})",
                            r.action,
                            h.protocol.as_str(),
                            h.source,
                            h.source_port,
                            dir,
                            h.destination,
                            h.destination_port,
                            options
                        )
                    }))
                    .collect()
            }
            RulePayload::DomainAllowlist(rule) => rule.generated_rules(1),
            RulePayload::RawSignature(_) => self.signatures.iter().map(|s| s.text.clone()).collect(),
        }
    }
}

impl TryFrom<RuleGroupSpec> for RuleGroup {
    type Error = ModelError;

    fn try_from(spec: RuleGroupSpec) -> Result<Self> {
        RuleGroup::new(spec)
    }
}

impl From<RuleGroup> for RuleGroupSpec {
    fn from(group: RuleGroup) -> Self {
        group.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::PROTO_TCP;

    fn pass_port(priority: u32, port: u16) -> MatchAction {
        MatchAction::new(
            priority,
            StatelessAction::Pass,
            MatchAttributes {
                protocols: vec![PROTO_TCP],
                destination_ports: vec![PortRange::single(port)],
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_capacity_exceeded_for_every_kind() {
        let stateless = RuleGroupSpec::stateless("s", 1, vec![pass_port(1, 80), pass_port(2, 443)]);
        assert!(matches!(
            RuleGroup::new(stateless),
            Err(ModelError::CapacityExceeded {
                capacity: 1,
                units: 2,
                ..
            })
        ));

        let domains = RuleGroupSpec::domain_allowlist(
            "d",
            1,
            DomainAllowlistRule::new([".a.com", ".b.com"], [DomainSurface::TlsSni]),
        );
        assert!(matches!(
            RuleGroup::new(domains),
            Err(ModelError::CapacityExceeded { .. })
        ));

        let sigs = RuleGroupSpec::raw_signature(
            "r",
            1,
            "alert icmp any any -> any any (sid:1;)\nalert udp any any -> any any (sid:2;)",
        );
        assert!(matches!(
            RuleGroup::new(sigs),
            Err(ModelError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_units_at_capacity_are_accepted() {
        let group =
            RuleGroup::new(RuleGroupSpec::stateless("s", 2, vec![pass_port(1, 80), pass_port(2, 443)]))
                .unwrap();
        assert_eq!(group.rule_units(), 2);
        assert_eq!(group.class(), RuleClass::Stateless);
        assert_eq!(group.kind(), RuleKind::FiveTupleMatch);
    }

    #[test]
    fn test_zero_capacity_and_empty_name() {
        assert!(matches!(
            RuleGroup::new(RuleGroupSpec::stateless("s", 0, vec![])),
            Err(ModelError::ZeroCapacity(_))
        ));
        assert!(matches!(
            RuleGroup::new(RuleGroupSpec::stateless(" ", 10, vec![])),
            Err(ModelError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_name_with_surrounding_whitespace() {
        let err = RuleGroup::new(RuleGroupSpec::raw_signature(
            " ips",
            10,
            "alert icmp any any -> any any (sid:1;)",
        ))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidRule { ref group, .. } if group == " ips"));
    }

    #[test]
    fn test_signature_group_without_rules() {
        for text in ["", "# just a comment", "   \n"] {
            assert!(matches!(
                RuleGroup::new(RuleGroupSpec::raw_signature("r", 10, text)),
                Err(ModelError::MalformedSignature { line: 0, .. })
            ));
        }
    }

    #[test]
    fn test_class_mismatch() {
        let mut spec = RuleGroupSpec::raw_signature("r", 10, "alert icmp any any -> any any (sid:1;)");
        spec.class = RuleClass::Stateless;
        assert!(matches!(
            RuleGroup::new(spec),
            Err(ModelError::ClassMismatch { .. })
        ));

        let mut spec = RuleGroupSpec::stateless("s", 10, vec![pass_port(1, 80)]);
        spec.class = RuleClass::Stateful;
        assert!(matches!(
            RuleGroup::new(spec),
            Err(ModelError::ClassMismatch {
                declared: RuleClass::Stateful,
                actual: RuleClass::Stateless,
                ..
            })
        ));
    }

    #[test]
    fn test_only_strict_order_supported() {
        let mut spec = RuleGroupSpec::raw_signature("r", 10, "alert icmp any any -> any any (sid:1;)");
        spec.rule_order = RuleOrder::DefaultActionOrder;
        assert!(matches!(
            RuleGroup::new(spec),
            Err(ModelError::UnsupportedRuleOrder { .. })
        ));
    }

    #[test]
    fn test_duplicate_signature_sid() {
        let spec = RuleGroupSpec::raw_signature(
            "r",
            10,
            "alert icmp any any -> any any (sid:7;)\ndrop udp any any -> any any (sid:7;)",
        );
        assert!(matches!(
            RuleGroup::new(spec),
            Err(ModelError::DuplicateRuleId { sid: 7, .. })
        ));
    }

    #[test]
    fn test_group_json_shape() {
        let json = r#"{
            "name": "AllowAmazonDomains",
            "description": "Allow Access to AWS services",
            "capacity": 10,
            "class": "stateful",
            "rule_order": "STRICT_ORDER",
            "kind": "domain_allowlist",
            "targets": [".amazonaws.com", ".amazon.com"],
            "surfaces": ["TLS_SNI", "HTTP_HOST"]
        }"#;
        let group: RuleGroup = serde_json::from_str(json).unwrap();
        assert_eq!(group.kind(), RuleKind::DomainAllowlist);
        assert_eq!(group.description(), Some("Allow Access to AWS services"));

        let reloaded: RuleGroup =
            serde_json::from_str(&serde_json::to_string(&group).unwrap()).unwrap();
        assert_eq!(reloaded, group);
        let RulePayload::DomainAllowlist(rule) = reloaded.payload() else {
            panic!("expected a domain allow-list");
        };
        assert_eq!(rule.targets, vec![".amazonaws.com", ".amazon.com"]);
        assert_eq!(
            rule.surfaces.iter().copied().collect::<Vec<_>>(),
            vec![DomainSurface::TlsSni, DomainSurface::HttpHost]
        );
    }

    #[test]
    fn test_invalid_group_fails_deserialization() {
        let json = r#"{
            "name": "suricata-ips",
            "capacity": 100,
            "class": "stateful",
            "kind": "raw_signature",
            "rules": "alert icmp any any -> any any (msg:\"no sid\";)"
        }"#;
        let err = serde_json::from_str::<RuleGroup>(json).unwrap_err();
        assert!(err.to_string().contains("malformed signature"));
    }

    #[test]
    fn test_rule_text() {
        let group = RuleGroup::new(RuleGroupSpec::stateful(
            "http",
            10,
            vec![StatefulRule {
                sid: 11111,
                action: StatefulAction::Pass,
                header: StatefulHeader {
                    protocol: StatefulProtocol::Http,
                    source: AddressMatch::Any,
                    source_port: PortMatch::Any,
                    direction: Direction::Forward,
                    destination: "10.1.0.32/28".parse().unwrap(),
                    destination_port: "80".parse().unwrap(),
                },
                options: vec![],
            }],
        ))
        .unwrap();
        assert_eq!(
            group.rule_text(),
            vec!["pass http ANY ANY -> 10.1.0.32/28 80 (sid:11111;)"]
        );
    }
}
