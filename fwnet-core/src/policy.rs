//! Policy aggregation and the flow evaluation model.
//!
//! A policy orders validated rule groups by priority, in two slots
//! (stateless and stateful), and carries the default actions applied when
//! nothing matches. `Policy::evaluate` walks a flow through the same steps
//! the appliance does.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ModelError, Result};
use crate::eval::{Alert, Decision, Flow, Verdict};
use crate::rules::{RuleClass, RuleGroup, RuleOrder, StatefulAction, StatelessAction};

/// A policy slot pointing at a rule group by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReference {
    pub priority: u32,
    pub group: String,
}

impl GroupReference {
    pub fn new(priority: u32, group: impl Into<String>) -> Self {
        Self {
            priority,
            group: group.into(),
        }
    }
}

/// Action taken when no stateful group matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatefulDefaultAction {
    #[default]
    Drop,
    DropEstablished,
    Alert,
    AlertEstablished,
}

impl fmt::Display for StatefulDefaultAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatefulDefaultAction::Drop => f.write_str("DROP"),
            StatefulDefaultAction::DropEstablished => f.write_str("DROP_ESTABLISHED"),
            StatefulDefaultAction::Alert => f.write_str("ALERT"),
            StatefulDefaultAction::AlertEstablished => f.write_str("ALERT_ESTABLISHED"),
        }
    }
}

/// Unvalidated policy, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub stateless_groups: Vec<GroupReference>,
    #[serde(default)]
    pub stateful_groups: Vec<GroupReference>,
    pub stateless_default: StatelessAction,
    pub stateless_fragment_default: StatelessAction,
    #[serde(default)]
    pub stateful_default: StatefulDefaultAction,
    #[serde(default)]
    pub rule_order: RuleOrder,
}

impl PolicySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            stateless_groups: Vec::new(),
            stateful_groups: Vec::new(),
            stateless_default: StatelessAction::ForwardToInspection,
            stateless_fragment_default: StatelessAction::ForwardToInspection,
            stateful_default: StatefulDefaultAction::Drop,
            rule_order: RuleOrder::StrictOrder,
        }
    }

    pub fn stateless_group(mut self, priority: u32, group: impl Into<String>) -> Self {
        self.stateless_groups.push(GroupReference::new(priority, group));
        self
    }

    pub fn stateful_group(mut self, priority: u32, group: impl Into<String>) -> Self {
        self.stateful_groups.push(GroupReference::new(priority, group));
        self
    }

    pub fn stateless_default(mut self, action: StatelessAction) -> Self {
        self.stateless_default = action;
        self
    }

    pub fn fragment_default(mut self, action: StatelessAction) -> Self {
        self.stateless_fragment_default = action;
        self
    }

    pub fn stateful_default(mut self, action: StatefulDefaultAction) -> Self {
        self.stateful_default = action;
        self
    }
}

/// Defined rule groups, keyed by stable name.
#[derive(Debug, Clone, Default)]
pub struct RuleGroupRegistry {
    groups: BTreeMap<String, Arc<RuleGroup>>,
}

impl RuleGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, group: RuleGroup) -> Result<Arc<RuleGroup>> {
        if self.groups.contains_key(group.name()) {
            return Err(ModelError::DuplicateGroupName(group.name().to_string()));
        }
        let group = Arc::new(group);
        self.groups
            .insert(group.name().to_string(), Arc::clone(&group));
        Ok(group)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RuleGroup>> {
        self.groups.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RuleGroup>> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// A rule group placed in a policy slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyGroup {
    pub priority: u32,
    pub group: Arc<RuleGroup>,
}

/// A validated policy holding its groups in ascending priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    spec: PolicySpec,
    stateless: Vec<PolicyGroup>,
    stateful: Vec<PolicyGroup>,
}

impl Policy {
    /// Resolve and order the spec's group references against the registry.
    pub fn aggregate(spec: PolicySpec, registry: &RuleGroupRegistry) -> Result<Self> {
        if spec.rule_order != RuleOrder::StrictOrder {
            return Err(ModelError::UnsupportedRuleOrder {
                group: spec.name.clone(),
                order: spec.rule_order,
            });
        }
        let stateless = resolve_slot(&spec.name, RuleClass::Stateless, &spec.stateless_groups, registry)?;
        let stateful = resolve_slot(&spec.name, RuleClass::Stateful, &spec.stateful_groups, registry)?;

        debug!(
            policy = %spec.name,
            stateless = stateless.len(),
            stateful = stateful.len(),
            stateful_default = %spec.stateful_default,
            "Aggregated policy"
        );

        Ok(Self {
            spec,
            stateless,
            stateful,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &PolicySpec {
        &self.spec
    }

    pub fn stateless_groups(&self) -> &[PolicyGroup] {
        &self.stateless
    }

    pub fn stateful_groups(&self) -> &[PolicyGroup] {
        &self.stateful
    }

    /// Names of every referenced group, stateless slot first.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.stateless
            .iter()
            .chain(self.stateful.iter())
            .map(|g| g.group.name())
    }

    /// Model the appliance's verdict for a flow.
    pub fn evaluate(&self, flow: &Flow) -> Verdict {
        let verdict = self.evaluate_inner(flow);
        debug!(
            policy = %self.spec.name,
            protocol = flow.protocol,
            source = %flow.source,
            destination = %flow.destination,
            action = %verdict.action,
            alerts = verdict.alerts.len(),
            "Evaluated flow"
        );
        verdict
    }

    fn evaluate_inner(&self, flow: &Flow) -> Verdict {
        let hit = self.stateless.iter().find_map(|slot| {
            slot.group
                .first_stateless_match(flow)
                .map(|rule| (slot.group.name(), rule))
        });

        let (action, decision) = match hit {
            Some((group, rule)) => (
                rule.action,
                Decision::StatelessRule {
                    group: group.to_string(),
                    priority: rule.priority,
                },
            ),
            None if flow.fragment => (self.spec.stateless_fragment_default, Decision::FragmentDefault),
            None => (self.spec.stateless_default, Decision::StatelessDefault),
        };
        match action {
            StatelessAction::Pass => return Verdict::pass(decision),
            StatelessAction::Drop => return Verdict::drop(decision),
            StatelessAction::ForwardToInspection => {}
        }

        let mut alerts = Vec::new();
        for slot in &self.stateful {
            let Some(hit) = slot.group.first_stateful_match(flow) else {
                continue;
            };
            let decision = Decision::StatefulRule {
                group: slot.group.name().to_string(),
                sid: hit.sid,
            };
            match hit.action {
                StatefulAction::Pass => return Verdict::pass(decision).with_alerts(alerts),
                StatefulAction::Drop => return Verdict::drop(decision).with_alerts(alerts),
                StatefulAction::Alert => alerts.push(Alert {
                    group: Some(slot.group.name().to_string()),
                    sid: hit.sid,
                }),
            }
        }
        if !alerts.is_empty() {
            return Verdict::pass(Decision::AlertedOnly).with_alerts(alerts);
        }

        let default_alert = || Alert {
            group: None,
            sid: None,
        };
        match self.spec.stateful_default {
            StatefulDefaultAction::Drop => Verdict::drop(Decision::StatefulDefault),
            StatefulDefaultAction::DropEstablished if flow.established => {
                Verdict::drop(Decision::StatefulDefault)
            }
            StatefulDefaultAction::DropEstablished => Verdict::pass(Decision::StatefulDefault),
            StatefulDefaultAction::Alert => {
                Verdict::pass(Decision::StatefulDefault).with_alerts(vec![default_alert()])
            }
            StatefulDefaultAction::AlertEstablished if flow.established => {
                Verdict::pass(Decision::StatefulDefault).with_alerts(vec![default_alert()])
            }
            StatefulDefaultAction::AlertEstablished => Verdict::pass(Decision::StatefulDefault),
        }
    }
}

fn resolve_slot(
    policy: &str,
    class: RuleClass,
    references: &[GroupReference],
    registry: &RuleGroupRegistry,
) -> Result<Vec<PolicyGroup>> {
    let mut priorities = BTreeSet::new();
    let mut resolved = Vec::with_capacity(references.len());
    for reference in references {
        if reference.priority == 0 {
            return Err(ModelError::InvalidGroupPriority {
                policy: policy.to_string(),
                group: reference.group.clone(),
            });
        }
        let group = registry
            .get(&reference.group)
            .ok_or_else(|| ModelError::UnknownGroupReference {
                policy: policy.to_string(),
                group: reference.group.clone(),
            })?;
        if group.class() != class {
            return Err(ModelError::GroupClassMismatch {
                policy: policy.to_string(),
                group: reference.group.clone(),
                class: group.class(),
            });
        }
        if !priorities.insert(reference.priority) {
            return Err(ModelError::DuplicateGroupPriority {
                policy: policy.to_string(),
                class,
                priority: reference.priority,
            });
        }
        resolved.push(PolicyGroup {
            priority: reference.priority,
            group: Arc::clone(group),
        });
    }
    resolved.sort_by_key(|g| g.priority);
    Ok(resolved)
}
