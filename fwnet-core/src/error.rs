//! Validation and binding errors for the network model.

use ipnet::Ipv4Net;
use thiserror::Error;

use crate::rules::{RuleClass, RuleOrder};

/// Errors raised while building or binding the model.
///
/// Every variant is detected before anything is handed to the
/// provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    // Topology
    #[error("address space exhausted: cannot place {requested} inside {parent}")]
    AddressSpaceExhausted { parent: Ipv4Net, requested: String },

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    // Rule groups
    #[error("rule group '{group}' holds {units} rule units but its capacity is {capacity}")]
    CapacityExceeded {
        group: String,
        capacity: u32,
        units: usize,
    },

    #[error("rule group '{0}' must declare a positive capacity")]
    ZeroCapacity(String),

    #[error("rule group '{group}' has more than one rule with priority {priority}")]
    DuplicatePriority { group: String, priority: u32 },

    #[error("rule group '{group}': priority must be a positive integer")]
    InvalidPriority { group: String },

    #[error("rule group '{group}' has more than one rule with sid {sid}")]
    DuplicateRuleId { group: String, sid: u64 },

    #[error("rule group '{group}': malformed signature on line {line}: {reason}")]
    MalformedSignature {
        group: String,
        line: usize,
        reason: String,
    },

    #[error("rule group '{group}' is declared {declared} but its rules are {actual}")]
    ClassMismatch {
        group: String,
        declared: RuleClass,
        actual: RuleClass,
    },

    #[error("rule group '{group}': rule order {order} is not supported")]
    UnsupportedRuleOrder { group: String, order: RuleOrder },

    #[error("rule group '{group}': {reason}")]
    InvalidRule { group: String, reason: String },

    #[error("rule group '{0}' is already registered")]
    DuplicateGroupName(String),

    // Policy
    #[error("policy '{policy}' references unknown rule group '{group}'")]
    UnknownGroupReference { policy: String, group: String },

    #[error("policy '{policy}': priority of group '{group}' must be a positive integer")]
    InvalidGroupPriority { policy: String, group: String },

    #[error("policy '{policy}' references more than one {class} group with priority {priority}")]
    DuplicateGroupPriority {
        policy: String,
        class: RuleClass,
        priority: u32,
    },

    #[error("policy '{policy}' references {class} group '{group}' in the wrong slot")]
    GroupClassMismatch {
        policy: String,
        group: String,
        class: RuleClass,
    },

    // Appliance
    #[error("appliance '{appliance}' is {state}, endpoints are only available once active")]
    ApplianceNotReady { appliance: String, state: String },

    #[error("appliance '{appliance}' cannot go from {from} to {to}")]
    InvalidStateTransition {
        appliance: String,
        from: String,
        to: String,
    },

    #[error("appliance '{0}' has no inspection subnet to attach to")]
    NoInspectionSubnets(String),

    #[error("malformed endpoint attribute '{0}', expected '<az>:<handle>'")]
    MalformedEndpoint(String),

    // Routes
    #[error("appliance '{appliance}' has no endpoint in availability zone {az}")]
    EndpointNotFound { appliance: String, az: String },

    #[error("route table {route_table}: {destination} overlaps {existing}")]
    RouteConflict {
        route_table: String,
        destination: Ipv4Net,
        existing: Ipv4Net,
    },

    #[error("invalid redirection: {0}")]
    InvalidRedirection(String),

    // Logging
    #[error("logging for '{appliance}' configures log type {log_type} more than once")]
    DuplicateLogType { appliance: String, log_type: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;
