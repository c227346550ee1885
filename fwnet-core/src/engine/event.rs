//! Engine events.

use crate::graph::ResourceKind;

/// Events broadcast by a provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A resource was created.
    ResourceCreated { name: String, kind: ResourceKind },
    /// A resource's properties changed.
    ResourceUpdated { name: String, kind: ResourceKind },
    /// An appliance finished provisioning. Endpoints are raw `<az>:<handle>`
    /// attributes.
    ApplianceActive { name: String, endpoints: Vec<String> },
    /// An appliance failed to provision.
    ApplianceFailed { name: String, reason: String },
}

