//! ProvisioningEngine trait definition.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::error::Result;
use super::event::Event;
use crate::graph::ResourceNode;

/// What applying a node changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Provider-side status of an appliance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplianceStatus {
    Pending,
    /// Raw `<az>:<handle>` endpoint attributes.
    Active(Vec<String>),
    Failed(String),
}

/// Applies desired state.
///
/// `apply` is idempotent and commutative across nodes without dependency
/// edges between them, so independent nodes may be applied concurrently.
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    /// Create or update one resource, keyed by its stable name.
    async fn apply(&self, node: &ResourceNode) -> Result<ApplyOutcome>;

    /// Current status of a previously applied appliance.
    async fn appliance_status(&self, name: &str) -> Result<ApplianceStatus>;

    /// Subscribe to engine events.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
