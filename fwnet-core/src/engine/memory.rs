//! In-memory provisioning engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{EngineError, Result};
use super::event::Event;
use super::traits::{ApplianceStatus, ApplyOutcome, ProvisioningEngine};
use crate::graph::{ResourceKind, ResourceNode};

/// A resource as recorded by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResource {
    pub id: Uuid,
    pub kind: ResourceKind,
    pub properties: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    resources: HashMap<String, StoredResource>,
    appliances: HashMap<String, ApplianceStatus>,
    rejected: HashMap<String, String>,
}

/// Engine keeping desired state in memory.
///
/// Appliances become active as soon as they are created and get one
/// generated endpoint per mapped availability zone, unless activation is
/// deferred, in which case `complete_activation` finishes it.
pub struct InMemoryEngine {
    state: RwLock<State>,
    events: broadcast::Sender<Event>,
    deferred_activation: bool,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(State::default()),
            events,
            deferred_activation: false,
        }
    }

    /// Leave new appliances pending until `complete_activation`.
    pub fn with_deferred_activation(mut self) -> Self {
        self.deferred_activation = true;
        self
    }

    /// Reject every apply of the named resource.
    pub fn fail_on(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
        self.state
            .get_mut()
            .rejected
            .insert(name.into(), reason.into());
        self
    }

    pub async fn resource(&self, name: &str) -> Option<StoredResource> {
        self.state.read().await.resources.get(name).cloned()
    }

    pub async fn resource_count(&self) -> usize {
        self.state.read().await.resources.len()
    }

    /// Names of stored resources of one kind, sorted.
    pub async fn resource_names(&self, kind: ResourceKind) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .resources
            .iter()
            .filter(|(_, r)| r.kind == kind)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Finish provisioning a pending appliance.
    pub async fn complete_activation(&self, name: &str) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        let resource = state
            .resources
            .get(name)
            .filter(|r| r.kind == ResourceKind::Appliance)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let endpoints = generate_endpoints(&resource.properties);
        match state.appliances.get(name) {
            Some(ApplianceStatus::Pending) => {}
            other => {
                return Err(EngineError::Internal(format!(
                    "appliance '{}' is not pending: {:?}",
                    name, other
                )));
            }
        }
        state
            .appliances
            .insert(name.to_string(), ApplianceStatus::Active(endpoints.clone()));
        drop(state);

        info!(appliance = %name, endpoints = endpoints.len(), "Appliance activated");
        let _ = self.events.send(Event::ApplianceActive {
            name: name.to_string(),
            endpoints: endpoints.clone(),
        });
        Ok(endpoints)
    }

    /// Mark a pending appliance as failed.
    pub async fn fail_activation(&self, name: &str, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let mut state = self.state.write().await;
        if !matches!(state.appliances.get(name), Some(ApplianceStatus::Pending)) {
            return Err(EngineError::NotFound(name.to_string()));
        }
        state
            .appliances
            .insert(name.to_string(), ApplianceStatus::Failed(reason.clone()));
        drop(state);

        warn!(appliance = %name, %reason, "Appliance failed");
        let _ = self.events.send(Event::ApplianceFailed {
            name: name.to_string(),
            reason,
        });
        Ok(())
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// One `<az>:vpce-<id>` attribute per mapped availability zone.
fn generate_endpoints(properties: &serde_json::Value) -> Vec<String> {
    properties
        .get("subnet_mappings")
        .and_then(serde_json::Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|m| m.get("az").and_then(serde_json::Value::as_str))
        .map(|az| {
            let id = Uuid::new_v4().simple().to_string();
            format!("{}:vpce-{}", az, &id[..17])
        })
        .collect()
}

#[async_trait]
impl ProvisioningEngine for InMemoryEngine {
    async fn apply(&self, node: &ResourceNode) -> Result<ApplyOutcome> {
        let mut state = self.state.write().await;
        if let Some(reason) = state.rejected.get(&node.name) {
            return Err(EngineError::Rejected {
                name: node.name.clone(),
                reason: reason.clone(),
            });
        }

        let now = Utc::now();
        let outcome = match state.resources.get_mut(&node.name) {
            Some(existing) if existing.kind == node.kind && existing.properties == node.properties => {
                ApplyOutcome::Unchanged
            }
            Some(existing) => {
                existing.kind = node.kind;
                existing.properties = node.properties.clone();
                existing.updated_at = now;
                ApplyOutcome::Updated
            }
            None => {
                state.resources.insert(
                    node.name.clone(),
                    StoredResource {
                        id: Uuid::new_v4(),
                        kind: node.kind,
                        properties: node.properties.clone(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                ApplyOutcome::Created
            }
        };

        let mut activated = None;
        if node.kind == ResourceKind::Appliance && !state.appliances.contains_key(&node.name) {
            let status = if self.deferred_activation {
                ApplianceStatus::Pending
            } else {
                let endpoints = generate_endpoints(&node.properties);
                activated = Some(endpoints.clone());
                ApplianceStatus::Active(endpoints)
            };
            state.appliances.insert(node.name.clone(), status);
        }
        drop(state);

        debug!(name = %node.name, kind = %node.kind, ?outcome, "Applied resource");
        let event = match outcome {
            ApplyOutcome::Created => Some(Event::ResourceCreated {
                name: node.name.clone(),
                kind: node.kind,
            }),
            ApplyOutcome::Updated => Some(Event::ResourceUpdated {
                name: node.name.clone(),
                kind: node.kind,
            }),
            ApplyOutcome::Unchanged => None,
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        if let Some(endpoints) = activated {
            info!(appliance = %node.name, endpoints = endpoints.len(), "Appliance activated");
            let _ = self.events.send(Event::ApplianceActive {
                name: node.name.clone(),
                endpoints,
            });
        }
        Ok(outcome)
    }

    async fn appliance_status(&self, name: &str) -> Result<ApplianceStatus> {
        self.state
            .read()
            .await
            .appliances
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}
