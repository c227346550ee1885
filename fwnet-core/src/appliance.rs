//! Inspection appliance lifecycle.
//!
//! An appliance binds one policy to the Inspection subnets of a topology.
//! Endpoint handles are assigned by the provider and only exist once the
//! appliance is active. Transitions consume the appliance and return the
//! next state, so a stale `Pending` value cannot be used after activation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::error::{ModelError, Result};
use crate::policy::Policy;
use crate::topology::{AzId, SubnetId, Tier, Topology};

/// Provider-assigned handle of an inspection endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointHandle(String);

impl EndpointHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a provider attribute of the form `<az>:<handle>`.
    pub fn parse_attribute(attribute: &str) -> Result<(AzId, EndpointHandle)> {
        let malformed = || ModelError::MalformedEndpoint(attribute.to_string());
        let (az, handle) = attribute.split_once(':').ok_or_else(malformed)?;
        let (az, handle) = (az.trim(), handle.trim());
        if az.is_empty() || handle.is_empty() {
            return Err(malformed());
        }
        Ok((AzId::new(az), EndpointHandle::new(handle)))
    }
}

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Endpoint handles keyed by availability zone.
pub type EndpointMap = BTreeMap<AzId, EndpointHandle>;

/// The Inspection subnet the appliance attaches to in one AZ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetMapping {
    pub subnet: SubnetId,
    pub az: AzId,
}

/// Configuration-level appliance declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplianceSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ApplianceState {
    Pending,
    Active { endpoints: EndpointMap },
    Failed { reason: String },
    Deleted,
}

impl ApplianceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplianceState::Pending => "pending",
            ApplianceState::Active { .. } => "active",
            ApplianceState::Failed { .. } => "failed",
            ApplianceState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ApplianceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inspection appliance bound to a policy and a topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appliance {
    name: String,
    policy: String,
    subnet_mappings: Vec<SubnetMapping>,
    state: ApplianceState,
}

impl Appliance {
    /// Declare a pending appliance mapped to every Inspection subnet.
    pub fn declare(name: impl Into<String>, policy: &Policy, topology: &Topology) -> Result<Self> {
        let name = name.into();
        let subnet_mappings: Vec<SubnetMapping> = topology
            .subnets_in(Tier::Inspection)
            .map(|s| SubnetMapping {
                subnet: s.id.clone(),
                az: s.az.clone(),
            })
            .collect();
        if subnet_mappings.is_empty() {
            return Err(ModelError::NoInspectionSubnets(name));
        }
        Ok(Self {
            name,
            policy: policy.name().to_string(),
            subnet_mappings,
            state: ApplianceState::Pending,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy_name(&self) -> &str {
        &self.policy
    }

    pub fn subnet_mappings(&self) -> &[SubnetMapping] {
        &self.subnet_mappings
    }

    pub fn state(&self) -> &ApplianceState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ApplianceState::Active { .. })
    }

    /// Pending → Active with the provider's endpoint handles.
    pub fn activate(self, endpoints: EndpointMap) -> Result<Self> {
        if self.state != ApplianceState::Pending {
            return Err(self.transition_error("active"));
        }
        for mapping in &self.subnet_mappings {
            if !endpoints.contains_key(&mapping.az) {
                warn!(appliance = %self.name, az = %mapping.az, "No endpoint reported for mapped zone");
            }
        }
        debug!(appliance = %self.name, endpoints = endpoints.len(), "Appliance active");
        Ok(Self {
            state: ApplianceState::Active { endpoints },
            ..self
        })
    }

    /// Activate from raw `<az>:<handle>` provider attributes.
    pub fn activate_from_attributes<I, S>(self, attributes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut endpoints = EndpointMap::new();
        for attribute in attributes {
            let (az, handle) = EndpointHandle::parse_attribute(attribute.as_ref())?;
            if endpoints.insert(az, handle).is_some() {
                return Err(ModelError::MalformedEndpoint(attribute.as_ref().to_string()));
            }
        }
        self.activate(endpoints)
    }

    /// Pending → Failed.
    pub fn fail(self, reason: impl Into<String>) -> Result<Self> {
        if self.state != ApplianceState::Pending {
            return Err(self.transition_error("failed"));
        }
        let reason = reason.into();
        warn!(appliance = %self.name, %reason, "Appliance provisioning failed");
        Ok(Self {
            state: ApplianceState::Failed { reason },
            ..self
        })
    }

    /// Active or Failed → Deleted.
    pub fn delete(self) -> Result<Self> {
        match self.state {
            ApplianceState::Active { .. } | ApplianceState::Failed { .. } => Ok(Self {
                state: ApplianceState::Deleted,
                ..self
            }),
            _ => Err(self.transition_error("deleted")),
        }
    }

    pub fn endpoints(&self) -> Result<&EndpointMap> {
        match &self.state {
            ApplianceState::Active { endpoints } => Ok(endpoints),
            other => Err(ModelError::ApplianceNotReady {
                appliance: self.name.clone(),
                state: other.to_string(),
            }),
        }
    }

    /// Endpoint serving one availability zone.
    pub fn endpoint_for(&self, az: &AzId) -> Result<&EndpointHandle> {
        self.endpoints()?
            .get(az)
            .ok_or_else(|| ModelError::EndpointNotFound {
                appliance: self.name.clone(),
                az: az.to_string(),
            })
    }

    fn transition_error(&self, to: &str) -> ModelError {
        ModelError::InvalidStateTransition {
            appliance: self.name.clone(),
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}
