pub mod appliance;
pub mod config;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod eval;
pub mod graph;
pub mod logging;
pub mod policy;
pub mod routes;
pub mod routing;
pub mod rules;
pub mod topology;

pub use appliance::{Appliance, ApplianceState, EndpointHandle, EndpointMap};
pub use config::{ConfigError, DeploymentSpec};
pub use deploy::{ApplyReport, Blueprint, DeployError, DeployOptions, Deployment};
pub use engine::{ApplyOutcome, EngineError, InMemoryEngine, ProvisioningEngine};
pub use error::ModelError;
pub use eval::{Flow, FinalAction, Verdict};
pub use graph::{GraphError, ResourceGraph, ResourceKind, ResourceNode};
pub use policy::{Policy, PolicySpec, RuleGroupRegistry};
pub use routes::{RedirectionSpec, RouteBinder, RouteEntry};
pub use rules::{RuleClass, RuleGroup, RuleGroupSpec, RuleKind};
pub use topology::{AzId, Subnet, Tier, Topology, TopologySpec};
