//! Deployment orchestration.
//!
//! A `Blueprint` is the fully validated model. Deploying it applies the base
//! resource graph, waits for the appliance to report its endpoints, binds
//! routes to them and applies the full graph. Nothing is applied when
//! validation fails.

use futures::future::try_join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::appliance::{Appliance, ApplianceSpec, EndpointHandle, EndpointMap};
use crate::config::DeploymentSpec;
use crate::engine::{ApplianceStatus, ApplyOutcome, EngineError, Event, ProvisioningEngine};
use crate::error::ModelError;
use crate::graph::{GraphError, ResourceGraph, ResourceKind, ResourceNode};
use crate::logging::LoggingConfiguration;
use crate::policy::{Policy, RuleGroupRegistry};
use crate::routes::{RedirectionSpec, RouteBinder, RouteEntry};
use crate::routing::RoutingView;
use crate::rules::RuleGroup;
use crate::topology::{RouteTableId, Tier, Topology};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("appliance '{appliance}' failed to provision: {reason}")]
    ApplianceFailed { appliance: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DeployError>;

/// Counts of what one apply pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub waves: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl ApplyReport {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged
    }

    /// Nothing was created or updated.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0
    }

    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Created => self.created += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Upper bound on waiting for the appliance to become active.
    pub activation_timeout: Duration,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            activation_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// A validated deployment model.
#[derive(Debug, Clone)]
pub struct Blueprint {
    pub topology: Arc<Topology>,
    pub rule_groups: RuleGroupRegistry,
    pub policy: Arc<Policy>,
    /// Declared, still pending.
    pub appliance: Appliance,
    pub appliance_spec: ApplianceSpec,
    pub redirection: RedirectionSpec,
    pub logging: Option<LoggingConfiguration>,
}

impl Blueprint {
    /// Validate every part of the spec.
    pub fn from_spec(spec: &DeploymentSpec) -> Result<Self> {
        let topology = Topology::carve(&spec.topology)?;

        let mut rule_groups = RuleGroupRegistry::new();
        for group in &spec.rule_groups {
            rule_groups.register(RuleGroup::new(group.clone())?)?;
        }
        let policy = Policy::aggregate(spec.policy.clone(), &rule_groups)?;
        let appliance = Appliance::declare(&spec.appliance.name, &policy, &topology)?;
        // Dry-run the binder so route conflicts fail before anything is applied.
        let placeholders: EndpointMap = appliance
            .subnet_mappings()
            .iter()
            .map(|m| (m.az.clone(), EndpointHandle::new("pending")))
            .collect();
        let placeholder_appliance = appliance.clone().activate(placeholders)?;
        RouteBinder::new(&topology, &placeholder_appliance)?.bind(&spec.redirection)?;
        let logging = spec
            .logging
            .clone()
            .map(|logging| LoggingConfiguration::new(&spec.appliance.name, logging))
            .transpose()?;

        let blueprint = Self {
            topology: Arc::new(topology),
            rule_groups,
            policy: Arc::new(policy),
            appliance,
            appliance_spec: spec.appliance.clone(),
            redirection: spec.redirection.clone(),
            logging,
        };
        // Surface graph errors before anything is applied.
        blueprint.base_graph()?.waves()?;

        info!(
            subnets = blueprint.topology.subnets().len(),
            rule_groups = blueprint.rule_groups.len(),
            policy = %blueprint.policy.name(),
            appliance = %blueprint.appliance.name(),
            "Validated deployment"
        );
        Ok(blueprint)
    }

    pub fn appliance_node_name(&self) -> String {
        format!("appliance/{}", self.appliance.name())
    }

    fn route_table_node_name(id: &RouteTableId) -> String {
        format!("route-table/{}", id)
    }

    /// Everything but the bound routes.
    pub fn base_graph(&self) -> std::result::Result<ResourceGraph, GraphError> {
        let mut graph = ResourceGraph::new();
        let topology = &self.topology;

        let network = "network".to_string();
        graph.add_node(ResourceNode::new(
            &network,
            ResourceKind::Network,
            &json!({ "cidr": topology.cidr(), "availability_zones": topology.azs() }),
        )?)?;

        for subnet in topology.subnets() {
            let table = Self::route_table_node_name(&subnet.route_table);
            graph.add_node(ResourceNode::new(
                &table,
                ResourceKind::RouteTable,
                &json!({ "id": subnet.route_table }),
            )?)?;
            graph.add_dependency(&table, &network)?;

            let name = format!("subnet/{}", subnet.id);
            graph.add_node(ResourceNode::new(&name, ResourceKind::Subnet, subnet)?)?;
            graph.add_dependency(&name, &network)?;
            graph.add_dependency(&name, &table)?;
        }
        if self.redirection.gateway_ingress {
            let id = topology.gateway_route_table();
            let table = Self::route_table_node_name(&id);
            graph.add_node(ResourceNode::new(
                &table,
                ResourceKind::RouteTable,
                &json!({ "id": id, "gateway": true }),
            )?)?;
            graph.add_dependency(&table, &network)?;
        }

        for group in self.rule_groups.iter() {
            graph.add_node(ResourceNode::new(
                format!("rule-group/{}", group.name()),
                ResourceKind::RuleGroup,
                group.spec(),
            )?)?;
        }

        let policy = format!("policy/{}", self.policy.name());
        graph.add_node(ResourceNode::new(
            &policy,
            ResourceKind::Policy,
            self.policy.spec(),
        )?)?;
        for group in self.policy.group_names() {
            graph.add_dependency(&policy, &format!("rule-group/{}", group))?;
        }

        let appliance = self.appliance_node_name();
        graph.add_node(ResourceNode::new(
            &appliance,
            ResourceKind::Appliance,
            &json!({
                "name": self.appliance.name(),
                "description": self.appliance_spec.description,
                "policy": self.appliance.policy_name(),
                "subnet_mappings": self.appliance.subnet_mappings(),
            }),
        )?)?;
        graph.add_dependency(&appliance, &policy)?;
        for subnet in topology.subnets_in(Tier::Inspection) {
            graph.add_dependency(&appliance, &format!("subnet/{}", subnet.id))?;
        }

        if let Some(logging) = &self.logging {
            let name = format!("logging/{}", logging.appliance());
            graph.add_node(ResourceNode::new(
                &name,
                ResourceKind::LoggingConfiguration,
                logging,
            )?)?;
            graph.add_dependency(&name, &appliance)?;
        }

        Ok(graph)
    }

    /// Base graph plus route nodes, each depending on the appliance.
    pub fn full_graph(
        &self,
        routes: &[RouteEntry],
    ) -> std::result::Result<ResourceGraph, GraphError> {
        let mut graph = self.base_graph()?;
        let appliance = self.appliance_node_name();
        for route in routes {
            let name = route.name();
            graph.add_node(ResourceNode::new(&name, ResourceKind::Route, route)?)?;
            graph.add_dependency(&name, &appliance)?;
            graph.add_dependency(&name, &Self::route_table_node_name(&route.route_table))?;
        }
        Ok(graph)
    }

    /// Bind routes for an active copy of the appliance.
    pub fn bind_routes(&self, appliance: &Appliance) -> Result<Vec<RouteEntry>> {
        Ok(RouteBinder::new(&self.topology, appliance)?.bind(&self.redirection)?)
    }
}

/// Outcome of a successful deployment.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub appliance: Appliance,
    pub routes: Vec<RouteEntry>,
    pub graph: ResourceGraph,
    /// First pass, before activation.
    pub base_report: ApplyReport,
    /// Second pass, with routes.
    pub full_report: ApplyReport,
}

impl Deployment {
    pub fn routing_view(&self, topology: &Topology) -> RoutingView {
        RoutingView::new(topology, &self.routes)
    }
}

/// Apply a graph wave by wave; members of a wave are applied concurrently.
pub async fn apply_graph<E>(engine: &E, graph: &ResourceGraph) -> Result<ApplyReport>
where
    E: ProvisioningEngine + ?Sized,
{
    let mut report = ApplyReport::default();
    for (i, wave) in graph.waves()?.into_iter().enumerate() {
        debug!(wave = i, nodes = wave.len(), "Applying wave");
        let outcomes = try_join_all(wave.iter().map(|node| engine.apply(node))).await?;
        for outcome in outcomes {
            report.record(outcome);
        }
        report.waves += 1;
    }
    info!(
        waves = report.waves,
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        "Applied graph"
    );
    Ok(report)
}

/// Deploy a blueprint end to end.
pub async fn deploy<E>(engine: &E, blueprint: &Blueprint, options: &DeployOptions) -> Result<Deployment>
where
    E: ProvisioningEngine + ?Sized,
{
    // Subscribe before applying so the activation event cannot be missed.
    let mut events = engine.subscribe();

    let base = blueprint.base_graph()?;
    let base_report = apply_graph(engine, &base).await?;

    let name = blueprint.appliance_node_name();
    let endpoints = match engine.appliance_status(&name).await? {
        ApplianceStatus::Active(endpoints) => endpoints,
        ApplianceStatus::Failed(reason) => {
            return Err(DeployError::ApplianceFailed {
                appliance: blueprint.appliance.name().to_string(),
                reason,
            });
        }
        ApplianceStatus::Pending => {
            info!(appliance = %name, "Waiting for appliance activation");
            wait_for_activation(engine, &mut events, blueprint, options.activation_timeout).await?
        }
    };

    let appliance = blueprint.appliance.clone().activate_from_attributes(&endpoints)?;
    let routes = blueprint.bind_routes(&appliance)?;
    info!(appliance = %appliance.name(), routes = routes.len(), "Routes bound to endpoints");
    let graph = blueprint.full_graph(&routes)?;
    let full_report = apply_graph(engine, &graph).await?;

    Ok(Deployment {
        appliance,
        routes,
        graph,
        base_report,
        full_report,
    })
}

async fn wait_for_activation<E>(
    engine: &E,
    events: &mut broadcast::Receiver<Event>,
    blueprint: &Blueprint,
    timeout: Duration,
) -> Result<Vec<String>>
where
    E: ProvisioningEngine + ?Sized,
{
    match tokio::time::timeout(timeout, next_activation(engine, events, blueprint)).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::ApplianceNotReady {
            appliance: blueprint.appliance.name().to_string(),
            state: blueprint.appliance.state().to_string(),
        }
        .into()),
    }
}

async fn next_activation<E>(
    engine: &E,
    events: &mut broadcast::Receiver<Event>,
    blueprint: &Blueprint,
) -> Result<Vec<String>>
where
    E: ProvisioningEngine + ?Sized,
{
    let name = blueprint.appliance_node_name();
    loop {
        match events.recv().await {
            Ok(Event::ApplianceActive {
                name: activated,
                endpoints,
            }) if activated == name => return Ok(endpoints),
            Ok(Event::ApplianceFailed {
                name: failed,
                reason,
            }) if failed == name => {
                return Err(DeployError::ApplianceFailed {
                    appliance: blueprint.appliance.name().to_string(),
                    reason,
                });
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event stream lagged, checking appliance status");
                match engine.appliance_status(&name).await? {
                    ApplianceStatus::Active(endpoints) => return Ok(endpoints),
                    ApplianceStatus::Failed(reason) => {
                        return Err(DeployError::ApplianceFailed {
                            appliance: blueprint.appliance.name().to_string(),
                            reason,
                        });
                    }
                    ApplianceStatus::Pending => {}
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(EngineError::Internal("event stream closed".to_string()).into());
            }
        }
    }
}
