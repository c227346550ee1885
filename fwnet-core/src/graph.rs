//! Desired-state resource graph.
//!
//! Builders produce nodes and explicit "depends on" edges; nothing is
//! applied until the graph is complete. `waves` orders the nodes for the
//! single apply phase.

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("resource '{0}' is already defined with different content")]
    DuplicateNode(String),

    #[error("resource '{0}' is not in the graph")]
    UnknownNode(String),

    #[error("resource '{node}' depends on unknown resource '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    #[error("dependency cycle between: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("failed to serialize resource '{node}': {reason}")]
    Serialization { node: String, reason: String },
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Subnet,
    RouteTable,
    RuleGroup,
    Policy,
    Appliance,
    LoggingConfiguration,
    Route,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::RouteTable => "route_table",
            ResourceKind::RuleGroup => "rule_group",
            ResourceKind::Policy => "policy",
            ResourceKind::Appliance => "appliance",
            ResourceKind::LoggingConfiguration => "logging_configuration",
            ResourceKind::Route => "route",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One desired resource, keyed by a stable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub name: String,
    pub kind: ResourceKind,
    pub properties: serde_json::Value,
}

impl ResourceNode {
    pub fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        properties: &impl Serialize,
    ) -> Result<Self> {
        let name = name.into();
        let properties =
            serde_json::to_value(properties).map_err(|e| GraphError::Serialization {
                node: name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            name,
            kind,
            properties,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// All resources, keyed by stable name.
    nodes: BTreeMap<String, ResourceNode>,

    /// Edges point from a resource to the resources it depends on.
    dependencies: DiGraph<String, ()>,

    /// Lookup map to find a graph node by resource name.
    node_lookup: BTreeMap<String, NodeIndex>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Re-adding an identical node is a no-op.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<()> {
        match self.nodes.get(&node.name) {
            Some(existing) if *existing == node => Ok(()),
            Some(_) => Err(GraphError::DuplicateNode(node.name)),
            None => {
                let index = self.dependencies.add_node(node.name.clone());
                self.node_lookup.insert(node.name.clone(), index);
                self.nodes.insert(node.name.clone(), node);
                Ok(())
            }
        }
    }

    /// Record that `node` must be applied after `depends_on`.
    pub fn add_dependency(&mut self, node: &str, depends_on: &str) -> Result<()> {
        let dep_index = *self
            .node_lookup
            .get(depends_on)
            .ok_or_else(|| GraphError::UnknownDependency {
                node: node.to_string(),
                dependency: depends_on.to_string(),
            })?;
        let node_index = *self
            .node_lookup
            .get(node)
            .ok_or_else(|| GraphError::UnknownNode(node.to_string()))?;
        self.dependencies.update_edge(node_index, dep_index, ());
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Names of the resources `name` depends on, sorted.
    pub fn dependencies(&self, name: &str) -> impl Iterator<Item = &str> {
        let mut deps: Vec<&str> = self
            .node_lookup
            .get(name)
            .into_iter()
            .flat_map(|index| self.dependencies.neighbors_directed(*index, Direction::Outgoing))
            .map(|n| self.dependencies[n].as_str())
            .collect();
        deps.sort_unstable();
        deps.into_iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edges_count(&self) -> usize {
        self.dependencies.edge_count()
    }

    /// Topological order grouped into waves.
    ///
    /// A node's wave is one past the deepest wave among its dependencies.
    /// Each wave is sorted by name.
    pub fn waves(&self) -> Result<Vec<Vec<&ResourceNode>>> {
        let order = toposort(&self.dependencies, None)
            .map_err(|_| GraphError::DependencyCycle(self.cycle_members()))?;

        // Dependents come first in `order`, so walk it backwards.
        let mut depth: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
        for index in order.iter().rev() {
            let level = self
                .dependencies
                .neighbors_directed(*index, Direction::Outgoing)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(*index, level);
        }

        let mut waves: Vec<Vec<&ResourceNode>> = Vec::new();
        for (name, node) in &self.nodes {
            let Some(level) = self.node_lookup.get(name).and_then(|i| depth.get(i)) else {
                continue;
            };
            if waves.len() <= *level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[*level].push(node);
        }
        Ok(waves)
    }

    /// Names of every node on a cycle, sorted.
    fn cycle_members(&self) -> Vec<String> {
        let mut members: Vec<String> = tarjan_scc(&self.dependencies)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.dependencies.contains_edge(scc[0], scc[0]))
            .flatten()
            .map(|index| self.dependencies[index].clone())
            .collect();
        members.sort();
        members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(name: &str, kind: ResourceKind) -> ResourceNode {
        ResourceNode::new(name, kind, &json!({ "name": name })).unwrap()
    }

    fn names(waves: &[Vec<&ResourceNode>]) -> Vec<Vec<String>> {
        waves
            .iter()
            .map(|w| w.iter().map(|n| n.name.clone()).collect())
            .collect()
    }

    #[test]
    fn test_waves_follow_dependencies() {
        let mut graph = ResourceGraph::new();
        graph.add_node(node("policy", ResourceKind::Policy)).unwrap();
        graph.add_node(node("group-b", ResourceKind::RuleGroup)).unwrap();
        graph.add_node(node("group-a", ResourceKind::RuleGroup)).unwrap();
        graph.add_node(node("appliance", ResourceKind::Appliance)).unwrap();
        graph.add_dependency("policy", "group-a").unwrap();
        graph.add_dependency("policy", "group-b").unwrap();
        graph.add_dependency("appliance", "policy").unwrap();

        let waves = graph.waves().unwrap();
        assert_eq!(
            names(&waves),
            vec![
                vec!["group-a".to_string(), "group-b".to_string()],
                vec!["policy".to_string()],
                vec!["appliance".to_string()],
            ]
        );
    }

    #[test]
    fn test_identical_node_is_noop() {
        let mut graph = ResourceGraph::new();
        graph.add_node(node("a", ResourceKind::Subnet)).unwrap();
        graph.add_node(node("a", ResourceKind::Subnet)).unwrap();
        assert_eq!(graph.len(), 1);

        let changed = ResourceNode::new("a", ResourceKind::Subnet, &json!({"cidr": "10.0.0.0/24"})).unwrap();
        assert_eq!(
            graph.add_node(changed),
            Err(GraphError::DuplicateNode("a".to_string()))
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let mut graph = ResourceGraph::new();
        graph.add_node(node("a", ResourceKind::Route)).unwrap();
        assert!(matches!(
            graph.add_dependency("a", "missing"),
            Err(GraphError::UnknownDependency { .. })
        ));
        graph.add_node(node("b", ResourceKind::Route)).unwrap();
        assert_eq!(
            graph.add_dependency("missing", "b"),
            Err(GraphError::UnknownNode("missing".to_string()))
        );
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = ResourceGraph::new();
        for name in ["a", "b", "c"] {
            graph.add_node(node(name, ResourceKind::Subnet)).unwrap();
        }
        graph.add_dependency("b", "a").unwrap();
        graph.add_dependency("c", "b").unwrap();
        graph.add_dependency("b", "c").unwrap();
        assert_eq!(
            graph.waves(),
            Err(GraphError::DependencyCycle(vec!["b".to_string(), "c".to_string()]))
        );
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let mut graph = ResourceGraph::new();
        graph.add_node(node("a", ResourceKind::Policy)).unwrap();
        graph.add_node(node("b", ResourceKind::Policy)).unwrap();
        graph.add_dependency("b", "a").unwrap();
        graph.add_dependency("a", "a").unwrap();
        assert_eq!(
            graph.waves(),
            Err(GraphError::DependencyCycle(vec!["a".to_string()]))
        );
    }

    #[test]
    fn test_repeated_dependency_is_one_edge() {
        let mut graph = ResourceGraph::new();
        graph.add_node(node("appliance", ResourceKind::Appliance)).unwrap();
        graph.add_node(node("route/x", ResourceKind::Route)).unwrap();
        graph.add_dependency("route/x", "appliance").unwrap();
        graph.add_dependency("route/x", "appliance").unwrap();
        assert_eq!(graph.edges_count(), 1);
        assert_eq!(graph.dependencies("route/x").collect::<Vec<_>>(), vec!["appliance"]);
        assert_eq!(graph.dependencies("appliance").count(), 0);
    }

    #[test]
    fn test_wave_is_longest_dependency_chain() {
        // d depends on a directly and on a through b and c.
        let mut graph = ResourceGraph::new();
        for name in ["a", "b", "c", "d"] {
            graph.add_node(node(name, ResourceKind::Subnet)).unwrap();
        }
        graph.add_dependency("b", "a").unwrap();
        graph.add_dependency("c", "b").unwrap();
        graph.add_dependency("d", "c").unwrap();
        graph.add_dependency("d", "a").unwrap();
        let waves = graph.waves().unwrap();
        assert_eq!(
            names(&waves),
            vec![vec!["a"], vec!["b"], vec!["c"], vec!["d"]]
                .into_iter()
                .map(|w| w.into_iter().map(String::from).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        );
    }
}
