//! Endpoint-aware route binding.
//!
//! Once the appliance is active, tier-crossing routes are rewritten to point
//! at the inspection endpoint serving the relevant availability zone. Every
//! endpoint is resolved by AZ identifier.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::appliance::{Appliance, EndpointHandle, EndpointMap};
use crate::error::{ModelError, Result};
use crate::topology::{AzId, RouteTableId, Subnet, Tier, Topology};

/// A route steering a destination through an inspection endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub route_table: RouteTableId,
    pub destination: Ipv4Net,
    pub target: EndpointHandle,
    /// Availability zone of the target endpoint.
    pub az: AzId,
}

impl RouteEntry {
    /// Stable name: `route/<table>/<cidr>`.
    pub fn name(&self) -> String {
        format!("route/{}/{}", self.route_table, self.destination)
    }
}

/// Traffic from `source` subnets to `destination` subnets is inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPair {
    pub source: Tier,
    pub destination: Tier,
}

impl TierPair {
    pub fn new(source: Tier, destination: Tier) -> Self {
        Self {
            source,
            destination,
        }
    }
}

/// Which routes to redirect through the appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectionSpec {
    #[serde(default)]
    pub tier_pairs: Vec<TierPair>,
    /// Protected subnets reach everything else through the appliance.
    #[serde(default)]
    pub protected_default_route: bool,
    /// Inbound internet traffic to Edge subnets is inspected at the gateway.
    #[serde(default)]
    pub gateway_ingress: bool,
}

impl RedirectionSpec {
    /// Edge → Protected via the appliance, and a Protected default route.
    pub fn standard() -> Self {
        Self {
            tier_pairs: vec![TierPair::new(Tier::Edge, Tier::Protected)],
            protected_default_route: true,
            gateway_ingress: false,
        }
    }

    pub fn with_gateway_ingress(mut self) -> Self {
        self.gateway_ingress = true;
        self
    }

    /// Reject same-tier pairs, pairs involving the inspection tier and repeats.
    pub fn validate(&self) -> Result<()> {
        for (i, pair) in self.tier_pairs.iter().enumerate() {
            if pair.source == pair.destination {
                return Err(ModelError::InvalidRedirection(format!(
                    "{} to {} does not cross a tier boundary",
                    pair.source, pair.destination
                )));
            }
            if pair.source == Tier::Inspection || pair.destination == Tier::Inspection {
                return Err(ModelError::InvalidRedirection(format!(
                    "{} to {} involves the inspection tier",
                    pair.source, pair.destination
                )));
            }
            if self.tier_pairs[..i].contains(pair) {
                return Err(ModelError::InvalidRedirection(format!(
                    "{} to {} is listed twice",
                    pair.source, pair.destination
                )));
            }
        }
        Ok(())
    }
}

impl Default for RedirectionSpec {
    fn default() -> Self {
        Self::standard()
    }
}

/// Produces route entries for an active appliance.
pub struct RouteBinder<'a> {
    topology: &'a Topology,
    appliance: &'a Appliance,
    endpoints: &'a EndpointMap,
}

impl<'a> RouteBinder<'a> {
    /// Fails with `ApplianceNotReady` unless the appliance is active.
    pub fn new(topology: &'a Topology, appliance: &'a Appliance) -> Result<Self> {
        let endpoints = appliance.endpoints()?;
        Ok(Self {
            topology,
            appliance,
            endpoints,
        })
    }

    pub fn bind(&self, spec: &RedirectionSpec) -> Result<Vec<RouteEntry>> {
        spec.validate()?;

        let mut routes = RouteSet::default();
        for pair in &spec.tier_pairs {
            for source in self.topology.subnets_in(pair.source) {
                for destination in self.topology.subnets_in(pair.destination) {
                    routes.push(self.entry(
                        source.route_table.clone(),
                        destination.cidr,
                        destination,
                    )?)?;
                }
            }
        }
        if spec.protected_default_route {
            for subnet in self.topology.subnets_in(Tier::Protected) {
                routes.push(self.entry(subnet.route_table.clone(), Ipv4Net::default(), subnet)?)?;
            }
        }
        if spec.gateway_ingress {
            let table = self.topology.gateway_route_table();
            for subnet in self.topology.subnets_in(Tier::Edge) {
                routes.push(self.entry(table.clone(), subnet.cidr, subnet)?)?;
            }
        }

        debug!(
            appliance = %self.appliance.name(),
            routes = routes.entries.len(),
            "Bound routes to inspection endpoints"
        );
        Ok(routes.entries)
    }

    /// Route via the endpoint in `zone_of`'s availability zone.
    fn entry(
        &self,
        route_table: RouteTableId,
        destination: Ipv4Net,
        zone_of: &Subnet,
    ) -> Result<RouteEntry> {
        let target = self
            .endpoints
            .get(&zone_of.az)
            .ok_or_else(|| ModelError::EndpointNotFound {
                appliance: self.appliance.name().to_string(),
                az: zone_of.az.to_string(),
            })?;
        debug!(table = %route_table, %destination, endpoint = %target, "Binding route");
        Ok(RouteEntry {
            route_table,
            destination,
            target: target.clone(),
            az: zone_of.az.clone(),
        })
    }
}

#[derive(Default)]
struct RouteSet {
    entries: Vec<RouteEntry>,
    by_table: BTreeMap<RouteTableId, Vec<Ipv4Net>>,
}

impl RouteSet {
    fn push(&mut self, entry: RouteEntry) -> Result<()> {
        let destinations = self.by_table.entry(entry.route_table.clone()).or_default();
        if let Some(existing) = destinations
            .iter()
            .find(|d| ipv4_subnets_overlap(d, &entry.destination))
        {
            return Err(ModelError::RouteConflict {
                route_table: entry.route_table.to_string(),
                destination: entry.destination,
                existing: *existing,
            });
        }
        destinations.push(entry.destination);
        self.entries.push(entry);
        Ok(())
    }
}

/// Check if two IPv4 subnets overlap.
pub fn ipv4_subnets_overlap(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network())
        || a.contains(&b.broadcast())
        || b.contains(&a.network())
        || b.contains(&a.broadcast())
}
