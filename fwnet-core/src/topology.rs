//! Tiered address space: one parent block carved into per-AZ tier subnets.
//!
//! This module provides:
//! - `Tier`: Edge, Inspection and Protected partitions
//! - `TopologySpec`: the requested parent block, prefix lengths and AZs
//! - `Topology`: the carved subnets plus lookups by subnet, tier, AZ and address

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::error::{ModelError, Result};

/// Route table owned by the internet gateway for ingress redirection.
pub const GATEWAY_ROUTE_TABLE: &str = "rtb-gateway-ingress";

/// A named partition of the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Public-facing subnets (load balancer, internet gateway routes).
    Edge,
    /// Subnets hosting the inspection appliance endpoints.
    Inspection,
    /// Isolated subnets hosting the protected workload.
    Protected,
}

impl Tier {
    /// All tiers in carving order.
    pub const ALL: [Tier; 3] = [Tier::Edge, Tier::Inspection, Tier::Protected];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Edge => "edge",
            Tier::Inspection => "inspection",
            Tier::Protected => "protected",
        }
    }

    pub fn reachability(&self) -> Reachability {
        match self {
            Tier::Edge => Reachability::Public,
            Tier::Inspection => Reachability::EgressOnly,
            Tier::Protected => Reachability::Isolated,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "edge" => Ok(Tier::Edge),
            "inspection" => Ok(Tier::Inspection),
            "protected" => Ok(Tier::Protected),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// How a tier reaches the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Public,
    EgressOnly,
    Isolated,
}

impl Reachability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reachability::Public => "public",
            Reachability::EgressOnly => "egress-only",
            Reachability::Isolated => "isolated",
        }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Availability zone identifier.
    AzId
);
string_id!(
    /// Stable subnet identifier (`<tier>-<az>`).
    SubnetId
);
string_id!(
    /// Stable route table identifier.
    RouteTableId
);

impl AzId {
    /// Generate `az-1..az-N`.
    pub fn numbered(count: usize) -> Vec<AzId> {
        (1..=count).map(|i| AzId(format!("az-{}", i))).collect()
    }
}

/// Requested prefix length per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPrefixes {
    pub edge: u8,
    pub inspection: u8,
    pub protected: u8,
}

impl TierPrefixes {
    /// Same prefix length for every tier.
    pub fn uniform(prefix_len: u8) -> Self {
        Self {
            edge: prefix_len,
            inspection: prefix_len,
            protected: prefix_len,
        }
    }

    pub fn get(&self, tier: Tier) -> u8 {
        match tier {
            Tier::Edge => self.edge,
            Tier::Inspection => self.inspection,
            Tier::Protected => self.protected,
        }
    }
}

/// Availability zones either as a count or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AzSelection {
    Count(usize),
    Named(Vec<AzId>),
}

impl AzSelection {
    pub fn resolve(&self) -> Vec<AzId> {
        match self {
            AzSelection::Count(n) => AzId::numbered(*n),
            AzSelection::Named(azs) => azs.clone(),
        }
    }
}

/// Input for carving a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySpec {
    /// Parent address block.
    pub cidr: Ipv4Net,
    pub availability_zones: AzSelection,
    pub tiers: TierPrefixes,
}

impl TopologySpec {
    pub fn new(cidr: Ipv4Net, az_count: usize, tiers: TierPrefixes) -> Self {
        Self {
            cidr,
            availability_zones: AzSelection::Count(az_count),
            tiers,
        }
    }
}

/// One carved subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: SubnetId,
    pub tier: Tier,
    pub az: AzId,
    pub cidr: Ipv4Net,
    /// Every subnet owns exactly one route table.
    pub route_table: RouteTableId,
}

impl Subnet {
    fn new(tier: Tier, az: AzId, cidr: Ipv4Net) -> Self {
        let id = format!("{}-{}", tier.as_str(), az);
        Self {
            route_table: RouteTableId(format!("rtb-{}", id)),
            id: SubnetId(id),
            tier,
            az,
            cidr,
        }
    }

    pub fn reachability(&self) -> Reachability {
        self.tier.reachability()
    }
}

/// The carved address space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    cidr: Ipv4Net,
    azs: Vec<AzId>,
    subnets: Vec<Subnet>,
}

impl Topology {
    /// Carve one subnet per tier per AZ out of the parent block.
    ///
    /// Blocks are allocated tier by tier, AZ by AZ, each aligned to its own
    /// size and placed after the previous allocation.
    pub fn carve(spec: &TopologySpec) -> Result<Self> {
        let azs = spec.availability_zones.resolve();
        if azs.is_empty() {
            return Err(ModelError::InvalidTopology(
                "at least one availability zone is required".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for az in &azs {
            if !seen.insert(az) {
                return Err(ModelError::InvalidTopology(format!(
                    "availability zone {} is listed twice",
                    az
                )));
            }
        }

        let parent = spec.cidr.trunc();
        let end = u64::from(u32::from(parent.broadcast())) + 1;
        let mut cursor = u64::from(u32::from(parent.network()));
        let mut subnets = Vec::with_capacity(Tier::ALL.len() * azs.len());

        for tier in Tier::ALL {
            let prefix_len = spec.tiers.get(tier);
            if prefix_len > 32 {
                return Err(ModelError::InvalidTopology(format!(
                    "{} prefix length /{} is not a valid IPv4 prefix",
                    tier, prefix_len
                )));
            }
            if prefix_len < parent.prefix_len() {
                return Err(ModelError::AddressSpaceExhausted {
                    parent,
                    requested: format!("{} /{}", tier, prefix_len),
                });
            }

            let size = 1u64 << (32 - prefix_len);
            for az in &azs {
                let start = cursor.div_ceil(size) * size;
                if start + size > end {
                    return Err(ModelError::AddressSpaceExhausted {
                        parent,
                        requested: format!("{} /{} in {}", tier, prefix_len, az),
                    });
                }
                let base = u32::try_from(start).map_err(|_| ModelError::AddressSpaceExhausted {
                    parent,
                    requested: format!("{} /{} in {}", tier, prefix_len, az),
                })?;
                let cidr = Ipv4Net::new(Ipv4Addr::from(base), prefix_len)
                    .map_err(|e| ModelError::InvalidTopology(e.to_string()))?;
                cursor = start + size;

                debug!(%tier, %az, %cidr, "Carved subnet");
                subnets.push(Subnet::new(tier, az.clone(), cidr));
            }
        }

        Ok(Self {
            cidr: parent,
            azs,
            subnets,
        })
    }

    /// Parent address block.
    pub fn cidr(&self) -> Ipv4Net {
        self.cidr
    }

    pub fn azs(&self) -> &[AzId] {
        &self.azs
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    /// Subnets of one tier, in AZ order.
    pub fn subnets_in(&self, tier: Tier) -> impl Iterator<Item = &Subnet> {
        self.subnets.iter().filter(move |s| s.tier == tier)
    }

    /// The subnet of a tier in a given AZ.
    pub fn subnet(&self, tier: Tier, az: &AzId) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.tier == tier && &s.az == az)
    }

    pub fn subnet_by_id(&self, id: &SubnetId) -> Option<&Subnet> {
        self.subnets.iter().find(|s| &s.id == id)
    }

    pub fn tier_for_subnet(&self, id: &SubnetId) -> Option<Tier> {
        self.subnet_by_id(id).map(|s| s.tier)
    }

    pub fn az_for_subnet(&self, id: &SubnetId) -> Option<&AzId> {
        self.subnet_by_id(id).map(|s| &s.az)
    }

    /// The subnet whose block contains `addr`, if any.
    pub fn subnet_containing(&self, addr: Ipv4Addr) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.cidr.contains(&addr))
    }

    /// Route table of the internet gateway (ingress routing).
    pub fn gateway_route_table(&self) -> RouteTableId {
        RouteTableId::new(GATEWAY_ROUTE_TABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab_spec() -> TopologySpec {
        TopologySpec::new("10.1.0.0/16".parse().unwrap(), 1, TierPrefixes::uniform(28))
    }

    fn assert_disjoint_subsets(topology: &Topology) {
        let subnets = topology.subnets();
        for (i, a) in subnets.iter().enumerate() {
            assert!(topology.cidr().contains(&a.cidr), "{} outside parent", a.cidr);
            for b in &subnets[i + 1..] {
                assert!(
                    !a.cidr.contains(&b.cidr.network()) && !b.cidr.contains(&a.cidr.network()),
                    "{} overlaps {}",
                    a.cidr,
                    b.cidr
                );
            }
        }
    }

    #[test]
    fn test_carve_lab_topology() {
        let topology = Topology::carve(&lab_spec()).unwrap();
        let cidrs: Vec<String> = topology.subnets().iter().map(|s| s.cidr.to_string()).collect();
        assert_eq!(cidrs, vec!["10.1.0.0/28", "10.1.0.16/28", "10.1.0.32/28"]);

        let edge = topology.subnet(Tier::Edge, &AzId::new("az-1")).unwrap();
        assert_eq!(edge.id.as_str(), "edge-az-1");
        assert_eq!(edge.route_table.as_str(), "rtb-edge-az-1");
        assert_eq!(edge.reachability(), Reachability::Public);
    }

    #[test]
    fn test_carve_disjoint_for_mixed_prefixes() {
        let specs = [
            TopologySpec::new(
                "10.0.0.0/16".parse().unwrap(),
                3,
                TierPrefixes {
                    edge: 24,
                    inspection: 28,
                    protected: 20,
                },
            ),
            TopologySpec::new(
                "172.16.0.0/20".parse().unwrap(),
                2,
                TierPrefixes {
                    edge: 26,
                    inspection: 27,
                    protected: 24,
                },
            ),
            TopologySpec::new("192.168.0.0/24".parse().unwrap(), 4, TierPrefixes::uniform(28)),
        ];

        for spec in &specs {
            let topology = Topology::carve(spec).unwrap();
            let azs = spec.availability_zones.resolve().len();
            assert_eq!(topology.subnets().len(), 3 * azs);
            assert_disjoint_subsets(&topology);
            for s in topology.subnets() {
                assert_eq!(s.cidr.prefix_len(), spec.tiers.get(s.tier));
            }
        }
    }

    #[test]
    fn test_carve_aligns_larger_blocks() {
        let spec = TopologySpec::new(
            "10.0.0.0/16".parse().unwrap(),
            1,
            TierPrefixes {
                edge: 28,
                inspection: 28,
                protected: 24,
            },
        );
        let topology = Topology::carve(&spec).unwrap();
        let protected = topology.subnets_in(Tier::Protected).next().unwrap();
        // The /24 must start on a /24 boundary after the two /28s.
        assert_eq!(protected.cidr.to_string(), "10.0.1.0/24");
    }

    #[test]
    fn test_carve_exhausted() {
        let spec = TopologySpec::new("10.0.0.0/26".parse().unwrap(), 2, TierPrefixes::uniform(28));
        let err = Topology::carve(&spec).unwrap_err();
        assert!(matches!(err, ModelError::AddressSpaceExhausted { .. }));

        let spec = TopologySpec::new("10.0.0.0/24".parse().unwrap(), 1, TierPrefixes::uniform(16));
        assert!(matches!(
            Topology::carve(&spec),
            Err(ModelError::AddressSpaceExhausted { .. })
        ));
    }

    #[test]
    fn test_carve_rejects_bad_azs() {
        let mut spec = lab_spec();
        spec.availability_zones = AzSelection::Count(0);
        assert!(matches!(
            Topology::carve(&spec),
            Err(ModelError::InvalidTopology(_))
        ));

        spec.availability_zones = AzSelection::Named(vec!["eu-1a".into(), "eu-1a".into()]);
        assert!(matches!(
            Topology::carve(&spec),
            Err(ModelError::InvalidTopology(_))
        ));
    }

    #[test]
    fn test_lookups() {
        let mut spec = lab_spec();
        spec.availability_zones = AzSelection::Named(vec!["eu-1a".into(), "eu-1b".into()]);
        let topology = Topology::carve(&spec).unwrap();

        let id = SubnetId::new("protected-eu-1b");
        assert_eq!(topology.tier_for_subnet(&id), Some(Tier::Protected));
        assert_eq!(topology.az_for_subnet(&id), Some(&AzId::new("eu-1b")));
        assert_eq!(topology.tier_for_subnet(&SubnetId::new("nope")), None);

        let protected = topology.subnet_by_id(&id).unwrap();
        let inside = protected.cidr.hosts().next().unwrap();
        assert_eq!(topology.subnet_containing(inside).map(|s| &s.id), Some(&id));
        assert!(topology.subnet_containing("10.2.0.1".parse().unwrap()).is_none());
        assert_eq!(topology.subnets_in(Tier::Edge).count(), 2);
    }

    #[test]
    fn test_az_selection_from_json() {
        let spec: TopologySpec = serde_json::from_str(
            r#"{"cidr":"10.1.0.0/16","availability_zones":2,"tiers":{"edge":28,"inspection":28,"protected":28}}"#,
        )
        .unwrap();
        assert_eq!(spec.availability_zones.resolve(), AzId::numbered(2));

        let spec: TopologySpec = serde_json::from_str(
            r#"{"cidr":"10.1.0.0/16","availability_zones":["us-east-1a"],"tiers":{"edge":28,"inspection":28,"protected":28}}"#,
        )
        .unwrap();
        assert_eq!(spec.availability_zones.resolve(), vec![AzId::new("us-east-1a")]);
    }
}
