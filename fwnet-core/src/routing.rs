//! Longest-prefix-match view of the network's route tables.
//!
//! Combines the base routes every carved subnet starts with and the entries
//! produced by the route binder, and answers which next hop a packet takes.

use ipnet::Ipv4Net;
use prefix_trie::PrefixMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use crate::appliance::EndpointHandle;
use crate::routes::RouteEntry;
use crate::topology::{AzId, RouteTableId, SubnetId, Tier, Topology};

/// Where a route table sends matching packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextHop {
    /// Inside the parent address block.
    Local,
    InternetGateway,
    NatGateway,
    Endpoint { handle: EndpointHandle, az: AzId },
}

impl NextHop {
    pub fn is_endpoint(&self) -> bool {
        matches!(self, NextHop::Endpoint { .. })
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextHop::Local => f.write_str("local"),
            NextHop::InternetGateway => f.write_str("internet-gateway"),
            NextHop::NatGateway => f.write_str("nat-gateway"),
            NextHop::Endpoint { handle, az } => write!(f, "{} ({})", handle, az),
        }
    }
}

/// One route table with LPM lookup.
#[derive(Clone)]
pub struct LpmTable {
    pub id: RouteTableId,
    routes: PrefixMap<Ipv4Net, NextHop>,
}

impl LpmTable {
    pub fn new(id: RouteTableId) -> Self {
        LpmTable {
            id,
            routes: PrefixMap::new(),
        }
    }

    /// Insert or replace a route.
    pub fn insert(&mut self, prefix: Ipv4Net, next_hop: NextHop) {
        self.routes.insert(prefix, next_hop);
    }

    /// Longest matching prefix and its next hop.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<(&Ipv4Net, &NextHop)> {
        let prefix = Ipv4Net::new(addr, 32).ok()?;
        self.routes.get_lpm(&prefix)
    }

    pub fn routes(&self) -> impl Iterator<Item = (&Ipv4Net, &NextHop)> {
        self.routes.iter()
    }
}

/// All route tables of a deployment.
#[derive(Clone)]
pub struct RoutingView {
    tables: BTreeMap<RouteTableId, LpmTable>,
    subnet_tables: BTreeMap<SubnetId, RouteTableId>,
    gateway: RouteTableId,
}

impl RoutingView {
    /// Base routes of the topology with the bound entries applied on top.
    pub fn new(topology: &Topology, bound: &[RouteEntry]) -> Self {
        let mut tables = BTreeMap::new();
        let mut subnet_tables = BTreeMap::new();

        for subnet in topology.subnets() {
            let mut table = LpmTable::new(subnet.route_table.clone());
            table.insert(topology.cidr(), NextHop::Local);
            match subnet.tier {
                Tier::Edge => table.insert(Ipv4Net::default(), NextHop::InternetGateway),
                Tier::Inspection => table.insert(Ipv4Net::default(), NextHop::NatGateway),
                Tier::Protected => {}
            }
            subnet_tables.insert(subnet.id.clone(), subnet.route_table.clone());
            tables.insert(subnet.route_table.clone(), table);
        }

        let gateway = topology.gateway_route_table();
        let mut gateway_table = LpmTable::new(gateway.clone());
        gateway_table.insert(topology.cidr(), NextHop::Local);
        tables.insert(gateway.clone(), gateway_table);

        for entry in bound {
            tables
                .entry(entry.route_table.clone())
                .or_insert_with(|| LpmTable::new(entry.route_table.clone()))
                .insert(
                    entry.destination,
                    NextHop::Endpoint {
                        handle: entry.target.clone(),
                        az: entry.az.clone(),
                    },
                );
        }

        Self {
            tables,
            subnet_tables,
            gateway,
        }
    }

    pub fn table(&self, id: &RouteTableId) -> Option<&LpmTable> {
        self.tables.get(id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &LpmTable> {
        self.tables.values()
    }

    /// Next hop for a packet leaving `subnet` towards `destination`.
    ///
    /// `None` means the destination is unreachable from that subnet.
    pub fn next_hop(&self, subnet: &SubnetId, destination: Ipv4Addr) -> Option<&NextHop> {
        let table = self.subnet_tables.get(subnet)?;
        self.tables
            .get(table)?
            .lookup(destination)
            .map(|(_, hop)| hop)
    }

    /// Whether traffic from `subnet` to `destination` goes through an
    /// inspection endpoint on its first hop.
    pub fn is_inspected(&self, subnet: &SubnetId, destination: Ipv4Addr) -> bool {
        self.next_hop(subnet, destination)
            .is_some_and(NextHop::is_endpoint)
    }

    /// Whether inbound internet traffic to `destination` is inspected at the
    /// gateway.
    pub fn is_ingress_inspected(&self, destination: Ipv4Addr) -> bool {
        self.tables
            .get(&self.gateway)
            .and_then(|t| t.lookup(destination))
            .is_some_and(|(_, hop)| hop.is_endpoint())
    }
}
