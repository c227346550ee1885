//! Test helpers for fwnet-core integration tests.

#![allow(dead_code)]

use std::net::Ipv4Addr;

use fwnet_core::topology::AzSelection;
use fwnet_core::{DeploymentSpec, Tier, Topology};

/// Path of the lab deployment shipped with the repository.
pub const LAB_SPEC: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../demos/anfw-lab.json");

/// The single-AZ lab: three /28 tiers in 10.1.0.0/16.
pub fn lab_spec() -> DeploymentSpec {
    DeploymentSpec::from_file(LAB_SPEC).expect("Failed to load lab spec")
}

/// The lab spread over `az_count` zones with gateway ingress inspection.
pub fn multi_az_spec(az_count: usize) -> DeploymentSpec {
    let mut spec = lab_spec();
    spec.topology.availability_zones = AzSelection::Count(az_count);
    spec.redirection.gateway_ingress = true;
    spec
}

pub fn addr(s: &str) -> Ipv4Addr {
    s.parse().expect("invalid address")
}

/// First usable address of the tier's subnet in the first zone.
pub fn first_host(topology: &Topology, tier: Tier) -> Ipv4Addr {
    topology
        .subnets_in(tier)
        .next()
        .and_then(|s| s.cidr.hosts().next())
        .expect("tier has no hosts")
}
