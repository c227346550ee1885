//! Header match primitives shared by stateless and stateful rules.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::eval::{AppProtocol, Flow, PROTO_ICMP, PROTO_TCP, PROTO_UDP};

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub const ALL: PortRange = PortRange { from: 0, to: 65535 };

    pub fn new(from: u16, to: u16) -> Self {
        Self { from, to }
    }

    pub fn single(port: u16) -> Self {
        Self { from: port, to: port }
    }

    pub fn is_valid(&self) -> bool {
        self.from <= self.to
    }

    pub fn contains(&self, port: u16) -> bool {
        self.from <= port && port <= self.to
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}:{}", self.from, self.to)
        }
    }
}

impl FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| format!("invalid port '{}'", p))
        };
        let range = match s.split_once(':') {
            Some((from, to)) => PortRange::new(parse(from)?, parse(to)?),
            None => PortRange::single(parse(s)?),
        };
        if !range.is_valid() {
            return Err(format!("invalid port range {}: start > end", s));
        }
        Ok(range)
    }
}

/// Address side of a stateful header.
///
/// Tokens the model cannot interpret (rule variables, lists, negations) are
/// kept verbatim and never match a modeled flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AddressMatch {
    Any,
    Cidr(Ipv4Net),
    Opaque(String),
}

impl AddressMatch {
    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        match self {
            AddressMatch::Any => true,
            AddressMatch::Cidr(net) => net.contains(&addr),
            AddressMatch::Opaque(_) => false,
        }
    }
}

impl FromStr for AddressMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty address".to_string());
        }
        if s.eq_ignore_ascii_case("any") {
            return Ok(AddressMatch::Any);
        }
        if let Ok(net) = s.parse::<Ipv4Net>() {
            return Ok(AddressMatch::Cidr(net.trunc()));
        }
        if let Ok(addr) = s.parse::<Ipv4Addr>() {
            return Ok(AddressMatch::Cidr(Ipv4Net::from(addr)));
        }
        Ok(AddressMatch::Opaque(s.to_string()))
    }
}

impl TryFrom<String> for AddressMatch {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AddressMatch> for String {
    fn from(m: AddressMatch) -> String {
        m.to_string()
    }
}

impl fmt::Display for AddressMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressMatch::Any => f.write_str("ANY"),
            AddressMatch::Cidr(net) => write!(f, "{}", net),
            AddressMatch::Opaque(s) => f.write_str(s),
        }
    }
}

/// Port side of a stateful header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PortMatch {
    Any,
    Range(PortRange),
    Opaque(String),
}

impl PortMatch {
    pub fn matches(&self, port: Option<u16>) -> bool {
        match (self, port) {
            (PortMatch::Any, _) => true,
            (PortMatch::Range(range), Some(p)) => range.contains(p),
            _ => false,
        }
    }
}

impl FromStr for PortMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty port".to_string());
        }
        if s.eq_ignore_ascii_case("any") {
            return Ok(PortMatch::Any);
        }
        if s.chars().all(|c| c.is_ascii_digit() || c == ':') {
            return s.parse().map(PortMatch::Range);
        }
        Ok(PortMatch::Opaque(s.to_string()))
    }
}

impl TryFrom<String> for PortMatch {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PortMatch> for String {
    fn from(m: PortMatch) -> String {
        m.to_string()
    }
}

impl fmt::Display for PortMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortMatch::Any => f.write_str("ANY"),
            PortMatch::Range(range) => write!(f, "{}", range),
            PortMatch::Opaque(s) => f.write_str(s),
        }
    }
}

/// Stateless match attributes. Empty lists match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAttributes {
    /// IANA protocol numbers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Ipv4Net>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<Ipv4Net>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ports: Vec<PortRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_ports: Vec<PortRange>,
}

impl MatchAttributes {
    pub fn matches(&self, flow: &Flow) -> bool {
        fn any_net(nets: &[Ipv4Net], addr: Ipv4Addr) -> bool {
            nets.is_empty() || nets.iter().any(|n| n.contains(&addr))
        }
        fn any_port(ranges: &[PortRange], port: Option<u16>) -> bool {
            if ranges.is_empty() {
                return true;
            }
            port.is_some_and(|p| ranges.iter().any(|r| r.contains(p)))
        }

        (self.protocols.is_empty() || self.protocols.contains(&flow.protocol))
            && any_net(&self.sources, flow.source)
            && any_net(&self.destinations, flow.destination)
            && any_port(&self.source_ports, flow.source_port)
            && any_port(&self.destination_ports, flow.destination_port)
    }

    /// First reversed port range, if any.
    pub fn invalid_port_range(&self) -> Option<PortRange> {
        self.source_ports
            .iter()
            .chain(self.destination_ports.iter())
            .find(|r| !r.is_valid())
            .copied()
    }
}

/// Protocol keyword of a stateful header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatefulProtocol {
    Ip,
    Tcp,
    Udp,
    Icmp,
    Http,
    Tls,
    Dns,
}

impl StatefulProtocol {
    pub fn matches(&self, flow: &Flow) -> bool {
        match self {
            StatefulProtocol::Ip => true,
            StatefulProtocol::Tcp => flow.protocol == PROTO_TCP,
            StatefulProtocol::Udp => flow.protocol == PROTO_UDP,
            StatefulProtocol::Icmp => flow.protocol == PROTO_ICMP,
            StatefulProtocol::Http => {
                flow.protocol == PROTO_TCP
                    && (flow.app_protocol() == Some(AppProtocol::Http)
                        || (flow.app_protocol().is_none() && flow.destination_port == Some(80)))
            }
            StatefulProtocol::Tls => {
                flow.protocol == PROTO_TCP && flow.app_protocol() == Some(AppProtocol::Tls)
            }
            StatefulProtocol::Dns => flow.app_protocol() == Some(AppProtocol::Dns),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatefulProtocol::Ip => "ip",
            StatefulProtocol::Tcp => "tcp",
            StatefulProtocol::Udp => "udp",
            StatefulProtocol::Icmp => "icmp",
            StatefulProtocol::Http => "http",
            StatefulProtocol::Tls => "tls",
            StatefulProtocol::Dns => "dns",
        }
    }
}

impl FromStr for StatefulProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ip" => Ok(StatefulProtocol::Ip),
            "tcp" => Ok(StatefulProtocol::Tcp),
            "udp" => Ok(StatefulProtocol::Udp),
            "icmp" => Ok(StatefulProtocol::Icmp),
            "http" => Ok(StatefulProtocol::Http),
            "tls" | "ssl" => Ok(StatefulProtocol::Tls),
            "dns" => Ok(StatefulProtocol::Dns),
            other => Err(format!("unsupported protocol '{}'", other)),
        }
    }
}

/// Direction of a stateful header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Source to destination only (`->`).
    Forward,
    /// Either way (`<>`).
    Any,
}

/// Directional 5-tuple header of a stateful rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatefulHeader {
    pub protocol: StatefulProtocol,
    pub source: AddressMatch,
    pub source_port: PortMatch,
    pub direction: Direction,
    pub destination: AddressMatch,
    pub destination_port: PortMatch,
}

impl StatefulHeader {
    pub fn matches(&self, flow: &Flow) -> bool {
        if !self.protocol.matches(flow) {
            return false;
        }
        let forward = self.matches_oriented(flow);
        match self.direction {
            Direction::Forward => forward,
            Direction::Any => forward || self.matches_oriented(&flow.reversed()),
        }
    }

    fn matches_oriented(&self, flow: &Flow) -> bool {
        self.source.matches(flow.source)
            && self.source_port.matches(flow.source_port)
            && self.destination.matches(flow.destination)
            && self.destination_port.matches(flow.destination_port)
    }
}
