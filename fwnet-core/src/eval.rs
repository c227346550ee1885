//! Flow and verdict types for modeling how the appliance evaluates traffic.
//!
//! Nothing here inspects real packets. A `Flow` describes the header fields
//! and application hints the appliance would see, and a `Verdict` records
//! which step of the evaluation order decided its fate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// Application protocol hint used by stateful protocol keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppProtocol {
    Http,
    Tls,
    Dns,
}

/// A modeled flow, seen in its forward (client to server) direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    /// IANA protocol number.
    pub protocol: u8,
    pub source: Ipv4Addr,
    #[serde(default)]
    pub source_port: Option<u16>,
    pub destination: Ipv4Addr,
    #[serde(default)]
    pub destination_port: Option<u16>,
    /// TLS server name indication, when the flow is TLS.
    #[serde(default)]
    pub tls_sni: Option<String>,
    /// HTTP Host header, when the flow is plain HTTP.
    #[serde(default)]
    pub http_host: Option<String>,
    /// Packet is an IP fragment.
    #[serde(default)]
    pub fragment: bool,
    /// Packet belongs to an established connection.
    #[serde(default = "default_established")]
    pub established: bool,
}

fn default_established() -> bool {
    true
}

impl Flow {
    pub fn new(protocol: u8, source: Ipv4Addr, destination: Ipv4Addr) -> Self {
        Self {
            protocol,
            source,
            source_port: None,
            destination,
            destination_port: None,
            tls_sni: None,
            http_host: None,
            fragment: false,
            established: true,
        }
    }

    pub fn tcp(source: Ipv4Addr, source_port: u16, destination: Ipv4Addr, destination_port: u16) -> Self {
        Self {
            source_port: Some(source_port),
            destination_port: Some(destination_port),
            ..Self::new(PROTO_TCP, source, destination)
        }
    }

    pub fn udp(source: Ipv4Addr, source_port: u16, destination: Ipv4Addr, destination_port: u16) -> Self {
        Self {
            source_port: Some(source_port),
            destination_port: Some(destination_port),
            ..Self::new(PROTO_UDP, source, destination)
        }
    }

    pub fn icmp(source: Ipv4Addr, destination: Ipv4Addr) -> Self {
        Self::new(PROTO_ICMP, source, destination)
    }

    pub fn with_tls_sni(mut self, sni: impl Into<String>) -> Self {
        self.tls_sni = Some(sni.into());
        self
    }

    pub fn with_http_host(mut self, host: impl Into<String>) -> Self {
        self.http_host = Some(host.into());
        self
    }

    pub fn as_fragment(mut self) -> Self {
        self.fragment = true;
        self
    }

    /// First packet of a new connection.
    pub fn as_new_connection(mut self) -> Self {
        self.established = false;
        self
    }

    /// The same flow seen from the other side.
    pub fn reversed(&self) -> Self {
        Self {
            source: self.destination,
            source_port: self.destination_port,
            destination: self.source,
            destination_port: self.source_port,
            ..self.clone()
        }
    }

    /// Application protocol derived from the flow's hints.
    pub fn app_protocol(&self) -> Option<AppProtocol> {
        if self.tls_sni.is_some() {
            Some(AppProtocol::Tls)
        } else if self.http_host.is_some() {
            Some(AppProtocol::Http)
        } else if (self.protocol == PROTO_UDP || self.protocol == PROTO_TCP)
            && self.destination_port == Some(53)
        {
            Some(AppProtocol::Dns)
        } else {
            None
        }
    }
}

/// Final fate of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalAction {
    Pass,
    Drop,
}

impl fmt::Display for FinalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalAction::Pass => f.write_str("pass"),
            FinalAction::Drop => f.write_str("drop"),
        }
    }
}

/// Which evaluation step produced the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Decision {
    StatelessRule { group: String, priority: u32 },
    StatelessDefault,
    FragmentDefault,
    StatefulRule { group: String, sid: Option<u64> },
    /// Only alert rules matched; the flow is not subject to the default.
    AlertedOnly,
    StatefulDefault,
}

/// An alert raised while evaluating a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Group that raised the alert, `None` for the stateful default.
    pub group: Option<String>,
    pub sid: Option<u64>,
}

/// Result of evaluating a flow against a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub action: FinalAction,
    pub decided_by: Decision,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

impl Verdict {
    pub fn pass(decided_by: Decision) -> Self {
        Self {
            action: FinalAction::Pass,
            decided_by,
            alerts: Vec::new(),
        }
    }

    pub fn drop(decided_by: Decision) -> Self {
        Self {
            action: FinalAction::Drop,
            decided_by,
            alerts: Vec::new(),
        }
    }

    pub fn with_alerts(mut self, alerts: Vec<Alert>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn is_pass(&self) -> bool {
        self.action == FinalAction::Pass
    }

    pub fn is_drop(&self) -> bool {
        self.action == FinalAction::Drop
    }

    pub fn alerted(&self) -> bool {
        !self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_protocol_hints() {
        let a = "10.0.0.1".parse().unwrap();
        let b = "10.0.0.2".parse().unwrap();

        assert_eq!(
            Flow::tcp(a, 40000, b, 443).with_tls_sni("s3.amazonaws.com").app_protocol(),
            Some(AppProtocol::Tls)
        );
        assert_eq!(
            Flow::tcp(a, 40000, b, 80).with_http_host("example.com").app_protocol(),
            Some(AppProtocol::Http)
        );
        assert_eq!(Flow::udp(a, 40000, b, 53).app_protocol(), Some(AppProtocol::Dns));
        assert_eq!(Flow::tcp(a, 40000, b, 80).app_protocol(), None);
    }

    #[test]
    fn test_reversed_swaps_endpoints() {
        let flow = Flow::tcp("10.0.0.1".parse().unwrap(), 40000, "10.0.0.2".parse().unwrap(), 80);
        let back = flow.reversed();
        assert_eq!(back.source, flow.destination);
        assert_eq!(back.source_port, Some(80));
        assert_eq!(back.destination_port, Some(40000));
        assert_eq!(back.reversed(), flow);
    }

    #[test]
    fn test_flow_defaults_from_json() {
        let flow: Flow = serde_json::from_str(
            r#"{"protocol":1,"source":"10.0.0.1","destination":"10.0.0.2"}"#,
        )
        .unwrap();
        assert!(flow.established);
        assert!(!flow.fragment);
        assert_eq!(flow.destination_port, None);
    }
}
