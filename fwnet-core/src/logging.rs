//! Appliance log delivery.
//!
//! Log destinations are created outside this system and referenced by name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{ModelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogType {
    Alert,
    Flow,
    Tls,
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogType::Alert => f.write_str("ALERT"),
            LogType::Flow => f.write_str("FLOW"),
            LogType::Tls => f.write_str("TLS"),
        }
    }
}

/// An externally created log sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogDestination {
    LogGroup {
        name: String,
    },
    Bucket {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    DeliveryStream {
        name: String,
    },
}

impl LogDestination {
    pub fn log_group(name: impl Into<String>) -> Self {
        LogDestination::LogGroup { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            LogDestination::LogGroup { name }
            | LogDestination::Bucket { name, .. }
            | LogDestination::DeliveryStream { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDestinationConfig {
    pub log_type: LogType,
    pub destination: LogDestination,
}

/// Unvalidated logging section of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSpec {
    #[serde(default)]
    pub destinations: Vec<LogDestinationConfig>,
}

impl LoggingSpec {
    pub fn deliver(mut self, log_type: LogType, destination: LogDestination) -> Self {
        self.destinations.push(LogDestinationConfig {
            log_type,
            destination,
        });
        self
    }
}

/// Validated log delivery for one appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggingConfiguration {
    appliance: String,
    destinations: Vec<LogDestinationConfig>,
}

impl LoggingConfiguration {
    /// Each log type may be delivered to at most one destination.
    pub fn new(appliance: impl Into<String>, spec: LoggingSpec) -> Result<Self> {
        let appliance = appliance.into();
        let mut seen = BTreeSet::new();
        for config in &spec.destinations {
            if !seen.insert(config.log_type) {
                return Err(ModelError::DuplicateLogType {
                    appliance,
                    log_type: config.log_type.to_string(),
                });
            }
        }
        Ok(Self {
            appliance,
            destinations: spec.destinations,
        })
    }

    pub fn appliance(&self) -> &str {
        &self.appliance
    }

    pub fn destinations(&self) -> &[LogDestinationConfig] {
        &self.destinations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_and_flow_to_one_group() {
        let spec = LoggingSpec::default()
            .deliver(LogType::Alert, LogDestination::log_group("anfw_lab"))
            .deliver(LogType::Flow, LogDestination::log_group("anfw_lab"));
        let logging = LoggingConfiguration::new("ANFW-Lab", spec).unwrap();
        assert_eq!(logging.destinations().len(), 2);
        assert_eq!(logging.destinations()[1].destination.name(), "anfw_lab");
    }

    #[test]
    fn test_duplicate_log_type() {
        let spec = LoggingSpec::default()
            .deliver(LogType::Tls, LogDestination::log_group("a"))
            .deliver(LogType::Tls, LogDestination::log_group("b"));
        assert_eq!(
            LoggingConfiguration::new("fw", spec),
            Err(ModelError::DuplicateLogType {
                appliance: "fw".to_string(),
                log_type: "TLS".to_string()
            })
        );
    }

    #[test]
    fn test_destination_json() {
        let config: LogDestinationConfig = serde_json::from_str(
            r#"{"log_type": "FLOW", "destination": {"type": "bucket", "name": "logs", "prefix": "fw/"}}"#,
        )
        .unwrap();
        assert_eq!(config.log_type, LogType::Flow);
        assert_eq!(
            config.destination,
            LogDestination::Bucket {
                name: "logs".to_string(),
                prefix: Some("fw/".to_string())
            }
        );
    }
}
