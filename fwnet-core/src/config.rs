//! Deployment description files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::appliance::ApplianceSpec;
use crate::logging::LoggingSpec;
use crate::policy::PolicySpec;
use crate::routes::RedirectionSpec;
use crate::rules::RuleGroupSpec;
use crate::topology::TopologySpec;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid deployment spec: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything needed to build a deployment.
///
/// Parsing only checks shape; semantic validation happens when the
/// blueprint is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub topology: TopologySpec,
    #[serde(default)]
    pub rule_groups: Vec<RuleGroupSpec>,
    pub policy: PolicySpec,
    pub appliance: ApplianceSpec,
    #[serde(default)]
    pub redirection: RedirectionSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSpec>,
}

impl DeploymentSpec {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loading deployment spec");
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}
