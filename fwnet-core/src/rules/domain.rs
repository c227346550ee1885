//! Domain allow-lists matched on TLS SNI and HTTP Host.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::error::{ModelError, Result};
use crate::eval::Flow;

/// Where a domain is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainSurface {
    TlsSni,
    HttpHost,
}

impl DomainSurface {
    fn value<'a>(&self, flow: &'a Flow) -> Option<&'a str> {
        match self {
            DomainSurface::TlsSni => flow.tls_sni.as_deref(),
            DomainSurface::HttpHost => flow.http_host.as_deref(),
        }
    }
}

/// An ordered set of domain targets allowed on the given surfaces.
///
/// A target starting with `.` matches any subdomain of it; any other target
/// matches that exact name. Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAllowlistRule {
    pub targets: Vec<String>,
    pub surfaces: BTreeSet<DomainSurface>,
}

impl DomainAllowlistRule {
    pub fn new(
        targets: impl IntoIterator<Item = impl Into<String>>,
        surfaces: impl IntoIterator<Item = DomainSurface>,
    ) -> Self {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            surfaces: surfaces.into_iter().collect(),
        }
    }

    /// Whether the flow names an allowed domain on one of the surfaces.
    pub fn matches(&self, flow: &Flow) -> bool {
        self.surfaces
            .iter()
            .filter_map(|s| s.value(flow))
            .any(|name| self.targets.iter().any(|t| target_matches(t, name)))
    }

    /// Suricata-style text of the implicit pass rules, numbered from `first_sid`.
    pub fn generated_rules(&self, first_sid: u64) -> Vec<String> {
        let mut sid = first_sid;
        let mut out = Vec::with_capacity(self.targets.len() * self.surfaces.len());
        for target in &self.targets {
            for surface in &self.surfaces {
                let (proto, buffer) = match surface {
                    DomainSurface::TlsSni => ("tls", "tls.sni"),
                    DomainSurface::HttpHost => ("http", "http.host"),
                };
                // dotprefix lets ".a.com" match "a.com" as well as its subdomains.
                let (prefix, exact) = if target.starts_with('.') {
                    ("dotprefix; ", "")
                } else {
                    ("", "startswith; ")
                };
                out.push(format!(
                    "pass {} any any -> any any ({}; {}content:\"{}\"; {}endswith; nocase; flow:to_server; sid:{};)",
                    proto, buffer, prefix, target, exact, sid
                ));
                sid += 1;
            }
        }
        out
    }

    pub(crate) fn validate(&self, group: &str) -> Result<()> {
        let invalid = |reason: String| ModelError::InvalidRule {
            group: group.to_string(),
            reason,
        };

        if self.targets.is_empty() {
            return Err(invalid("domain allow-list has no targets".to_string()));
        }
        if self.surfaces.is_empty() {
            return Err(invalid("domain allow-list has no match surfaces".to_string()));
        }
        let mut seen = HashSet::new();
        for target in &self.targets {
            if !is_valid_target(target) {
                return Err(invalid(format!("invalid domain target '{}'", target)));
            }
            if !seen.insert(target.to_ascii_lowercase()) {
                return Err(invalid(format!("domain target '{}' listed twice", target)));
            }
        }
        Ok(())
    }
}

fn target_matches(target: &str, name: &str) -> bool {
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    let target = target.to_ascii_lowercase();
    if let Some(apex) = target.strip_prefix('.') {
        name == apex || name.ends_with(&target)
    } else {
        name == target
    }
}

fn is_valid_target(target: &str) -> bool {
    let body = target.strip_prefix('.').unwrap_or(target);
    !body.is_empty()
        && body.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}
