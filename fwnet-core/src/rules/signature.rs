//! Raw Suricata-style signatures.
//!
//! The text is handed to the appliance untouched. Only the header and the
//! `sid` option are read here, enough to validate the rule set and to model
//! which flows a signature would fire on.

use serde::{Deserialize, Serialize};

use super::matching::{AddressMatch, Direction, PortMatch, StatefulHeader, StatefulProtocol};
use super::stateful::StatefulAction;
use crate::error::{ModelError, Result};
use crate::eval::Flow;

/// Free-form signature text, one rule per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSignatureRules {
    pub rules: String,
}

impl RawSignatureRules {
    pub fn new(rules: impl Into<String>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    /// Parse every non-empty, non-comment line. Text without any rule
    /// line is malformed and reported at line 0.
    pub fn parse(&self, group: &str) -> Result<Vec<Signature>> {
        let signatures: Vec<Signature> = self
            .rules
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .map(|(number, line)| {
                Signature::parse(line).map_err(|reason| ModelError::MalformedSignature {
                    group: group.to_string(),
                    line: number,
                    reason,
                })
            })
            .collect::<Result<_>>()?;
        if signatures.is_empty() {
            return Err(ModelError::MalformedSignature {
                group: group.to_string(),
                line: 0,
                reason: "no rules".to_string(),
            });
        }
        Ok(signatures)
    }
}

/// One parsed signature line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub sid: u64,
    pub action: StatefulAction,
    pub header: StatefulHeader,
    /// The rule line, verbatim.
    pub text: String,
}

impl Signature {
    /// Parse `action proto src sport dir dst dport (options)`.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let open = line.find('(').ok_or("missing rule options")?;
        let (header, options) = line.split_at(open);
        let options = options
            .trim()
            .strip_prefix('(')
            .and_then(|o| o.strip_suffix(')'))
            .ok_or("unterminated rule options")?;

        let tokens: Vec<&str> = header.split_whitespace().collect();
        let [action, proto, src, sport, dir, dst, dport] = tokens.as_slice() else {
            return Err(format!("expected 7 header fields, found {}", tokens.len()));
        };

        let action = match action.to_ascii_lowercase().as_str() {
            "alert" => StatefulAction::Alert,
            "pass" => StatefulAction::Pass,
            "drop" | "reject" => StatefulAction::Drop,
            other => return Err(format!("unknown action '{}'", other)),
        };
        let direction = match *dir {
            "->" => Direction::Forward,
            "<>" => Direction::Any,
            other => return Err(format!("unknown direction '{}'", other)),
        };

        let header = StatefulHeader {
            protocol: proto.parse::<StatefulProtocol>()?,
            source: src.parse::<AddressMatch>()?,
            source_port: sport.parse::<PortMatch>()?,
            direction,
            destination: dst.parse::<AddressMatch>()?,
            destination_port: dport.parse::<PortMatch>()?,
        };

        let sid = split_options(options)?
            .into_iter()
            .filter_map(|opt| opt.split_once(':'))
            .find(|(key, _)| key.trim() == "sid")
            .map(|(_, value)| value.trim())
            .ok_or("missing required sid option")?;
        let sid = sid
            .parse::<u64>()
            .map_err(|_| format!("invalid sid '{}'", sid))?;

        Ok(Self {
            sid,
            action,
            header,
            text: line.to_string(),
        })
    }

    pub fn matches(&self, flow: &Flow) -> bool {
        self.header.matches(flow)
    }
}

/// Split rule options on `;`, skipping separators inside quoted values.
fn split_options(options: &str) -> std::result::Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in options.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(&options[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quoted {
        return Err("unterminated quoted option value".to_string());
    }
    parts.push(&options[start..]);
    Ok(parts)
}
