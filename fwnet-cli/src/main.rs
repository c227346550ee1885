use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use fwnet_core::deploy::deploy;
use fwnet_core::eval::{PROTO_ICMP, PROTO_TCP, PROTO_UDP};
use fwnet_core::{Blueprint, DeployOptions, Deployment, DeploymentSpec, Flow, InMemoryEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod output;

#[derive(Parser)]
#[command(name = "fwnet")]
#[command(about = "Plan and model segmented networks with inline inspection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a deployment spec and print its resources in apply order
    Plan {
        /// Path to the deployment spec (JSON)
        spec: PathBuf,

        /// Also print the rule text of every rule group
        #[arg(long)]
        rules: bool,
    },

    /// Deploy against the in-memory provisioning engine
    Apply {
        /// Path to the deployment spec (JSON)
        spec: PathBuf,

        /// Apply a second time and fail unless nothing changes
        #[arg(long)]
        verify_idempotent: bool,

        /// Seconds to wait for the appliance to become active
        #[arg(long, default_value = "1800")]
        activation_timeout: u64,
    },

    /// Print the routes bound to the inspection endpoints
    Routes {
        /// Path to the deployment spec (JSON)
        spec: PathBuf,

        /// Print every route table including local and gateway routes
        #[arg(long)]
        all: bool,
    },

    /// Model a flow against the firewall policy
    Evaluate {
        /// Path to the deployment spec (JSON)
        spec: PathBuf,

        /// Protocol: tcp, udp, icmp or an IANA protocol number
        #[arg(long, default_value = "tcp", value_parser = parse_protocol)]
        protocol: u8,

        /// Source address
        #[arg(long)]
        source: Ipv4Addr,

        /// Destination address
        #[arg(long)]
        destination: Ipv4Addr,

        /// Source port
        #[arg(long)]
        sport: Option<u16>,

        /// Destination port
        #[arg(long)]
        dport: Option<u16>,

        /// TLS server name indication
        #[arg(long)]
        sni: Option<String>,

        /// HTTP Host header
        #[arg(long)]
        host: Option<String>,

        /// Model an IP fragment
        #[arg(long)]
        fragment: bool,

        /// Model the first packet of a new connection
        #[arg(long)]
        new: bool,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_protocol(s: &str) -> Result<u8, String> {
    match s.to_ascii_lowercase().as_str() {
        "tcp" => Ok(PROTO_TCP),
        "udp" => Ok(PROTO_UDP),
        "icmp" => Ok(PROTO_ICMP),
        other => other
            .parse()
            .map_err(|_| format!("unknown protocol '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fwnet=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { spec, rules } => {
            let blueprint = load(&spec)?;
            let graph = blueprint.base_graph()?;
            output::print_groups(&blueprint);
            output::print_graph(&graph)?;
            println!(
                "{} resources, {} dependencies; routes are bound once {} is active",
                graph.len(),
                graph.edges_count(),
                blueprint.appliance_node_name()
            );
            if rules {
                output::print_rule_text(&blueprint);
            }
        }

        Commands::Apply {
            spec,
            verify_idempotent,
            activation_timeout,
        } => {
            let blueprint = load(&spec)?;
            let engine = InMemoryEngine::new();
            let options = DeployOptions {
                activation_timeout: Duration::from_secs(activation_timeout),
            };

            let deployment = deploy(&engine, &blueprint, &options).await?;
            output::print_reports(&deployment.base_report, &deployment.full_report);
            output::print_routes(&deployment.routes);

            if verify_idempotent {
                let again = deploy(&engine, &blueprint, &options).await?;
                if !again.base_report.is_noop() || !again.full_report.is_noop() {
                    output::print_reports(&again.base_report, &again.full_report);
                    bail!("second apply changed resources");
                }
                info!(resources = engine.resource_count().await, "Second apply was a no-op");
                println!("Second apply: no changes");
            }
        }

        Commands::Routes { spec, all } => {
            let blueprint = load(&spec)?;
            let deployment = deploy_in_memory(&blueprint).await?;
            if all {
                output::print_routing_view(&deployment.routing_view(&blueprint.topology));
            } else {
                output::print_routes(&deployment.routes);
            }
        }

        Commands::Evaluate {
            spec,
            protocol,
            source,
            destination,
            sport,
            dport,
            sni,
            host,
            fragment,
            new,
            json,
        } => {
            let blueprint = load(&spec)?;
            let flow = Flow {
                source_port: sport,
                destination_port: dport,
                tls_sni: sni,
                http_host: host,
                fragment,
                established: !new,
                ..Flow::new(protocol, source, destination)
            };
            let verdict = blueprint.policy.evaluate(&flow);
            if json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                output::print_verdict(&verdict);
            }
        }
    }

    Ok(())
}

fn load(path: &Path) -> anyhow::Result<Blueprint> {
    let spec = DeploymentSpec::from_file(path)?;
    let blueprint = Blueprint::from_spec(&spec)
        .with_context(|| format!("invalid deployment spec {}", path.display()))?;
    Ok(blueprint)
}

async fn deploy_in_memory(blueprint: &Blueprint) -> anyhow::Result<Deployment> {
    let engine = InMemoryEngine::new();
    Ok(deploy(&engine, blueprint, &DeployOptions::default()).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_protocol() {
        assert_eq!(parse_protocol("tcp"), Ok(PROTO_TCP));
        assert_eq!(parse_protocol("UDP"), Ok(PROTO_UDP));
        assert_eq!(parse_protocol("icmp"), Ok(PROTO_ICMP));
        assert_eq!(parse_protocol("47"), Ok(47));
        assert!(parse_protocol("sctp").is_err());
        assert!(parse_protocol("300").is_err());
    }

    #[test]
    fn test_cli_parses_evaluate() {
        let cli = Cli::try_parse_from([
            "fwnet",
            "evaluate",
            "lab.json",
            "--protocol",
            "udp",
            "--source",
            "10.1.0.36",
            "--destination",
            "8.8.8.8",
            "--dport",
            "53",
            "--new",
        ])
        .unwrap();
        let Commands::Evaluate {
            protocol,
            dport,
            new,
            fragment,
            ..
        } = cli.command
        else {
            panic!("expected evaluate");
        };
        assert_eq!(protocol, PROTO_UDP);
        assert_eq!(dport, Some(53));
        assert!(new);
        assert!(!fragment);
    }

    #[test]
    fn test_cli_apply_defaults() {
        let cli = Cli::try_parse_from(["fwnet", "apply", "lab.json"]).unwrap();
        let Commands::Apply {
            verify_idempotent,
            activation_timeout,
            ..
        } = cli.command
        else {
            panic!("expected apply");
        };
        assert!(!verify_idempotent);
        assert_eq!(activation_timeout, 1800);
    }
}
