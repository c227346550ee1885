use fwnet_core::eval::{Alert, Decision};
use fwnet_core::routing::RoutingView;
use fwnet_core::{ApplyReport, Blueprint, ResourceGraph, RouteEntry, Verdict};
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "WAVE")]
    wave: usize,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "DEPENDS ON")]
    depends_on: String,
}

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "CLASS")]
    class: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "UNITS")]
    units: String,
}

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "PHASE")]
    phase: &'static str,
    #[tabled(rename = "WAVES")]
    waves: usize,
    #[tabled(rename = "CREATED")]
    created: usize,
    #[tabled(rename = "UPDATED")]
    updated: usize,
    #[tabled(rename = "UNCHANGED")]
    unchanged: usize,
}

#[derive(Tabled)]
struct RouteRow {
    #[tabled(rename = "TABLE")]
    table: String,
    #[tabled(rename = "DESTINATION")]
    destination: String,
    #[tabled(rename = "TARGET")]
    target: String,
    #[tabled(rename = "AZ")]
    az: String,
}

#[derive(Tabled)]
struct HopRow {
    #[tabled(rename = "TABLE")]
    table: String,
    #[tabled(rename = "PREFIX")]
    prefix: String,
    #[tabled(rename = "NEXT HOP")]
    next_hop: String,
}

pub fn print_graph(graph: &ResourceGraph) -> anyhow::Result<()> {
    let mut rows = Vec::with_capacity(graph.len());
    for (wave, nodes) in graph.waves()?.into_iter().enumerate() {
        for node in nodes {
            rows.push(NodeRow {
                wave,
                name: node.name.clone(),
                kind: node.kind.to_string(),
                depends_on: graph.dependencies(&node.name).collect::<Vec<_>>().join(", "),
            });
        }
    }
    println!("{}", Table::new(rows));
    Ok(())
}

pub fn print_groups(blueprint: &Blueprint) {
    let rows: Vec<GroupRow> = blueprint
        .rule_groups
        .iter()
        .map(|group| GroupRow {
            name: group.name().to_string(),
            class: group.class().to_string(),
            kind: group.kind().to_string(),
            units: format!("{}/{}", group.rule_units(), group.capacity()),
        })
        .collect();
    println!("{}", Table::new(rows));
}

pub fn print_rule_text(blueprint: &Blueprint) {
    for group in blueprint.rule_groups.iter() {
        println!("\n# {}", group.name());
        for line in group.rule_text() {
            println!("{}", line);
        }
    }
}

pub fn print_reports(base: &ApplyReport, full: &ApplyReport) {
    let row = |phase, report: &ApplyReport| ReportRow {
        phase,
        waves: report.waves,
        created: report.created,
        updated: report.updated,
        unchanged: report.unchanged,
    };
    println!("{}", Table::new(vec![row("base", base), row("routes", full)]));
}

pub fn print_routes(routes: &[RouteEntry]) {
    if routes.is_empty() {
        println!("No routes bound");
        return;
    }
    let rows: Vec<RouteRow> = routes
        .iter()
        .map(|r| RouteRow {
            table: r.route_table.to_string(),
            destination: r.destination.to_string(),
            target: r.target.to_string(),
            az: r.az.to_string(),
        })
        .collect();
    println!("{}", Table::new(rows));
}

pub fn print_routing_view(view: &RoutingView) {
    let rows: Vec<HopRow> = view
        .tables()
        .flat_map(|table| {
            table.routes().map(|(prefix, hop)| HopRow {
                table: table.id.to_string(),
                prefix: prefix.to_string(),
                next_hop: hop.to_string(),
            })
        })
        .collect();
    println!("{}", Table::new(rows));
}

pub fn print_verdict(verdict: &Verdict) {
    println!("Action:     {}", verdict.action);
    println!("Decided by: {}", describe_decision(&verdict.decided_by));
    if verdict.alerts.is_empty() {
        println!("Alerts:     none");
    } else {
        let alerts: Vec<String> = verdict.alerts.iter().map(describe_alert).collect();
        println!("Alerts:     {}", alerts.join(", "));
    }
}

fn describe_decision(decision: &Decision) -> String {
    match decision {
        Decision::StatelessRule { group, priority } => {
            format!("stateless rule {} in {}", priority, group)
        }
        Decision::StatelessDefault => "stateless default".to_string(),
        Decision::FragmentDefault => "stateless fragment default".to_string(),
        Decision::StatefulRule { group, sid: Some(sid) } => {
            format!("stateful rule sid {} in {}", sid, group)
        }
        Decision::StatefulRule { group, sid: None } => format!("stateful rule in {}", group),
        Decision::AlertedOnly => "alert rules only".to_string(),
        Decision::StatefulDefault => "stateful default".to_string(),
    }
}

fn describe_alert(alert: &Alert) -> String {
    match (&alert.group, alert.sid) {
        (Some(group), Some(sid)) => format!("{} sid {}", group, sid),
        (Some(group), None) => group.clone(),
        (None, _) => "stateful default".to_string(),
    }
}
