//! End-to-end tests: spec → blueprint → in-memory engine.

mod common;

use std::time::Duration;

use common::{addr, first_host, lab_spec, multi_az_spec};
use fwnet_core::deploy::{apply_graph, deploy};
use fwnet_core::engine::{ApplianceStatus, Event};
use fwnet_core::eval::Decision;
use fwnet_core::routes::TierPair;
use fwnet_core::{
    Blueprint, DeployError, DeployOptions, EngineError, Flow, InMemoryEngine, ModelError,
    ProvisioningEngine, ResourceKind, Tier,
};

const APPLIANCE: &str = "appliance/ANFW-Lab";

fn lab() -> Blueprint {
    Blueprint::from_spec(&lab_spec()).expect("lab spec should validate")
}

#[test]
fn test_lab_flow_verdicts() {
    let blueprint = lab();
    let policy = &blueprint.policy;
    let protected = first_host(&blueprint.topology, Tier::Protected);
    let client = addr("198.51.100.7");

    let web = policy.evaluate(&Flow::tcp(client, 40000, protected, 80));
    assert!(web.is_pass());
    assert!(matches!(web.decided_by, Decision::StatelessRule { priority: 1, .. }));

    let dns = policy.evaluate(&Flow::udp(protected, 40000, addr("8.8.8.8"), 53));
    assert!(dns.is_drop());
    assert_eq!(dns.decided_by, Decision::StatefulDefault);

    let ping = policy.evaluate(&Flow::icmp(client, protected));
    assert!(ping.is_pass());
    assert!(ping.alerted());
    assert_eq!(ping.alerts[0].sid, Some(889));
}

#[test]
fn test_lab_domain_allowlist() {
    let blueprint = lab();
    let protected = first_host(&blueprint.topology, Tier::Protected);

    let s3 = Flow::tcp(protected, 40000, addr("52.216.1.1"), 8443).with_tls_sni("s3.amazonaws.com");
    let verdict = blueprint.policy.evaluate(&s3);
    assert!(verdict.is_pass());
    assert_eq!(
        verdict.decided_by,
        Decision::StatefulRule {
            group: "AllowAmazonDomains".to_string(),
            sid: None
        }
    );

    let other = Flow::tcp(protected, 40000, addr("203.0.113.9"), 8443).with_tls_sni("example.org");
    assert!(blueprint.policy.evaluate(&other).is_drop());
    // DROP_ESTABLISHED leaves the first packet of a new connection alone.
    assert!(blueprint.policy.evaluate(&other.as_new_connection()).is_pass());
}

#[tokio::test]
async fn test_deploy_lab_and_reapply() {
    let blueprint = lab();
    let engine = InMemoryEngine::new();

    let deployment = deploy(&engine, &blueprint, &DeployOptions::default())
        .await
        .unwrap();
    assert!(deployment.appliance.is_active());
    assert_eq!(deployment.routes.len(), 2);
    assert_eq!(deployment.base_report.unchanged, 0);
    assert_eq!(deployment.full_report.created, 2);

    let routes = engine.resource_names(ResourceKind::Route).await;
    assert_eq!(
        routes,
        vec![
            "route/rtb-edge-az-1/10.1.0.32/28".to_string(),
            "route/rtb-protected-az-1/0.0.0.0/0".to_string(),
        ]
    );
    assert!(engine.resource("logging/ANFW-Lab").await.is_some());

    let view = deployment.routing_view(&blueprint.topology);
    let edge = &blueprint.topology.subnets_in(Tier::Edge).next().unwrap().id;
    assert!(view.is_inspected(edge, first_host(&blueprint.topology, Tier::Protected)));

    // Same desired state again: nothing to create or update.
    let again = deploy(&engine, &blueprint, &DeployOptions::default())
        .await
        .unwrap();
    assert!(again.base_report.is_noop());
    assert!(again.full_report.is_noop());
    assert_eq!(again.full_report.created, 0);
    assert_eq!(again.routes, deployment.routes);
}

#[tokio::test]
async fn test_apply_graph_twice_creates_nothing() {
    let blueprint = lab();
    let engine = InMemoryEngine::new();
    let graph = blueprint.base_graph().unwrap();

    let first = apply_graph(&engine, &graph).await.unwrap();
    assert_eq!(first.created, graph.len());
    let second = apply_graph(&engine, &graph).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.unchanged, graph.len());
}

#[tokio::test]
async fn test_multi_az_routes_follow_zones() {
    let blueprint = Blueprint::from_spec(&multi_az_spec(3)).unwrap();
    let engine = InMemoryEngine::new();
    let deployment = deploy(&engine, &blueprint, &DeployOptions::default())
        .await
        .unwrap();

    let ApplianceStatus::Active(attributes) = engine.appliance_status(APPLIANCE).await.unwrap()
    else {
        panic!("appliance should be active");
    };
    assert_eq!(attributes.len(), 3);

    // 3 edge tables x 3 protected subnets, 3 protected defaults, 3 gateway routes
    assert_eq!(deployment.routes.len(), 15);
    for route in &deployment.routes {
        assert_eq!(
            deployment.appliance.endpoint_for(&route.az).unwrap(),
            &route.target
        );
    }

    let view = deployment.routing_view(&blueprint.topology);
    for subnet in blueprint.topology.subnets_in(Tier::Edge) {
        assert!(view.is_ingress_inspected(subnet.cidr.network()));
        for protected in blueprint.topology.subnets_in(Tier::Protected) {
            assert!(view.is_inspected(&subnet.id, protected.cidr.network()));
        }
    }
}

#[tokio::test]
async fn test_deferred_activation_is_awaited() {
    let blueprint = lab();
    let engine = InMemoryEngine::new().with_deferred_activation();
    let mut events = engine.subscribe();

    let activator = async {
        loop {
            if let Event::ResourceCreated {
                kind: ResourceKind::Appliance,
                ..
            } = events.recv().await.unwrap()
            {
                break;
            }
        }
        assert_eq!(
            engine.resource_names(ResourceKind::Route).await,
            Vec::<String>::new()
        );
        engine.complete_activation(APPLIANCE).await.unwrap()
    };

    let options = DeployOptions::default();
    let (deployment, endpoints) = tokio::join!(
        deploy(&engine, &blueprint, &options),
        activator
    );
    let deployment = deployment.unwrap();
    assert_eq!(endpoints.len(), 1);
    assert!(deployment.routes.iter().all(|r| endpoints[0].ends_with(r.target.as_str())));
}

#[tokio::test]
async fn test_activation_timeout() {
    let blueprint = lab();
    let engine = InMemoryEngine::new().with_deferred_activation();
    let options = DeployOptions {
        activation_timeout: Duration::from_millis(50),
    };

    let err = deploy(&engine, &blueprint, &options).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::Model(ModelError::ApplianceNotReady { .. })
    ));
    assert!(engine.resource_names(ResourceKind::Route).await.is_empty());
}

#[tokio::test]
async fn test_appliance_failure_surfaces() {
    let blueprint = lab();
    let engine = InMemoryEngine::new().with_deferred_activation();
    let mut events = engine.subscribe();

    let failer = async {
        while !matches!(
            events.recv().await.unwrap(),
            Event::ResourceCreated {
                kind: ResourceKind::Appliance,
                ..
            }
        ) {}
        engine.fail_activation(APPLIANCE, "subnet quota").await.unwrap();
    };

    let options = DeployOptions::default();
    let (result, ()) = tokio::join!(
        deploy(&engine, &blueprint, &options),
        failer
    );
    assert!(matches!(
        result,
        Err(DeployError::ApplianceFailed { ref reason, .. }) if reason == "subnet quota"
    ));
}

#[tokio::test]
async fn test_engine_error_surfaces_verbatim() {
    let blueprint = lab();
    let engine = InMemoryEngine::new().fail_on("policy/ANFW-Lab-Policy", "limit exceeded");

    let err = deploy(&engine, &blueprint, &DeployOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::Engine(EngineError::Rejected { ref reason, .. }) if reason == "limit exceeded"
    ));
    // Nothing that depends on the policy was applied.
    assert!(engine.resource(APPLIANCE).await.is_none());
    assert!(engine.resource("rule-group/suricata-ips").await.is_some());
}

#[test]
fn test_validation_errors_fail_before_apply() {
    let mut spec = lab_spec();
    spec.rule_groups[0].capacity = 1;
    assert!(matches!(
        Blueprint::from_spec(&spec),
        Err(DeployError::Model(ModelError::CapacityExceeded { units: 2, .. }))
    ));

    let mut spec = lab_spec();
    spec.redirection
        .tier_pairs
        .push(TierPair::new(Tier::Protected, Tier::Edge));
    assert!(matches!(
        Blueprint::from_spec(&spec),
        Err(DeployError::Model(ModelError::RouteConflict { .. }))
    ));

    let mut spec = lab_spec();
    spec.policy.stateful_groups[1].group = "AllowPort8080".to_string();
    assert!(matches!(
        Blueprint::from_spec(&spec),
        Err(DeployError::Model(ModelError::UnknownGroupReference { .. }))
    ));
}
