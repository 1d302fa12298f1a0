//! Integration tests for wave execution: failure isolation, retries,
//! concurrency and cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use stackplan::prelude::*;

async fn run_with(
    descriptors: Vec<ResourceDescriptor>,
    exports: Exports,
    backend: Arc<MockBackend>,
    config: ExecutorConfig,
) -> RunResult {
    Engine::new(config)
        .run(descriptors, exports, backend, &CancellationToken::new())
        .await
        .unwrap()
}

fn independent(count: usize) -> Vec<ResourceDescriptor> {
    (0..count)
        .map(|i| ResourceDescriptor::new(format!("eip{:02}", i), ResourceKind::Eip))
        .collect()
}

// ============================================================================
// Success Path
// ============================================================================

#[tokio::test]
async fn test_topology_resolves_everything() {
    let backend = MockBackend::shared();
    let (descriptors, exports) = topology();

    let result = run_with(descriptors, exports, backend.clone(), fast_executor_config(2)).await;

    assert_eq!(result.status, RunStatus::Success);
    assert!(result.errors.is_empty());
    assert_eq!(backend.calls().len(), TOPOLOGY_IDS.len());
    for id in TOPOLOGY_IDS {
        assert_eq!(result.status_of(id), Some(NodeStatus::Resolved), "{id}");
        assert_eq!(backend.call_count(id), 1, "{id}");
    }
}

#[tokio::test]
async fn test_dependencies_applied_before_dependents() {
    let backend = MockBackend::shared();
    let (descriptors, exports) = topology();
    let (graph, _) = Engine::plan(descriptors.clone(), &exports).unwrap();

    run_with(descriptors, exports, backend.clone(), fast_executor_config(0)).await;

    let order = backend.call_names();
    let position = |id: &str| order.iter().position(|n| n == id).unwrap();
    for edge in graph.edges() {
        assert!(
            position(&edge.from) < position(&edge.to),
            "{} applied after {}",
            edge.from,
            edge.to
        );
    }
}

#[tokio::test]
async fn test_handles_substituted_before_apply() {
    let backend = MockBackend::shared();
    let (descriptors, exports) = topology();

    run_with(descriptors, exports, backend.clone(), fast_executor_config(0)).await;

    let subnet = backend.properties_of("pubSub1a").unwrap();
    assert_eq!(subnet["vpc_id"], mock_value("example_vpc", "id"));
    assert_eq!(subnet["cidr_block"], json!("10.100.0.0/24"));

    let alb = backend.properties_of("ALB").unwrap();
    assert_eq!(
        alb["subnets"],
        json!([mock_value("pubSub1a", "id"), mock_value("pubSub1c", "id")])
    );

    let sg = backend.properties_of("sgForInstance").unwrap();
    assert_eq!(
        sg["ingress"][0]["security_groups"],
        json!([mock_value("sgForALB", "id")])
    );

    let listener = backend.properties_of("listener").unwrap();
    assert_eq!(listener["load_balancer_arn"], mock_value("ALB", "arn"));
    assert_eq!(
        listener["default_actions"][0]["target_group_arn"],
        mock_value("httpTG", "arn")
    );
}

// ============================================================================
// Failure Isolation
// ============================================================================

#[tokio::test]
async fn test_permanent_failure_skips_downstream_only() {
    let backend = MockBackend::shared();
    backend.fail_permanently("eip", "AddressLimitExceeded");
    let (descriptors, exports) = topology();

    let result = run_with(descriptors, exports, backend.clone(), fast_executor_config(3)).await;

    assert_eq!(result.status, RunStatus::PartialFailure);
    assert_eq!(result.status_of("eip"), Some(NodeStatus::Failed));
    assert_eq!(result.nodes["eip"].attempts, 1);

    for id in ["natgw", "priRoute"] {
        let report = &result.nodes[id];
        assert_eq!(report.status, NodeStatus::Skipped, "{id}");
        assert_eq!(report.skipped_because.as_deref(), Some("eip"));
        assert_eq!(report.attempts, 0);
        assert_eq!(backend.call_count(id), 0);
    }

    let resolved: Vec<&str> = TOPOLOGY_IDS
        .iter()
        .copied()
        .filter(|id| !["eip", "natgw", "priRoute"].contains(id))
        .collect();
    for id in &resolved {
        assert_eq!(result.status_of(id), Some(NodeStatus::Resolved), "{id}");
    }

    let failed: Vec<&str> = result.errors.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(failed, vec!["eip"]);
    assert!(result.errors[0].error.to_string().contains("AddressLimitExceeded"));

    // Exports outside the failed subtree still resolve
    assert_eq!(result.export("alb_arn").unwrap(), mock_value("ALB", "arn"));
}

#[tokio::test]
async fn test_settled_declarations_cannot_run_again() {
    let failing = MockBackend::shared();
    failing.fail_permanently("eip", "AddressLimitExceeded");
    let (descriptors, exports) = topology();

    let first = run_with(
        descriptors.clone(),
        exports.clone(),
        failing,
        fast_executor_config(0),
    )
    .await;
    assert_eq!(first.status, RunStatus::PartialFailure);

    // Handles settled by the first run would leak its values and failures
    let healthy = MockBackend::shared();
    let err = Engine::new(fast_executor_config(0))
        .run(descriptors, exports, healthy.clone(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HandleSettled(_)), "{err}");
    assert!(err.is_construction());
    assert!(healthy.calls().is_empty());

    // Fresh declarations run cleanly against the same backend
    let (descriptors, exports) = topology();
    let second = run_with(descriptors, exports, healthy.clone(), fast_executor_config(0)).await;
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(healthy.call_count("natgw"), 1);
    assert_eq!(
        healthy.properties_of("natgw").unwrap()["allocation_id"],
        mock_value("eip", "id")
    );
}

#[tokio::test]
async fn test_skip_recorded_once_for_shared_descendant() {
    // Two failures in the same wave share one downstream resource
    let backend = MockBackend::shared();
    backend.fail_permanently("left", "denied");
    backend.fail_permanently("right", "denied");

    let descriptors = vec![
        ResourceDescriptor::new("left", ResourceKind::SecurityGroup),
        ResourceDescriptor::new("right", ResourceKind::SecurityGroup),
        ResourceDescriptor::new("instance", ResourceKind::Instance)
            .with_property("vpc_security_group_ids", vec![id_of("left"), id_of("right")]),
        ResourceDescriptor::new("attach", ResourceKind::TargetGroupAttachment)
            .with_property("target_id", id_of("instance")),
    ];

    let result = run_with(descriptors, Exports::new(), backend.clone(), fast_executor_config(0)).await;

    assert_eq!(result.status, RunStatus::PartialFailure);
    assert_eq!(result.errors.len(), 2);
    for id in ["instance", "attach"] {
        let report = &result.nodes[id];
        assert_eq!(report.status, NodeStatus::Skipped);
        let upstream = report.skipped_because.as_deref().unwrap();
        assert!(upstream == "left" || upstream == "right", "{upstream}");
        assert!(matches!(report.error, Some(Error::Skipped { .. })));
    }
    assert_eq!(backend.call_count("instance"), 0);
    assert_eq!(backend.call_count("attach"), 0);
}

#[tokio::test]
async fn test_missing_output_field_fails_consumer() {
    let backend = MockBackend::shared();
    backend.script(
        "ALB",
        Script {
            omit: vec!["arn".to_string()],
            ..Default::default()
        },
    );

    let descriptors = vec![
        ResourceDescriptor::new("ALB", ResourceKind::LoadBalancer),
        ResourceDescriptor::new("listener", ResourceKind::Listener)
            .with_property("load_balancer_arn", arn_of("ALB")),
    ];

    let result = run_with(descriptors, Exports::new(), backend.clone(), fast_executor_config(0)).await;

    assert_eq!(result.status, RunStatus::PartialFailure);
    assert_eq!(result.status_of("ALB"), Some(NodeStatus::Resolved));
    assert_eq!(result.status_of("listener"), Some(NodeStatus::Failed));
    assert!(matches!(
        result.nodes["listener"].error,
        Some(Error::UnresolvedInput { ref owner, ref field, .. }) if owner == "ALB" && field == "arn"
    ));
    assert_eq!(backend.call_count("listener"), 0);
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let backend = MockBackend::shared();
    backend.fail_transiently("natgw", 2);

    let descriptors = vec![
        ResourceDescriptor::new("eip", ResourceKind::Eip),
        ResourceDescriptor::new("natgw", ResourceKind::NatGateway)
            .with_property("allocation_id", id_of("eip")),
    ];

    let result = run_with(descriptors, Exports::new(), backend.clone(), fast_executor_config(3)).await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.nodes["natgw"].attempts, 3);
    assert_eq!(backend.call_count("natgw"), 3);
    assert_eq!(result.nodes["eip"].attempts, 1);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let backend = MockBackend::shared();
    backend.fail_transiently("vpc", 100);

    let result = run_with(
        vec![ResourceDescriptor::new("vpc", ResourceKind::Vpc)],
        Exports::new(),
        backend.clone(),
        fast_executor_config(2),
    )
    .await;

    assert_eq!(result.status, RunStatus::PartialFailure);
    assert_eq!(result.nodes["vpc"].status, NodeStatus::Failed);
    assert_eq!(result.nodes["vpc"].attempts, 3);
    assert_eq!(backend.call_count("vpc"), 3);
    assert!(result.errors[0].error.is_transient());
}

#[tokio::test]
async fn test_permanent_errors_are_not_retried() {
    let backend = MockBackend::shared();
    backend.fail_permanently("vpc", "VpcLimitExceeded");

    let result = run_with(
        vec![ResourceDescriptor::new("vpc", ResourceKind::Vpc)],
        Exports::new(),
        backend.clone(),
        fast_executor_config(5),
    )
    .await;

    assert_eq!(backend.call_count("vpc"), 1);
    assert!(!result.errors[0].error.is_transient());
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_wave_runs_concurrently() {
    let backend = MockBackend::shared();
    let descriptors = independent(5);
    for d in &descriptors {
        backend.delay(&d.id, Duration::from_millis(20));
    }

    let config = ExecutorConfig {
        max_concurrency: 0,
        ..fast_executor_config(0)
    };
    let result = run_with(descriptors, Exports::new(), backend.clone(), config).await;

    assert!(result.is_success());
    assert_eq!(backend.max_in_flight(), 5);
}

#[tokio::test]
async fn test_concurrency_limit_respected() {
    let backend = MockBackend::shared();
    let descriptors = independent(12);
    for d in &descriptors {
        backend.delay(&d.id, Duration::from_millis(5));
    }

    let config = ExecutorConfig {
        max_concurrency: 3,
        ..fast_executor_config(0)
    };
    let result = run_with(descriptors, Exports::new(), backend.clone(), config).await;

    assert!(result.is_success());
    assert_eq!(backend.calls().len(), 12);
    assert!(backend.max_in_flight() <= 3, "{}", backend.max_in_flight());
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_lets_in_flight_finish() {
    let backend = MockBackend::shared();
    backend.delay("example_vpc", Duration::from_millis(100));
    backend.delay("eip", Duration::from_millis(100));
    let (descriptors, exports) = topology();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let result = Engine::new(fast_executor_config(0))
        .run(descriptors, exports, backend.clone(), &cancel)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.status_of("example_vpc"), Some(NodeStatus::Resolved));
    assert_eq!(result.status_of("eip"), Some(NodeStatus::Resolved));
    assert_eq!(result.status_of("pubSub1a"), Some(NodeStatus::Cancelled));
    assert_eq!(result.status_of("TGattach"), Some(NodeStatus::Cancelled));
    assert_eq!(backend.calls().len(), 2);
    assert!(result.errors.is_empty());

    assert_eq!(result.export("vpc_id").unwrap(), mock_value("example_vpc", "id"));
    assert!(matches!(
        result.export("alb_arn"),
        Err(Error::UnresolvedExport { ref reason, .. }) if reason.contains("run cancelled")
    ));
}

#[tokio::test]
async fn test_cancel_before_start_applies_nothing() {
    let backend = MockBackend::shared();
    let (descriptors, exports) = topology();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = Engine::default()
        .run(descriptors, exports, backend.clone(), &cancel)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(backend.calls().is_empty());
    assert!(result
        .nodes
        .values()
        .all(|r| r.status == NodeStatus::Cancelled));
}
