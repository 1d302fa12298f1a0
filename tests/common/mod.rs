//! Shared test utilities and fixtures for the Stackplan test suite.
//!
//! This module provides:
//! - A scriptable [`MockBackend`] implementing `ProvisioningBackend`
//! - The VPC / ALB reference topology as a descriptor fixture
//! - Small graph-building helpers
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value as JsonValue};

use stackplan::backend::{BackendError, Outputs, ProvisioningBackend, ResolvedProperties};
use stackplan::graph::DependencyGraph;
use stackplan::resource::{OutputHandle, PropertyValue, ResourceDescriptor, ResourceKind};
use stackplan::retry::RetryPolicy;
use stackplan::store::Exports;
use stackplan::executor::ExecutorConfig;

// ============================================================================
// Mock Backend
// ============================================================================

/// Scripted behaviour for one resource.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Fail with a transient error this many times before succeeding
    pub transient_failures: u32,
    /// Fail permanently with this message
    pub permanent: Option<String>,
    /// Sleep before answering
    pub delay: Option<Duration>,
    /// Output fields to leave out of the response
    pub omit: Vec<String>,
}

/// One recorded `apply` call.
#[derive(Debug, Clone)]
pub struct Call {
    pub name: String,
    pub kind: ResourceKind,
    pub properties: ResolvedProperties,
}

/// In-memory provisioning backend with per-resource scripts.
///
/// Unscripted resources succeed and return `"<name>-<field>"` for every
/// default output field of their kind.
#[derive(Default)]
pub struct MockBackend {
    scripts: RwLock<HashMap<String, Script>>,
    calls: RwLock<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Set the script for a resource.
    pub fn script(&self, name: impl Into<String>, script: Script) {
        self.scripts.write().insert(name.into(), script);
    }

    /// Fail `name` permanently.
    pub fn fail_permanently(&self, name: &str, message: &str) {
        self.script(
            name,
            Script {
                permanent: Some(message.to_string()),
                ..Default::default()
            },
        );
    }

    /// Fail `name` transiently `times` times, then succeed.
    pub fn fail_transiently(&self, name: &str, times: u32) {
        self.script(
            name,
            Script {
                transient_failures: times,
                ..Default::default()
            },
        );
    }

    /// Delay every answer for `name`.
    pub fn delay(&self, name: &str, delay: Duration) {
        self.script(
            name,
            Script {
                delay: Some(delay),
                ..Default::default()
            },
        );
    }

    /// Every call, in the order it was received.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.read().clone()
    }

    /// Names in call order.
    pub fn call_names(&self) -> Vec<String> {
        self.calls.read().iter().map(|c| c.name.clone()).collect()
    }

    /// Number of calls for `name`.
    pub fn call_count(&self, name: &str) -> usize {
        self.calls.read().iter().filter(|c| c.name == name).count()
    }

    /// Properties of the first call for `name`.
    pub fn properties_of(&self, name: &str) -> Option<ResolvedProperties> {
        self.calls
            .read()
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.properties.clone())
    }

    /// Highest number of concurrent `apply` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProvisioningBackend for MockBackend {
    async fn apply(
        &self,
        name: &str,
        kind: ResourceKind,
        properties: &ResolvedProperties,
    ) -> Result<Outputs, BackendError> {
        let attempt = {
            let mut calls = self.calls.write();
            calls.push(Call {
                name: name.to_string(),
                kind,
                properties: properties.clone(),
            });
            calls.iter().filter(|c| c.name == name).count() as u32
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let script = self.scripts.read().get(name).cloned().unwrap_or_default();
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = script.permanent {
            return Err(BackendError::permanent(message));
        }
        if attempt <= script.transient_failures {
            return Err(BackendError::transient(format!(
                "RequestLimitExceeded (attempt {})",
                attempt
            )));
        }

        let mut outputs = Outputs::new();
        for field in kind.default_outputs() {
            if !script.omit.iter().any(|f| f == field) {
                outputs.insert(field.to_string(), json!(format!("{}-{}", name, field)));
            }
        }
        Ok(outputs)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Handle for `owner.id`.
pub fn id_of(owner: &str) -> OutputHandle {
    OutputHandle::new(owner, "id")
}

/// Handle for `owner.arn`.
pub fn arn_of(owner: &str) -> OutputHandle {
    OutputHandle::new(owner, "arn")
}

/// The value a `MockBackend` produces for `owner.field`.
pub fn mock_value(owner: &str, field: &str) -> JsonValue {
    json!(format!("{}-{}", owner, field))
}

/// Build and freeze a graph from descriptors.
pub fn build_graph(descriptors: Vec<ResourceDescriptor>) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for descriptor in descriptors {
        graph.add_resource(descriptor).unwrap();
    }
    graph.build().unwrap();
    graph
}

/// Executor config with millisecond backoff and no jitter.
pub fn fast_executor_config(max_retries: u32) -> ExecutorConfig {
    ExecutorConfig {
        max_concurrency: 8,
        retry: RetryPolicy::constant(max_retries, Duration::from_millis(1)),
    }
}

fn tags(name: &str) -> PropertyValue {
    PropertyValue::map([("Name", name)])
}

fn egress_all() -> PropertyValue {
    PropertyValue::list([PropertyValue::map([
        ("from_port", PropertyValue::from(0i64)),
        ("to_port", PropertyValue::from(0i64)),
        ("protocol", PropertyValue::from("-1")),
        ("cidr_blocks", PropertyValue::list(["0.0.0.0/0"])),
    ])])
}

// ============================================================================
// Reference Topology
// ============================================================================

/// Ids of the reference topology, in declaration order.
pub const TOPOLOGY_IDS: [&str; 21] = [
    "example_vpc",
    "pubSub1a",
    "pubSub1c",
    "priSub1a",
    "eip",
    "igw",
    "natgw",
    "pubRouteTable",
    "pubRoute",
    "pubRoute1a",
    "pubRoute1c",
    "priRouteTable",
    "priRoute",
    "priRoute1a",
    "sgForALB",
    "ALB",
    "httpTG",
    "listener",
    "sgForInstance",
    "instance",
    "TGattach",
];

/// VPC with public and private subnets, NAT, an ALB in front of one
/// instance, and the target group wiring between them.
pub fn topology() -> (Vec<ResourceDescriptor>, Exports) {
    let vpc = "example_vpc";
    let subnet = |id: &str, cidr: &str, az: &str, name: &str| {
        ResourceDescriptor::new(id, ResourceKind::Subnet)
            .with_property("vpc_id", id_of(vpc))
            .with_property("cidr_block", cidr)
            .with_property("availability_zone", az)
            .with_property("tags", tags(name))
    };
    let association = |id: &str, subnet: &str, table: &str| {
        ResourceDescriptor::new(id, ResourceKind::RouteTableAssociation)
            .with_property("subnet_id", id_of(subnet))
            .with_property("route_table_id", id_of(table))
    };

    let descriptors = vec![
        ResourceDescriptor::new(vpc, ResourceKind::Vpc)
            .with_property("cidr_block", "10.100.0.0/16")
            .with_property("tags", tags("example_vpc")),
        subnet("pubSub1a", "10.100.0.0/24", "ap-northeast-1a", "example_public_1a"),
        subnet("pubSub1c", "10.100.1.0/24", "ap-northeast-1c", "example_public_1c"),
        subnet("priSub1a", "10.100.100.0/24", "ap-northeast-1a", "example_private_1a"),
        ResourceDescriptor::new("eip", ResourceKind::Eip).with_property("vpc", true),
        ResourceDescriptor::new("igw", ResourceKind::InternetGateway)
            .with_property("vpc_id", id_of(vpc))
            .with_property("tags", tags("example_igw")),
        ResourceDescriptor::new("natgw", ResourceKind::NatGateway)
            .with_property("allocation_id", id_of("eip"))
            .with_property("subnet_id", id_of("pubSub1a"))
            .depends_on("eip"),
        ResourceDescriptor::new("pubRouteTable", ResourceKind::RouteTable)
            .with_property("vpc_id", id_of(vpc))
            .with_property("tags", tags("example_route_table_public")),
        ResourceDescriptor::new("pubRoute", ResourceKind::Route)
            .with_property("route_table_id", id_of("pubRouteTable"))
            .with_property("destination_cidr_block", "0.0.0.0/0")
            .with_property("gateway_id", id_of("igw")),
        association("pubRoute1a", "pubSub1a", "pubRouteTable"),
        association("pubRoute1c", "pubSub1c", "pubRouteTable"),
        ResourceDescriptor::new("priRouteTable", ResourceKind::RouteTable)
            .with_property("vpc_id", id_of(vpc))
            .with_property("tags", tags("example_route_table_private")),
        ResourceDescriptor::new("priRoute", ResourceKind::Route)
            .with_property("route_table_id", id_of("priRouteTable"))
            .with_property("destination_cidr_block", "0.0.0.0/0")
            .with_property("nat_gateway_id", id_of("natgw")),
        association("priRoute1a", "priSub1a", "priRouteTable"),
        ResourceDescriptor::new("sgForALB", ResourceKind::SecurityGroup)
            .with_property("name", "example_sg_for_ALB")
            .with_property("vpc_id", id_of(vpc))
            .with_property(
                "ingress",
                PropertyValue::list([PropertyValue::map([
                    ("from_port", PropertyValue::from(80i64)),
                    ("to_port", PropertyValue::from(80i64)),
                    ("protocol", PropertyValue::from("tcp")),
                    ("cidr_blocks", PropertyValue::list(["0.0.0.0/0"])),
                ])]),
            )
            .with_property("egress", egress_all()),
        ResourceDescriptor::new("ALB", ResourceKind::LoadBalancer)
            .with_property("name", "example")
            .with_property("load_balancer_type", "application")
            .with_property("security_groups", vec![id_of("sgForALB")])
            .with_property("subnets", vec![id_of("pubSub1a"), id_of("pubSub1c")])
            .with_property("tags", tags("example")),
        ResourceDescriptor::new("httpTG", ResourceKind::TargetGroup)
            .with_property("name", "HTTPTG")
            .with_property("port", 80i64)
            .with_property("protocol", "HTTP")
            .with_property("vpc_id", id_of(vpc))
            .with_property(
                "health_check",
                PropertyValue::map([
                    ("path", "/"),
                    ("matcher", "403"),
                    ("port", "80"),
                    ("protocol", "HTTP"),
                ]),
            ),
        ResourceDescriptor::new("listener", ResourceKind::Listener)
            .with_property("load_balancer_arn", arn_of("ALB"))
            .with_property("port", 80i64)
            .with_property("protocol", "HTTP")
            .with_property(
                "default_actions",
                PropertyValue::list([PropertyValue::map([
                    ("type", PropertyValue::from("forward")),
                    ("target_group_arn", PropertyValue::from(arn_of("httpTG"))),
                ])]),
            )
            .depends_on("ALB"),
        ResourceDescriptor::new("sgForInstance", ResourceKind::SecurityGroup)
            .with_property("name", "example_sg_for_instance")
            .with_property("vpc_id", id_of(vpc))
            .with_property(
                "ingress",
                PropertyValue::list([PropertyValue::map([
                    ("from_port", PropertyValue::from(80i64)),
                    ("to_port", PropertyValue::from(80i64)),
                    ("protocol", PropertyValue::from("tcp")),
                    ("security_groups", PropertyValue::list([id_of("sgForALB")])),
                ])]),
            )
            .with_property("egress", egress_all()),
        ResourceDescriptor::new("instance", ResourceKind::Instance)
            .with_property("ami", "ami-0992fc94ca0f1415a")
            .with_property("instance_type", "t2.micro")
            .with_property("subnet_id", id_of("priSub1a"))
            .with_property("vpc_security_group_ids", vec![id_of("sgForInstance")])
            .with_property("user_data_base64", "IyEvYmluL2Jhc2gKeXVtIGluc3RhbGwgLXkgaHR0cGQK"),
        ResourceDescriptor::new("TGattach", ResourceKind::TargetGroupAttachment)
            .with_property("target_group_arn", arn_of("httpTG"))
            .with_property("target_id", id_of("instance"))
            .with_property("port", 80i64),
    ];

    let exports = Exports::new()
        .with("vpc_id", id_of(vpc))
        .and_then(|e| e.with("alb_arn", arn_of("ALB")))
        .and_then(|e| e.with("target_group_arn", arn_of("httpTG")))
        .and_then(|e| e.with("instance_id", id_of("instance")))
        .unwrap();

    (descriptors, exports)
}

/// Expected waves of the reference topology.
pub fn topology_waves() -> Vec<Vec<&'static str>> {
    vec![
        vec!["eip", "example_vpc"],
        vec![
            "httpTG",
            "igw",
            "priRouteTable",
            "priSub1a",
            "pubRouteTable",
            "pubSub1a",
            "pubSub1c",
            "sgForALB",
        ],
        vec![
            "ALB",
            "natgw",
            "priRoute1a",
            "pubRoute",
            "pubRoute1a",
            "pubRoute1c",
            "sgForInstance",
        ],
        vec!["instance", "listener", "priRoute"],
        vec!["TGattach"],
    ]
}
