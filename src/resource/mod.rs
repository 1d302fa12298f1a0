//! Resource declarations.
//!
//! A [`ResourceDescriptor`] is the immutable declaration of one
//! infrastructure object: a logical id, a [`ResourceKind`], a property bag
//! and an explicit `depends_on` set. Property values are either literals or
//! [`OutputHandle`]s pointing at another resource's not-yet-known outputs;
//! the dependency graph derives its edges from those handles.
//!
//! # Example
//!
//! ```rust,ignore
//! use stackplan::resource::{PropertyValue, ResourceDescriptor, ResourceKind};
//!
//! let vpc = graph.add_resource(
//!     ResourceDescriptor::new("vpc", ResourceKind::Vpc)
//!         .with_property("cidr_block", "10.100.0.0/16"),
//! )?;
//!
//! graph.add_resource(
//!     ResourceDescriptor::new("pub_subnet_1a", ResourceKind::Subnet)
//!         .with_property("vpc_id", vpc.id_output())
//!         .with_property("cidr_block", "10.100.0.0/24"),
//! )?;
//! ```

pub mod output;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::backend::ResolvedProperties;
use crate::error::{Error, Result};

pub use output::{HandleState, OutputHandle};

// ============================================================================
// Resource Kinds
// ============================================================================

/// The closed set of resource types the engine knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    Subnet,
    Eip,
    InternetGateway,
    NatGateway,
    RouteTable,
    Route,
    RouteTableAssociation,
    SecurityGroup,
    LoadBalancer,
    TargetGroup,
    Listener,
    Instance,
    TargetGroupAttachment,
}

impl ResourceKind {
    /// Every supported kind.
    pub const ALL: [ResourceKind; 14] = [
        ResourceKind::Vpc,
        ResourceKind::Subnet,
        ResourceKind::Eip,
        ResourceKind::InternetGateway,
        ResourceKind::NatGateway,
        ResourceKind::RouteTable,
        ResourceKind::Route,
        ResourceKind::RouteTableAssociation,
        ResourceKind::SecurityGroup,
        ResourceKind::LoadBalancer,
        ResourceKind::TargetGroup,
        ResourceKind::Listener,
        ResourceKind::Instance,
        ResourceKind::TargetGroupAttachment,
    ];

    /// Provider type token, e.g. `aws:ec2/vpc:Vpc`.
    pub fn type_token(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "aws:ec2/vpc:Vpc",
            ResourceKind::Subnet => "aws:ec2/subnet:Subnet",
            ResourceKind::Eip => "aws:ec2/eip:Eip",
            ResourceKind::InternetGateway => "aws:ec2/internetGateway:InternetGateway",
            ResourceKind::NatGateway => "aws:ec2/natGateway:NatGateway",
            ResourceKind::RouteTable => "aws:ec2/routeTable:RouteTable",
            ResourceKind::Route => "aws:ec2/route:Route",
            ResourceKind::RouteTableAssociation => {
                "aws:ec2/routeTableAssociation:RouteTableAssociation"
            }
            ResourceKind::SecurityGroup => "aws:ec2/securityGroup:SecurityGroup",
            ResourceKind::LoadBalancer => "aws:lb/loadBalancer:LoadBalancer",
            ResourceKind::TargetGroup => "aws:lb/targetGroup:TargetGroup",
            ResourceKind::Listener => "aws:lb/listener:Listener",
            ResourceKind::Instance => "aws:ec2/instance:Instance",
            ResourceKind::TargetGroupAttachment => {
                "aws:lb/targetGroupAttachment:TargetGroupAttachment"
            }
        }
    }

    /// Output fields a backend is expected to return for this kind.
    pub fn default_outputs(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::LoadBalancer | ResourceKind::TargetGroup => &["id", "arn"],
            _ => &["id"],
        }
    }

    fn snake_name(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Eip => "eip",
            ResourceKind::InternetGateway => "internet_gateway",
            ResourceKind::NatGateway => "nat_gateway",
            ResourceKind::RouteTable => "route_table",
            ResourceKind::Route => "route",
            ResourceKind::RouteTableAssociation => "route_table_association",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::TargetGroup => "target_group",
            ResourceKind::Listener => "listener",
            ResourceKind::Instance => "instance",
            ResourceKind::TargetGroupAttachment => "target_group_attachment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_token())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    /// Accepts either the type token or the snake_case name.
    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.type_token() == s || k.snake_name() == s)
            .ok_or_else(|| Error::Config(format!("Unknown resource kind: '{}'", s)))
    }
}

// ============================================================================
// Property Values
// ============================================================================

/// A property value: a literal, a deferred output, or a container of either.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Literal(JsonValue),
    Output(OutputHandle),
    List(Vec<PropertyValue>),
    Map(IndexMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Build a list value.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<PropertyValue>,
    {
        PropertyValue::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a map value.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        PropertyValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Collect every output handle in this value, depth first.
    pub fn collect_handles<'a>(&'a self, out: &mut Vec<&'a OutputHandle>) {
        match self {
            PropertyValue::Literal(_) => {}
            PropertyValue::Output(handle) => out.push(handle),
            PropertyValue::List(items) => {
                for item in items {
                    item.collect_handles(out);
                }
            }
            PropertyValue::Map(entries) => {
                for value in entries.values() {
                    value.collect_handles(out);
                }
            }
        }
    }

    /// Substitute every handle with its resolved value.
    ///
    /// Returns the first handle that is not resolved.
    pub fn resolve(&self) -> std::result::Result<JsonValue, &OutputHandle> {
        match self {
            PropertyValue::Literal(v) => Ok(v.clone()),
            PropertyValue::Output(handle) => handle.value().ok_or(handle),
            PropertyValue::List(items) => items
                .iter()
                .map(PropertyValue::resolve)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            PropertyValue::Map(entries) => {
                let mut object = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries {
                    object.insert(key.clone(), value.resolve()?);
                }
                Ok(JsonValue::Object(object))
            }
        }
    }
}

impl From<OutputHandle> for PropertyValue {
    fn from(handle: OutputHandle) -> Self {
        PropertyValue::Output(handle)
    }
}

impl From<&OutputHandle> for PropertyValue {
    fn from(handle: &OutputHandle) -> Self {
        PropertyValue::Output(handle.clone())
    }
}

impl From<JsonValue> for PropertyValue {
    fn from(value: JsonValue) -> Self {
        PropertyValue::Literal(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Literal(JsonValue::String(value.to_string()))
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Literal(JsonValue::String(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Literal(JsonValue::Bool(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Literal(JsonValue::from(value))
    }
}

impl<V: Into<PropertyValue>> From<Vec<V>> for PropertyValue {
    fn from(items: Vec<V>) -> Self {
        PropertyValue::list(items)
    }
}

// ============================================================================
// Resource Descriptor
// ============================================================================

/// Declaration of one infrastructure object.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    /// Logical name, unique within a run
    pub id: String,
    /// Resource type
    pub kind: ResourceKind,
    /// Input properties
    pub properties: IndexMap<String, PropertyValue>,
    /// Explicit dependencies by logical id
    pub depends_on: BTreeSet<String>,
}

impl ResourceDescriptor {
    /// Create a descriptor with no properties.
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            properties: IndexMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Set a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set the `tags` map from string pairs.
    pub fn with_tags<I, K, V>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let tags: IndexMap<String, PropertyValue> = tags
            .into_iter()
            .map(|(k, v)| {
                let value: String = v.into();
                (k.into(), PropertyValue::from(value))
            })
            .collect();
        self.with_property("tags", PropertyValue::Map(tags))
    }

    /// Declare an explicit dependency.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// Every output handle referenced by this descriptor's properties.
    pub fn output_handles(&self) -> Vec<&OutputHandle> {
        let mut handles = Vec::new();
        for value in self.properties.values() {
            value.collect_handles(&mut handles);
        }
        handles
    }

    /// Substitute every handle with its resolved value.
    pub fn resolve_properties(&self) -> Result<ResolvedProperties> {
        let mut resolved = ResolvedProperties::with_capacity(self.properties.len());
        for (key, value) in &self.properties {
            let value = value.resolve().map_err(|handle| Error::UnresolvedInput {
                node: self.id.clone(),
                owner: handle.owner().to_string(),
                field: handle.field().to_string(),
            })?;
            resolved.insert(key.clone(), value);
        }
        Ok(resolved)
    }
}
