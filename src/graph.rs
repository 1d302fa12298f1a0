//! Dependency graph over resource descriptors.
//!
//! The graph is an explicit builder owned by one run. Resources are added
//! with [`DependencyGraph::add_resource`], exports are registered with
//! [`DependencyGraph::export`], and [`DependencyGraph::build`] derives the
//! edges and freezes the graph:
//!
//! - every [`OutputHandle`] found in a descriptor's properties, at any depth,
//!   adds an edge from the handle's owner to the descriptor
//! - every explicit `depends_on` entry adds an edge from the named resource
//!
//! An edge `a -> b` means `a` resolves before `b`. Acyclicity is not checked
//! here; the [`Planner`](crate::planner::Planner) reports cycles.
//!
//! # Example
//!
//! ```rust,ignore
//! use stackplan::graph::DependencyGraph;
//! use stackplan::resource::{ResourceDescriptor, ResourceKind};
//!
//! let mut graph = DependencyGraph::new();
//! let vpc = graph.add_resource(ResourceDescriptor::new("vpc", ResourceKind::Vpc))?;
//! graph.add_resource(
//!     ResourceDescriptor::new("igw", ResourceKind::InternetGateway)
//!         .with_property("vpc_id", vpc.id_output()),
//! )?;
//! graph.build()?;
//!
//! assert_eq!(graph.dependencies("igw"), vec!["vpc"]);
//! println!("{}", graph.to_dot());
//! ```

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resource::{OutputHandle, ResourceDescriptor, ResourceKind};
use crate::store::Exports;

// ============================================================================
// Edges
// ============================================================================

/// Why one resource depends on another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeKind {
    /// Declared via `depends_on`
    Explicit,
    /// A property references an output of the upstream resource
    Output { field: String },
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Explicit => write!(f, "explicit"),
            EdgeKind::Output { field } => write!(f, "output:{}", field),
        }
    }
}

/// An edge in the dependency graph. `from` resolves before `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Upstream resource
    pub from: String,
    /// Downstream resource
    pub to: String,
    /// Kind of dependency
    pub kind: EdgeKind,
}

impl DependencyEdge {
    /// Create a new dependency edge
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
        }
    }
}

// ============================================================================
// Resource Reference
// ============================================================================

/// Reference to a declared resource, used to take output handles from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    id: String,
}

impl ResourceRef {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Logical id of the referenced resource.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A fresh pending handle for `field`.
    pub fn output(&self, field: impl AsRef<str>) -> OutputHandle {
        OutputHandle::new(&self.id, field)
    }

    /// Handle for the provider-assigned identifier.
    pub fn id_output(&self) -> OutputHandle {
        self.output("id")
    }

    /// Handle for the resource ARN.
    pub fn arn_output(&self) -> OutputHandle {
        self.output("arn")
    }
}

// ============================================================================
// Dependency Graph
// ============================================================================

#[derive(Debug, Clone)]
struct GraphNode {
    descriptor: ResourceDescriptor,
    /// Resources that must resolve before this one
    depends_on: BTreeSet<String>,
    /// Resources waiting on this one
    depended_by: BTreeSet<String>,
}

/// Directed graph of resource descriptors.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// All nodes, in declaration order
    nodes: IndexMap<String, GraphNode>,
    /// All edges, populated by `build`
    edges: Vec<DependencyEdge>,
    /// Named exports
    exports: Exports,
    /// Every distinct handle instance, grouped by owner
    handles: IndexMap<String, Vec<OutputHandle>>,
    frozen: bool,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource.
    pub fn add_resource(&mut self, descriptor: ResourceDescriptor) -> Result<ResourceRef> {
        if self.frozen {
            return Err(Error::GraphFrozen(descriptor.id));
        }
        if self.nodes.contains_key(&descriptor.id) {
            return Err(Error::DuplicateId(descriptor.id));
        }

        let id = descriptor.id.clone();
        self.nodes.insert(
            id.clone(),
            GraphNode {
                descriptor,
                depends_on: BTreeSet::new(),
                depended_by: BTreeSet::new(),
            },
        );
        Ok(ResourceRef::new(id))
    }

    /// Register a named export.
    pub fn export(&mut self, name: impl Into<String>, handle: OutputHandle) -> Result<()> {
        let name = name.into();
        if self.frozen {
            return Err(Error::GraphFrozen(format!("export:{}", name)));
        }
        self.exports.export(name, handle)
    }

    /// Derive edges from handles and explicit dependencies, then freeze.
    ///
    /// On error nothing is recorded and the graph stays open. Building a
    /// frozen graph is a no-op.
    pub fn build(&mut self) -> Result<()> {
        if self.frozen {
            return Ok(());
        }

        let mut edges: Vec<DependencyEdge> = Vec::new();
        let mut seen: HashSet<DependencyEdge> = HashSet::new();
        let mut handles: IndexMap<String, Vec<OutputHandle>> = IndexMap::new();

        for (id, node) in &self.nodes {
            for handle in node.descriptor.output_handles() {
                if !self.nodes.contains_key(handle.owner()) {
                    return Err(Error::unknown_dependency(id, handle.owner()));
                }
                ensure_pending(handle)?;
                let edge = DependencyEdge::new(
                    handle.owner(),
                    id,
                    EdgeKind::Output {
                        field: handle.field().to_string(),
                    },
                );
                if seen.insert(edge.clone()) {
                    edges.push(edge);
                }
                register_handle(&mut handles, handle);
            }

            for dep in &node.descriptor.depends_on {
                if !self.nodes.contains_key(dep) {
                    return Err(Error::unknown_dependency(id, dep));
                }
                let edge = DependencyEdge::new(dep, id, EdgeKind::Explicit);
                if seen.insert(edge.clone()) {
                    edges.push(edge);
                }
            }
        }

        for (name, handle) in self.exports.iter() {
            if !self.nodes.contains_key(handle.owner()) {
                return Err(Error::unknown_dependency(
                    format!("export:{}", name),
                    handle.owner(),
                ));
            }
            ensure_pending(handle)?;
            register_handle(&mut handles, handle);
        }

        for edge in &edges {
            if let Some(node) = self.nodes.get_mut(&edge.to) {
                node.depends_on.insert(edge.from.clone());
            }
            if let Some(node) = self.nodes.get_mut(&edge.from) {
                node.depended_by.insert(edge.to.clone());
            }
        }

        self.edges = edges;
        self.handles = handles;
        self.frozen = true;
        Ok(())
    }

    /// Whether `build` has completed.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Check if a resource exists
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Get a descriptor by id
    pub fn descriptor(&self, id: &str) -> Option<&ResourceDescriptor> {
        self.nodes.get(id).map(|n| &n.descriptor)
    }

    /// Kind of a resource
    pub fn kind(&self, id: &str) -> Option<ResourceKind> {
        self.nodes.get(id).map(|n| n.descriptor.kind)
    }

    /// All descriptors, in declaration order
    pub fn descriptors(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.nodes.values().map(|n| &n.descriptor)
    }

    /// All resource ids, in declaration order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Direct upstream resources of `id`, sorted.
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.nodes
            .get(id)
            .map(|n| n.depends_on.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Direct downstream resources of `id`, sorted.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.nodes
            .get(id)
            .map(|n| n.depended_by.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Every resource reachable downstream of `id`, excluding `id` itself.
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        let mut dependents = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(id.to_string());

        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&current) {
                for dep in &node.depended_by {
                    if dep != id && dependents.insert(dep.clone()) {
                        queue.push_back(dep.clone());
                    }
                }
            }
        }

        dependents
    }

    /// Every distinct handle owned by `owner`.
    pub fn handles_for(&self, owner: &str) -> &[OutputHandle] {
        self.handles.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Registered exports.
    pub fn exports(&self) -> &Exports {
        &self.exports
    }

    /// Get all edges
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Get the number of resources
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get the number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Generate DOT format output for Graphviz visualization
    pub fn to_dot(&self) -> String {
        let mut output = String::new();
        output.push_str("digraph DependencyGraph {\n");
        output.push_str("    rankdir=LR;\n");
        output.push_str("    node [shape=box, style=rounded];\n\n");

        output.push_str("    // Resources\n");
        for (id, node) in &self.nodes {
            output.push_str(&format!(
                "    \"{}\" [label=\"{}\\n({})\"];\n",
                id,
                id,
                node.descriptor.kind.type_token()
            ));
        }

        output.push_str("\n    // Edges\n");
        for edge in &self.edges {
            let (style, color) = match edge.kind {
                EdgeKind::Explicit => ("dashed", "#333333"),
                EdgeKind::Output { .. } => ("solid", "#2196F3"),
            };
            output.push_str(&format!(
                "    \"{}\" -> \"{}\" [label=\"{}\", style={}, color=\"{}\"];\n",
                edge.from, edge.to, edge.kind, style, color
            ));
        }

        output.push_str("}\n");
        output
    }
}

/// Handles are write-once; one settled by an earlier run cannot be reused.
fn ensure_pending(handle: &OutputHandle) -> Result<()> {
    if handle.state().is_pending() {
        Ok(())
    } else {
        Err(Error::HandleSettled(handle.to_string()))
    }
}

fn register_handle(handles: &mut IndexMap<String, Vec<OutputHandle>>, handle: &OutputHandle) {
    let owned = handles.entry(handle.owner().to_string()).or_default();
    if !owned.iter().any(|h| h.same_cell(handle)) {
        owned.push(handle.clone());
    }
}
