//! Top-level run surface.
//!
//! [`Engine::run`] takes a set of descriptors and exports, builds and plans
//! the graph, executes it against a backend and returns a [`RunResult`].
//! Construction errors (duplicate ids, unknown references, cycles) are
//! returned before the backend is called even once.
//!
//! # Example
//!
//! ```rust,ignore
//! use stackplan::prelude::*;
//!
//! let engine = Engine::new(ExecutorConfig::default());
//! let result = engine
//!     .run(descriptors, exports, backend, &CancellationToken::new())
//!     .await?;
//!
//! match result.status {
//!     RunStatus::Success => println!("alb: {}", result.export("alb_dns")?),
//!     status => eprintln!("run ended {}: {} errors", status, result.errors.len()),
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::backend::ProvisioningBackend;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::{Executor, ExecutorConfig, NodeReport, NodeStatus};
use crate::graph::DependencyGraph;
use crate::planner::{ExecutionPlan, Planner};
use crate::resource::ResourceDescriptor;
use crate::state::{JsonStateStore, StateSnapshot, StateStore};
use crate::store::{Exports, ResultStore};

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every resource resolved
    Success,
    /// At least one resource failed or was skipped
    PartialFailure,
    /// The run was cancelled before every wave was dispatched
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::PartialFailure => write!(f, "partial_failure"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A resource that failed, with its final error.
#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub id: String,
    pub error: Error,
}

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Resolved outputs and exports
    pub store: Arc<ResultStore>,
    /// Report for every resource, in declaration order
    pub nodes: IndexMap<String, NodeReport>,
    /// Failed resources, in declaration order
    pub errors: Vec<NodeFailure>,
    pub duration: Duration,
}

impl RunResult {
    /// Resolve a named export.
    pub fn export(&self, name: &str) -> Result<JsonValue> {
        self.store.get(name)
    }

    /// Every export that resolved.
    pub fn exports(&self) -> IndexMap<String, JsonValue> {
        self.store.exported()
    }

    /// Final status of one resource.
    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.nodes.get(id).map(|r| r.status)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Builds, plans and executes resource graphs.
pub struct Engine {
    executor: Executor,
    state: Option<Arc<dyn StateStore>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl Engine {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            executor: Executor::new(config),
            state: None,
        }
    }

    /// Create an engine from loaded configuration.
    ///
    /// A configured state path installs a [`JsonStateStore`].
    pub fn from_config(config: &EngineConfig) -> Self {
        let engine = Self::new(config.executor.clone());
        match &config.state.path {
            Some(path) => engine.with_state_store(Arc::new(JsonStateStore::new(path))),
            None => engine,
        }
    }

    /// Persist a snapshot after every executed run.
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state = Some(store);
        self
    }

    /// Register descriptors and exports, then build the graph.
    pub fn build_graph(
        descriptors: impl IntoIterator<Item = ResourceDescriptor>,
        exports: &Exports,
    ) -> Result<DependencyGraph> {
        let mut graph = DependencyGraph::new();
        for descriptor in descriptors {
            graph.add_resource(descriptor)?;
        }
        for (name, handle) in exports.iter() {
            graph.export(name.clone(), handle.clone())?;
        }
        graph.build()?;
        Ok(graph)
    }

    /// Build and plan without executing.
    pub fn plan(
        descriptors: impl IntoIterator<Item = ResourceDescriptor>,
        exports: &Exports,
    ) -> Result<(DependencyGraph, ExecutionPlan)> {
        let graph = Self::build_graph(descriptors, exports)?;
        let plan = Planner::plan(&graph)?;
        Ok((graph, plan))
    }

    /// Build, plan and execute.
    ///
    /// Only construction errors are returned as `Err`; resource failures are
    /// reported in the [`RunResult`].
    #[instrument(skip_all, fields(resources = descriptors.len(), exports = exports.len()))]
    pub async fn run(
        &self,
        descriptors: Vec<ResourceDescriptor>,
        exports: Exports,
        backend: Arc<dyn ProvisioningBackend>,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        let (graph, plan) = Self::plan(descriptors, &exports)?;
        info!(
            waves = plan.len(),
            edges = graph.edge_count(),
            "Planned resource graph"
        );

        let graph = Arc::new(graph);
        let result = self
            .executor
            .execute(Arc::clone(&graph), &plan, backend, cancel)
            .await?;

        if let Some(store) = &self.state {
            let snapshot = StateSnapshot::from_run(&graph, &result);
            let store = Arc::clone(store);
            match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
                Ok(Ok(())) => debug!(run_id = %result.run_id, "Persisted run state"),
                Ok(Err(e)) => {
                    error!(run_id = %result.run_id, error = %e, "Failed to persist run state")
                }
                Err(e) => {
                    error!(run_id = %result.run_id, error = %e, "State persistence task aborted")
                }
            }
        }

        Ok(result)
    }
}

/// Run `descriptors` with the default engine configuration.
pub async fn run(
    descriptors: Vec<ResourceDescriptor>,
    exports: Exports,
    backend: Arc<dyn ProvisioningBackend>,
    cancel: &CancellationToken,
) -> Result<RunResult> {
    Engine::default()
        .run(descriptors, exports, backend, cancel)
        .await
}
