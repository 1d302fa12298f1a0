//! Wave executor.
//!
//! The [`Executor`] walks an [`ExecutionPlan`] one wave at a time. Every
//! resource in a wave is spawned as its own task, bounded by a semaphore of
//! `max_concurrency` permits, and the wave completes when all of them have
//! settled. A resource's handles are resolved from its outputs as soon as its
//! `apply` returns, so the next wave sees every value it needs.
//!
//! Failures never abort the run. A failed resource fails its own handles and
//! marks its transitive dependents `Skipped`; independent subtrees continue.
//! Cancellation is checked before each wave: resources already in flight run
//! to completion, everything not yet dispatched ends `Cancelled`.

pub mod status;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::backend::{BackendError, Outputs, ProvisioningBackend, ResolvedProperties};
use crate::engine::{NodeFailure, RunResult, RunStatus};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::planner::ExecutionPlan;
use crate::resource::{OutputHandle, ResourceKind};
use crate::retry::{RetryAction, RetryContext, RetryPolicy};
use crate::store::ResultStore;

pub use status::{NodeReport, NodeStatus, SkipRecord, StatusBook};

/// Configuration for the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of concurrent `apply` calls; 0 means unbounded
    pub max_concurrency: usize,
    /// Retry policy for transient backend errors
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            retry: RetryPolicy::default(),
        }
    }
}

/// Shared state handed to every resource task.
#[derive(Clone)]
struct NodeContext {
    graph: Arc<DependencyGraph>,
    backend: Arc<dyn ProvisioningBackend>,
    book: Arc<StatusBook>,
    store: Arc<ResultStore>,
    retry: RetryPolicy,
    semaphore: Option<Arc<Semaphore>>,
}

/// The wave executor
pub struct Executor {
    config: ExecutorConfig,
    semaphore: Option<Arc<Semaphore>>,
}

impl Executor {
    /// Create a new executor with the given configuration
    pub fn new(config: ExecutorConfig) -> Self {
        let semaphore = match config.max_concurrency {
            0 => None,
            permits => Some(Arc::new(Semaphore::new(permits))),
        };
        Self { config, semaphore }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Apply every resource of `plan`, wave by wave.
    ///
    /// Exports registered on `graph` are answered by the returned store.
    /// Returns `PlanMismatch` without calling the backend when `plan` does not
    /// place every resource of `graph` exactly once.
    #[instrument(skip_all, fields(resources = graph.node_count(), waves = plan.len()))]
    pub async fn execute(
        &self,
        graph: Arc<DependencyGraph>,
        plan: &ExecutionPlan,
        backend: Arc<dyn ProvisioningBackend>,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        check_plan(&graph, plan)?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let book = Arc::new(StatusBook::new(graph.ids()));
        let store = Arc::new(ResultStore::new(graph.exports().clone()));

        let ctx = NodeContext {
            graph: Arc::clone(&graph),
            backend,
            book: Arc::clone(&book),
            store: Arc::clone(&store),
            retry: self.config.retry.clone(),
            semaphore: self.semaphore.clone(),
        };

        info!(%run_id, "Starting run");

        let mut cancelled = false;
        for wave in plan {
            if cancel.is_cancelled() {
                warn!(wave = wave.index, "Run cancelled; no further waves dispatched");
                cancelled = true;
                break;
            }

            let ready: Vec<String> = wave
                .nodes
                .iter()
                .filter(|id| book.status(id) == Some(NodeStatus::Pending))
                .cloned()
                .collect();

            info!(
                wave = wave.index,
                dispatched = ready.len(),
                skipped = wave.len() - ready.len(),
                "Dispatching wave"
            );

            let handles: Vec<_> = ready
                .iter()
                .map(|id| {
                    let ctx = ctx.clone();
                    let id = id.clone();
                    tokio::spawn(async move { run_node(ctx, id).await })
                })
                .collect();

            let results = join_all(handles).await;

            for (id, result) in ready.iter().zip(results) {
                if let Err(join_err) = result {
                    error!(resource = %id, error = %join_err, "Resource task aborted");
                    let err = Error::Backend(BackendError::permanent(format!(
                        "apply task aborted: {}",
                        join_err
                    )));
                    if book.fail(id, err) {
                        propagate_failure(&ctx, id);
                    }
                }
            }
        }

        if cancelled {
            for id in book.pending() {
                if book.cancel(&id) {
                    for handle in graph.handles_for(&id) {
                        fail_handle(handle, "run cancelled");
                    }
                }
            }
        }

        store.mark_complete();

        let nodes = book.reports();
        let status = if cancelled {
            RunStatus::Cancelled
        } else if nodes.values().all(|r| r.status == NodeStatus::Resolved) {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        };

        let errors = nodes
            .iter()
            .filter(|(_, r)| r.status == NodeStatus::Failed)
            .filter_map(|(id, r)| {
                r.error.clone().map(|error| NodeFailure {
                    id: id.clone(),
                    error,
                })
            })
            .collect();

        info!(
            %run_id,
            %status,
            resolved = book.count(NodeStatus::Resolved),
            failed = book.count(NodeStatus::Failed),
            skipped = book.count(NodeStatus::Skipped),
            cancelled = book.count(NodeStatus::Cancelled),
            "Run finished"
        );

        Ok(RunResult {
            run_id,
            status,
            store,
            nodes,
            errors,
            duration: started.elapsed(),
        })
    }
}

/// Every graph resource must sit in exactly one wave, and nothing else may.
fn check_plan(graph: &DependencyGraph, plan: &ExecutionPlan) -> Result<()> {
    let mut planned = HashSet::new();
    for id in plan.iter().flat_map(|wave| wave.nodes.iter()) {
        if !graph.contains(id) {
            return Err(Error::PlanMismatch(format!("unknown resource '{}'", id)));
        }
        if !planned.insert(id.as_str()) {
            return Err(Error::PlanMismatch(format!("'{}' is planned twice", id)));
        }
    }

    if let Some(missing) = graph.ids().find(|id| !planned.contains(id)) {
        return Err(Error::PlanMismatch(format!("'{}' is not planned", missing)));
    }
    Ok(())
}

/// Lifecycle of one resource: substitute, apply with retries, publish.
async fn run_node(ctx: NodeContext, id: String) {
    let _permit = match &ctx.semaphore {
        Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
        None => None,
    };

    // Skipped after the wave was collected
    if !ctx.book.start(&id) {
        return;
    }

    let Some(descriptor) = ctx.graph.descriptor(&id) else {
        return;
    };

    let properties = match descriptor.resolve_properties() {
        Ok(properties) => properties,
        Err(err) => {
            error!(resource = %id, error = %err, "Input not resolved at dispatch");
            if ctx.book.fail(&id, err) {
                propagate_failure(&ctx, &id);
            }
            return;
        }
    };

    match apply_with_retry(&ctx, &id, descriptor.kind, &properties).await {
        Ok(outputs) => {
            for handle in ctx.graph.handles_for(&id) {
                let written = match outputs.get(handle.field()) {
                    Some(value) => handle.resolve(value.clone()),
                    None => handle.fail("output field not produced"),
                };
                if !written {
                    error!(resource = %id, %handle, state = ?handle.state(), "Output handle already settled");
                }
            }
            ctx.store.record(&id, outputs);
            ctx.book.resolve(&id);
            info!(resource = %id, kind = %descriptor.kind, "Resource resolved");
        }
        Err(err) => {
            warn!(resource = %id, error = %err, "Resource failed");
            if ctx.book.fail(&id, Error::Backend(err)) {
                propagate_failure(&ctx, &id);
            }
        }
    }
}

async fn apply_with_retry(
    ctx: &NodeContext,
    id: &str,
    kind: ResourceKind,
    properties: &ResolvedProperties,
) -> std::result::Result<Outputs, BackendError> {
    let mut retry = RetryContext::new(id);

    loop {
        ctx.book.record_attempt(id);
        debug!(resource = %id, attempt = retry.attempt + 1, "Dispatching apply");

        let err = match ctx.backend.apply(id, kind, properties).await {
            Ok(outputs) => return Ok(outputs),
            Err(err) => err,
        };

        retry.record_attempt(&err);
        match ctx.retry.should_retry(&retry, &err) {
            RetryAction::Retry { delay } => {
                debug!(resource = %id, ?delay, error = %err, "Retrying after transient error");
                retry.add_delay(delay);
                tokio::time::sleep(delay).await;
            }
            RetryAction::Stop { reason } => {
                debug!(resource = %id, %reason, "Not retrying");
                return Err(err);
            }
        }
    }
}

/// Fail `failed`'s handles and skip everything downstream of it.
fn propagate_failure(ctx: &NodeContext, failed: &str) {
    for handle in ctx.graph.handles_for(failed) {
        fail_handle(handle, format!("resource '{}' failed", failed));
    }

    for dependent in ctx.graph.transitive_dependents(failed) {
        if ctx.book.skip(&dependent, failed) {
            warn!(resource = %dependent, upstream = %failed, "Resource skipped");
            for handle in ctx.graph.handles_for(&dependent) {
                fail_handle(handle, format!("skipped: upstream '{}' failed", failed));
            }
        }
    }
}

fn fail_handle(handle: &OutputHandle, reason: impl Into<String>) {
    if !handle.fail(reason) {
        error!(%handle, state = ?handle.state(), "Output handle already settled");
    }
}
