//! Per-resource lifecycle tracking.
//!
//! Every resource moves through a small state machine:
//!
//! ```text
//! Pending -> Running -> Resolved | Failed
//! Pending -> Skipped | Cancelled
//! ```
//!
//! Terminal states never change. The [`StatusBook`] guards all transitions
//! behind one mutex so that concurrent failures in the same wave can mark
//! overlapping dependent sets without double counting.

use std::fmt;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Lifecycle state of one resource within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Resolved,
    Failed,
    /// Withheld because an upstream resource failed
    Skipped,
    /// Never dispatched because the run was cancelled
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Resolved | NodeStatus::Failed | NodeStatus::Skipped | NodeStatus::Cancelled
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Resolved => "resolved",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Final report for one resource.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub status: NodeStatus,
    /// Number of `apply` calls made
    pub attempts: u32,
    /// Last error, for failed and skipped resources
    pub error: Option<Error>,
    /// Failed upstream resource that caused a skip
    pub skipped_because: Option<String>,
}

impl Default for NodeReport {
    fn default() -> Self {
        Self {
            status: NodeStatus::Pending,
            attempts: 0,
            error: None,
            skipped_because: None,
        }
    }
}

/// One skip decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipRecord {
    pub node: String,
    pub upstream: String,
}

#[derive(Debug, Default)]
struct Book {
    reports: IndexMap<String, NodeReport>,
    skips: Vec<SkipRecord>,
}

/// Mutex-guarded status of every resource in a run.
#[derive(Debug, Default)]
pub struct StatusBook {
    inner: Mutex<Book>,
}

impl StatusBook {
    /// Create a book with every id `Pending`, in the given order.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reports = ids
            .into_iter()
            .map(|id| (id.into(), NodeReport::default()))
            .collect();
        Self {
            inner: Mutex::new(Book {
                reports,
                skips: Vec::new(),
            }),
        }
    }

    pub fn status(&self, id: &str) -> Option<NodeStatus> {
        self.inner.lock().reports.get(id).map(|r| r.status)
    }

    /// `Pending -> Running`.
    pub fn start(&self, id: &str) -> bool {
        self.transition(id, |report| {
            if report.status != NodeStatus::Pending {
                return false;
            }
            report.status = NodeStatus::Running;
            true
        })
    }

    /// Count one `apply` call.
    pub fn record_attempt(&self, id: &str) {
        if let Some(report) = self.inner.lock().reports.get_mut(id) {
            report.attempts += 1;
        }
    }

    /// `Running -> Resolved`.
    pub fn resolve(&self, id: &str) -> bool {
        self.transition(id, |report| {
            if report.status != NodeStatus::Running {
                return false;
            }
            report.status = NodeStatus::Resolved;
            true
        })
    }

    /// `Running -> Failed`.
    pub fn fail(&self, id: &str, error: Error) -> bool {
        self.transition(id, |report| {
            if report.status != NodeStatus::Running {
                return false;
            }
            report.status = NodeStatus::Failed;
            report.error = Some(error);
            true
        })
    }

    /// `Pending -> Skipped`, recording the upstream cause.
    ///
    /// Returns false, and records nothing, if the resource already left
    /// `Pending`.
    pub fn skip(&self, id: &str, upstream: &str) -> bool {
        let mut book = self.inner.lock();
        let Some(report) = book.reports.get_mut(id) else {
            return false;
        };
        if report.status != NodeStatus::Pending {
            return false;
        }
        report.status = NodeStatus::Skipped;
        report.skipped_because = Some(upstream.to_string());
        report.error = Some(Error::Skipped {
            node: id.to_string(),
            upstream: upstream.to_string(),
        });
        book.skips.push(SkipRecord {
            node: id.to_string(),
            upstream: upstream.to_string(),
        });
        true
    }

    /// `Pending -> Cancelled`.
    pub fn cancel(&self, id: &str) -> bool {
        self.transition(id, |report| {
            if report.status != NodeStatus::Pending {
                return false;
            }
            report.status = NodeStatus::Cancelled;
            true
        })
    }

    /// Ids still `Pending`, in book order.
    pub fn pending(&self) -> Vec<String> {
        self.inner
            .lock()
            .reports
            .iter()
            .filter(|(_, r)| r.status == NodeStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every skip decision, in the order it was made.
    pub fn skips(&self) -> Vec<SkipRecord> {
        self.inner.lock().skips.clone()
    }

    /// Number of resources in `status`.
    pub fn count(&self, status: NodeStatus) -> usize {
        self.inner
            .lock()
            .reports
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    /// Copy of every report.
    pub fn reports(&self) -> IndexMap<String, NodeReport> {
        self.inner.lock().reports.clone()
    }

    fn transition<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut NodeReport) -> bool,
    {
        self.inner
            .lock()
            .reports
            .get_mut(id)
            .map(f)
            .unwrap_or(false)
    }
}
