//! Deferred resource outputs.
//!
//! An [`OutputHandle`] names one output field of one resource (`vpc.id`,
//! `alb.arn`). It is created while the graph is being declared, long before
//! the resource exists, and is resolved exactly once by the executor when the
//! owning resource's apply returns.
//!
//! Clones of a handle share the same cell, so a caller holding a clone sees
//! the value the executor wrote.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Resolution state of an output handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum HandleState {
    /// Owner not yet applied
    Pending,
    /// Owner applied and produced this value
    Resolved(JsonValue),
    /// Owner failed, was skipped or never ran
    Failed(String),
}

impl HandleState {
    pub fn is_pending(&self) -> bool {
        matches!(self, HandleState::Pending)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, HandleState::Resolved(_))
    }

    /// Returns the resolved value, if any.
    pub fn value(&self) -> Option<&JsonValue> {
        match self {
            HandleState::Resolved(v) => Some(v),
            _ => None,
        }
    }
}

/// A reference to an output field of a resource, resolved after it is created.
#[derive(Clone)]
pub struct OutputHandle {
    owner: Arc<str>,
    field: Arc<str>,
    cell: Arc<OnceCell<HandleState>>,
}

impl OutputHandle {
    /// Create a pending handle for `owner.field`.
    pub fn new(owner: impl AsRef<str>, field: impl AsRef<str>) -> Self {
        Self {
            owner: Arc::from(owner.as_ref()),
            field: Arc::from(field.as_ref()),
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Logical id of the producing resource.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Output field on the producing resource.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Current state; an unwritten cell reads as `Pending`.
    pub fn state(&self) -> HandleState {
        self.cell.get().cloned().unwrap_or(HandleState::Pending)
    }

    /// Resolved value, if any.
    pub fn value(&self) -> Option<JsonValue> {
        self.cell.get().and_then(|s| s.value().cloned())
    }

    /// True when both handles share one cell.
    pub fn same_cell(&self, other: &OutputHandle) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Resolve the handle. Returns false if it was already settled.
    pub(crate) fn resolve(&self, value: JsonValue) -> bool {
        self.cell.set(HandleState::Resolved(value)).is_ok()
    }

    /// Fail the handle. Returns false if it was already settled.
    pub(crate) fn fail(&self, reason: impl Into<String>) -> bool {
        self.cell.set(HandleState::Failed(reason.into())).is_ok()
    }
}

impl fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputHandle")
            .field("owner", &self.owner)
            .field("field", &self.field)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.field)
    }
}
