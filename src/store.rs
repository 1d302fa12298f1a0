//! Run-scoped result store and named exports.
//!
//! The [`ResultStore`] collects the outputs of every resolved resource. It is
//! written once per resource by the executor and only answers export queries
//! after the run has completed.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::backend::Outputs;
use crate::error::{Error, Result};
use crate::resource::{HandleState, OutputHandle};

/// Named output handles surfaced to the caller after a run.
#[derive(Debug, Clone, Default)]
pub struct Exports {
    entries: IndexMap<String, OutputHandle>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named export.
    pub fn export(&mut self, name: impl Into<String>, handle: OutputHandle) -> Result<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(Error::DuplicateExport(name));
        }
        self.entries.insert(name, handle);
        Ok(())
    }

    /// Builder-style variant of [`Exports::export`].
    pub fn with(mut self, name: impl Into<String>, handle: OutputHandle) -> Result<Self> {
        self.export(name, handle)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&OutputHandle> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OutputHandle)> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outputs of one run, keyed by resource id.
#[derive(Debug, Default)]
pub struct ResultStore {
    outputs: DashMap<String, Outputs>,
    exports: Exports,
    complete: AtomicBool,
}

impl ResultStore {
    /// Create an empty store answering for `exports`.
    pub fn new(exports: Exports) -> Self {
        Self {
            outputs: DashMap::new(),
            exports,
            complete: AtomicBool::new(false),
        }
    }

    /// Record the outputs of a resolved resource. The first write wins.
    pub(crate) fn record(&self, id: &str, outputs: Outputs) -> bool {
        match self.outputs.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(outputs);
                true
            }
        }
    }

    pub(crate) fn mark_complete(&self) {
        self.complete.store(true, Ordering::Release);
    }

    /// Whether the run that owns this store has finished.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Resolve a named export.
    pub fn get(&self, name: &str) -> Result<JsonValue> {
        if !self.is_complete() {
            return Err(Error::unresolved_export(name, "run has not completed"));
        }

        let handle = self
            .exports
            .get(name)
            .ok_or_else(|| Error::unresolved_export(name, "unknown export"))?;

        let outputs = self.outputs.get(handle.owner()).ok_or_else(|| {
            let reason = match handle.state() {
                HandleState::Failed(cause) => {
                    format!("resource '{}' did not resolve: {}", handle.owner(), cause)
                }
                _ => format!("resource '{}' did not resolve", handle.owner()),
            };
            Error::unresolved_export(name, reason)
        })?;

        outputs.get(handle.field()).cloned().ok_or_else(|| {
            Error::unresolved_export(
                name,
                format!("output field '{}' not produced", handle.field()),
            )
        })
    }

    /// Every export that resolved, in registration order.
    pub fn exported(&self) -> IndexMap<String, JsonValue> {
        self.exports
            .names()
            .filter_map(|name| self.get(name).ok().map(|v| (name.to_string(), v)))
            .collect()
    }

    /// Outputs of a resolved resource.
    pub fn outputs(&self, id: &str) -> Option<Outputs> {
        self.outputs.get(id).map(|o| o.value().clone())
    }

    /// One output field of a resolved resource.
    pub fn output(&self, id: &str, field: &str) -> Option<JsonValue> {
        self.outputs.get(id).and_then(|o| o.get(field).cloned())
    }

    /// Registered exports.
    pub fn exports(&self) -> &Exports {
        &self.exports
    }

    /// Number of resolved resources.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
