//! Persisted run state.
//!
//! After a run reaches execution the engine can hand a [`StateSnapshot`] to a
//! [`StateStore`]. The snapshot records what each resource ended as and the
//! outputs it produced, so a later tool can inspect the last known state of
//! the stack. Snapshots are written whole; nothing is diffed against the
//! previous one.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::backend::Outputs;
use crate::engine::{RunResult, RunStatus};
use crate::error::{Error, Result};
use crate::executor::NodeStatus;
use crate::graph::DependencyGraph;
use crate::resource::ResourceKind;

/// Final state of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: ResourceKind,
    pub status: NodeStatus,
    /// Outputs of a resolved resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Outputs>,
    /// Error message of a failed or skipped resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    pub resources: IndexMap<String, ResourceState>,
    pub exports: IndexMap<String, JsonValue>,
}

impl StateSnapshot {
    /// Capture the outcome of a run over `graph`.
    pub fn from_run(graph: &DependencyGraph, result: &RunResult) -> Self {
        let resources = result
            .nodes
            .iter()
            .filter_map(|(id, report)| {
                let kind = graph.kind(id)?;
                Some((
                    id.clone(),
                    ResourceState {
                        kind,
                        status: report.status,
                        outputs: result.store.outputs(id),
                        error: report.error.as_ref().map(ToString::to_string),
                    },
                ))
            })
            .collect();

        Self {
            run_id: result.run_id,
            created_at: Utc::now(),
            status: result.status,
            resources,
            exports: result.store.exported(),
        }
    }

    /// Resources that ended in `status`.
    pub fn resources_with(&self, status: NodeStatus) -> impl Iterator<Item = &str> {
        self.resources
            .iter()
            .filter(move |(_, r)| r.status == status)
            .map(|(id, _)| id.as_str())
    }
}

/// Storage for run snapshots.
pub trait StateStore: Send + Sync {
    /// Load the most recent snapshot, if any.
    fn load(&self) -> Result<Option<StateSnapshot>>;

    /// Replace the stored snapshot.
    fn save(&self, snapshot: &StateSnapshot) -> Result<()>;
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Single pretty-printed JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<Option<StateSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file = File::open(&self.path).map_err(|e| {
            Error::State(format!("Failed to open {}: {}", self.path.display(), e))
        })?;
        let reader = BufReader::new(file);
        let snapshot = serde_json::from_reader(reader)?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.temp_path();
        {
            let file = File::create(&temp_path).map_err(|e| {
                Error::State(format!("Failed to create {}: {}", temp_path.display(), e))
            })?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, snapshot)?;
            writer.flush()?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            Error::State(format!(
                "Failed to move {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    history: RwLock<Vec<StateSnapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every snapshot saved so far, oldest first.
    pub fn history(&self) -> Vec<StateSnapshot> {
        self.history.read().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<StateSnapshot>> {
        Ok(self.history.read().last().cloned())
    }

    fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        self.history.write().push(snapshot.clone());
        Ok(())
    }
}
