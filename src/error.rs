//! Error types for Stackplan.
//!
//! A single [`Error`] enum covers the whole lifecycle of a run. Construction
//! errors (`DuplicateId`, `UnknownDependency`, `GraphFrozen`, `CycleDetected`,
//! ...) abort before any backend call is made. Node-level errors are recorded
//! against the failing node and never abort sibling subtrees. Export errors
//! are raised only when a caller queries the [`ResultStore`](crate::store::ResultStore).

use thiserror::Error;

use crate::backend::BackendError;

/// Result type alias for Stackplan operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Stackplan.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Graph Construction Errors
    // ========================================================================
    /// A resource with the same logical id was already registered.
    #[error("Resource '{0}' is already declared")]
    DuplicateId(String),

    /// An explicit dependency or output reference points at an unknown resource.
    #[error("'{from}' depends on unknown resource '{to}'")]
    UnknownDependency {
        /// Node (or `export:<name>`) holding the reference
        from: String,
        /// Missing target
        to: String,
    },

    /// The graph was already built and no longer accepts resources.
    #[error("Dependency graph is frozen; cannot add '{0}'")]
    GraphFrozen(String),

    /// An export with the same name was already registered.
    #[error("Export '{0}' is already registered")]
    DuplicateExport(String),

    /// The planner was handed a graph that was never built.
    #[error("Dependency graph has not been built")]
    GraphNotBuilt,

    /// An output handle was already resolved or failed when the graph was built.
    #[error("Output handle '{0}' is already settled; declare fresh descriptors for each run")]
    HandleSettled(String),

    /// The execution plan does not partition the graph's resources.
    #[error("Execution plan does not match the graph: {0}")]
    PlanMismatch(String),

    /// The dependency graph contains a cycle.
    #[error("Circular dependency detected: {}", format_cycle(.participants))]
    CycleDetected {
        /// One minimal cycle, in dependency order
        participants: Vec<String>,
    },

    // ========================================================================
    // Node Errors
    // ========================================================================
    /// The provisioning backend rejected a create/update.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// An output reference was not resolved when its consumer was dispatched.
    #[error("Input '{owner}.{field}' of '{node}' is not resolved")]
    UnresolvedInput {
        /// Consuming node
        node: String,
        /// Owner of the referenced output
        owner: String,
        /// Referenced output field
        field: String,
    },

    /// The node was withheld because an upstream node failed.
    #[error("Resource '{node}' skipped: upstream '{upstream}' failed")]
    Skipped {
        /// Skipped node
        node: String,
        /// Failed node that caused the skip
        upstream: String,
    },

    // ========================================================================
    // Export Errors
    // ========================================================================
    /// An export was queried before it could be resolved.
    #[error("Export '{name}' is unresolved: {reason}")]
    UnresolvedExport {
        /// Export name
        name: String,
        /// Why the value is unavailable
        reason: String,
    },

    // ========================================================================
    // Configuration / IO Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// State store error.
    #[error("State store error: {0}")]
    State(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    Yaml(String),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

// `Error` is cloned into every node report, so foreign errors are kept as text.
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Yaml(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Toml(e.to_string())
    }
}

/// Format a cycle path for display
fn format_cycle(cycle: &[String]) -> String {
    if cycle.is_empty() {
        return "empty cycle".to_string();
    }
    let mut result = cycle.join(" -> ");
    if let Some(first) = cycle.first() {
        result.push_str(" -> ");
        result.push_str(first);
    }
    result
}

impl Error {
    /// Creates an unknown dependency error.
    pub fn unknown_dependency(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::UnknownDependency {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates an unresolved export error.
    pub fn unresolved_export(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnresolvedExport {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised while assembling or planning the graph.
    ///
    /// These abort a run before any external side effect.
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Error::DuplicateId(_)
                | Error::UnknownDependency { .. }
                | Error::GraphFrozen(_)
                | Error::DuplicateExport(_)
                | Error::GraphNotBuilt
                | Error::HandleSettled(_)
                | Error::PlanMismatch(_)
                | Error::CycleDetected { .. }
        )
    }

    /// Returns true if retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Backend(e) if e.is_transient())
    }
}
