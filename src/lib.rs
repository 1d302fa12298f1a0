//! # Stackplan - A Dependency-Graph Provisioning Engine
//!
//! Stackplan takes a set of declared cloud resources, derives the order in
//! which they must be created from the references between them, and applies
//! them through a pluggable provisioning backend, one wave of independent
//! resources at a time.
//!
//! ## Core Concepts
//!
//! - **Resource Descriptors**: immutable declarations of one resource (kind,
//!   logical id, properties, explicit dependencies)
//! - **Output Handles**: deferred values such as `vpc.id`, known only once the
//!   owning resource exists; referencing one creates a dependency edge
//! - **Dependency Graph**: the resources and the edges derived from handles
//!   and explicit `depends_on`
//! - **Plan**: waves of mutually independent resources, in deterministic order
//! - **Executor**: applies each wave concurrently, retries transient errors,
//!   and skips everything downstream of a failure
//! - **Result Store**: per-resource outputs and named exports
//!
//! ## Architecture Overview
//!
//! ```text
//! descriptors + exports
//!          │
//!          ▼
//! ┌─────────────────────┐
//! │   DependencyGraph   │  add_resource / export / build
//! └─────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────┐
//! │       Planner       │  Kahn waves, minimal cycle report
//! └─────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────┐      ┌──────────────────────┐
//! │      Executor       │ ───▶ │ ProvisioningBackend  │
//! │ (tokio, semaphore)  │ ◀─── │   apply(kind, props) │
//! └─────────────────────┘      └──────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────┐      ┌──────────────────────┐
//! │     ResultStore     │ ───▶ │ StateStore (optional)│
//! └─────────────────────┘      └──────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use stackplan::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let vpc = OutputHandle::new("vpc", "id");
//!     let descriptors = vec![
//!         ResourceDescriptor::new("vpc", ResourceKind::Vpc)
//!             .with_property("cidr_block", "10.100.0.0/16"),
//!         ResourceDescriptor::new("igw", ResourceKind::InternetGateway)
//!             .with_property("vpc_id", vpc.clone()),
//!     ];
//!     let exports = Exports::new().with("vpc_id", vpc)?;
//!
//!     let result = stackplan::run(descriptors, exports, backend, &CancellationToken::new()).await?;
//!     println!("{}: {}", result.status, result.export("vpc_id")?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod logging;
pub mod planner;
pub mod resource;
pub mod retry;
pub mod state;
pub mod store;

pub use engine::run;
pub use error::{Error, Result};

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::backend::{
        BackendError, ErrorClass, Outputs, ProvisioningBackend, ResolvedProperties,
    };
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, NodeFailure, RunResult, RunStatus};
    pub use crate::error::{Error, Result};
    pub use crate::executor::{Executor, ExecutorConfig, NodeReport, NodeStatus};
    pub use crate::graph::{DependencyGraph, EdgeKind, ResourceRef};
    pub use crate::planner::{ExecutionPlan, Planner, Wave};
    pub use crate::resource::{
        HandleState, OutputHandle, PropertyValue, ResourceDescriptor, ResourceKind,
    };
    pub use crate::retry::{BackoffStrategy, RetryPolicy};
    pub use crate::state::{JsonStateStore, MemoryStateStore, StateSnapshot, StateStore};
    pub use crate::store::{Exports, ResultStore};

    pub use async_trait::async_trait;
    pub use tokio_util::sync::CancellationToken;
}

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of Stackplan.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns detailed version information including build metadata.
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        rust_version: option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown"),
        target: std::env::consts::ARCH,
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Detailed version information for the Stackplan build.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Semantic version string
    pub version: &'static str,
    /// Minimum Rust version required
    pub rust_version: &'static str,
    /// Target architecture
    pub target: &'static str,
    /// Build profile (debug or release)
    pub profile: &'static str,
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stackplan {} ({}, {})",
            self.version, self.target, self.profile
        )
    }
}
