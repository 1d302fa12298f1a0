//! Provisioning backend capability.
//!
//! The engine never talks to a cloud API itself. Every create/update is
//! dispatched through a [`ProvisioningBackend`], which receives the resource
//! kind and its fully resolved properties and returns the outputs the
//! resource produced (identifiers, ARNs, ...).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::resource::ResourceKind;
use crate::retry::RetryableError;

/// Properties after every output reference has been substituted.
pub type ResolvedProperties = IndexMap<String, JsonValue>;

/// Output fields produced by a successful apply.
pub type Outputs = IndexMap<String, JsonValue>;

/// Whether retrying a failed apply is expected to help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rate limiting, throttling, eventual-consistency races.
    Transient,
    /// Invalid configuration, quota exhausted, rejected request.
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

/// Error returned by a provisioning backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{class} backend error: {message}")]
pub struct BackendError {
    /// Retry classification
    pub class: ErrorClass,
    /// Error message from the provider
    pub message: String,
    /// Provider-suggested delay before the next attempt
    pub retry_after: Option<Duration>,
}

impl BackendError {
    /// Create a transient (retryable) error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a permanent (non-retryable) error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attach a retry-after hint.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

impl RetryableError for BackendError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// The external provisioning capability.
///
/// Implementations must be safe to call concurrently: nodes of the same wave
/// are applied in parallel.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Create or update one resource.
    ///
    /// `name` is the logical id of the resource within the run.
    async fn apply(
        &self,
        name: &str,
        kind: ResourceKind,
        properties: &ResolvedProperties,
    ) -> Result<Outputs, BackendError>;
}
