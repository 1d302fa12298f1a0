//! Configuration module for Stackplan
//!
//! Handles loading configuration from, in order of precedence:
//! - Environment variables (`STACKPLAN_*`)
//! - An explicit config file path
//! - `$STACKPLAN_CONFIG`
//! - Project configuration (`./stackplan.toml`, `./stackplan.yaml`, `./stackplan.json`)
//! - Default values
//!
//! File format is chosen by extension; durations are written the humantime
//! way (`"250ms"`, `"30s"`, `"5m"`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::executor::ExecutorConfig;
use crate::logging::LoggingConfig;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "STACKPLAN_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wave execution and retry settings
    pub executor: ExecutorConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Persisted state settings
    pub state: StateConfig,
}

/// Where run snapshots are written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// JSON state file; no snapshot is written when unset
    pub path: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from the first file found, then apply environment
    /// overrides.
    ///
    /// An explicit path must exist; the other locations are optional.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => match Self::get_config_paths().into_iter().find(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Candidate config locations, most specific first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(env_config) = std::env::var(CONFIG_ENV) {
            paths.push(PathBuf::from(env_config));
        }

        paths.push(PathBuf::from("stackplan.toml"));
        paths.push(PathBuf::from("stackplan.yaml"));
        paths.push(PathBuf::from("stackplan.yml"));
        paths.push(PathBuf::from("stackplan.json"));

        paths
    }

    /// Parse a single config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "toml" => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // STACKPLAN_MAX_CONCURRENCY
        if let Ok(value) = std::env::var("STACKPLAN_MAX_CONCURRENCY") {
            self.executor.max_concurrency = value
                .parse()
                .with_context(|| format!("Invalid STACKPLAN_MAX_CONCURRENCY: '{}'", value))?;
        }

        // STACKPLAN_MAX_RETRIES
        if let Ok(value) = std::env::var("STACKPLAN_MAX_RETRIES") {
            self.executor.retry.max_retries = value
                .parse()
                .with_context(|| format!("Invalid STACKPLAN_MAX_RETRIES: '{}'", value))?;
        }

        // STACKPLAN_LOG_LEVEL
        if let Ok(value) = std::env::var("STACKPLAN_LOG_LEVEL") {
            self.logging.level = value.parse()?;
        }

        // STACKPLAN_STATE_PATH
        if let Ok(value) = std::env::var("STACKPLAN_STATE_PATH") {
            self.state.path = Some(PathBuf::from(value));
        }

        Ok(())
    }
}
