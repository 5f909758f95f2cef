//! ElastiPool configuration.
//!
//! TOML-based configuration with environment variable override support.
//! The runtime consumes from here only a resolved, validated set of pool
//! parameters; a missing or unreadable config source degrades to the
//! built-in defaults for the default pool alone.

use ep_common::{PoolConfig, PoolConfigBuilder, PoolConfigError, QueueKind, RejectionKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid pool entry [{name}]: {source}")]
    InvalidPool {
        name: String,
        source: PoolConfigError,
    },

    #[error("Duplicate pool name: {0}")]
    DuplicatePool(String),
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Selector implementation identifier (consumers map this onto a
    /// routing-input extractor; "default" routes everything by task name).
    pub selector: String,

    /// Enables per-task timing collection in pool snapshots.
    pub metrics_enabled: bool,

    /// Ordered pool definitions; order matters for routing-rule evaluation.
    #[serde(rename = "pool")]
    pub pools: Vec<PoolEntry>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            selector: "default".to_string(),
            metrics_enabled: false,
            pools: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Resolve the raw entries into validated [`PoolConfig`]s, preserving
    /// their configured order. Bad entries fail, never silently clamp.
    pub fn resolve_pools(&self) -> Result<Vec<PoolConfig>, ConfigError> {
        let mut resolved = Vec::with_capacity(self.pools.len());
        let mut seen: Vec<&str> = Vec::with_capacity(self.pools.len());

        for entry in &self.pools {
            if seen.contains(&entry.name.as_str()) {
                return Err(ConfigError::DuplicatePool(entry.name.clone()));
            }
            seen.push(&entry.name);
            resolved.push(entry.resolve()?);
        }

        Ok(resolved)
    }
}

/// One `[[pool]]` table in the TOML file. Unset fields take the built-in
/// defaults (core = N CPUs, max = 2N + 1, and so on).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    pub name: String,
    pub core_size: Option<usize>,
    pub max_size: Option<usize>,
    pub keep_alive_ms: Option<u64>,
    pub queue_kind: Option<QueueKind>,
    pub queue_capacity: Option<usize>,
    pub rejection: Option<RejectionKind>,
    #[serde(default)]
    pub expression: String,
}

impl PoolEntry {
    fn resolve(&self) -> Result<PoolConfig, ConfigError> {
        let mut builder = PoolConfigBuilder::new()
            .name(&self.name)
            .expression(&self.expression);
        if let Some(core) = self.core_size {
            builder = builder.core_size(core);
        }
        if let Some(max) = self.max_size {
            builder = builder.max_size(max);
        }
        if let Some(ms) = self.keep_alive_ms {
            builder = builder.keep_alive(Duration::from_millis(ms));
        }
        if let Some(kind) = self.queue_kind {
            builder = builder.queue_kind(kind);
        }
        if let Some(capacity) = self.queue_capacity {
            builder = builder.queue_capacity(capacity);
        }
        if let Some(rejection) = self.rejection {
            builder = builder.rejection(rejection);
        }
        builder.build().map_err(|source| ConfigError::InvalidPool {
            name: self.name.clone(),
            source,
        })
    }
}
