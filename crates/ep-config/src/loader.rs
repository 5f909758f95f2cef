//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "elastipool.toml",
    "./config/elastipool.toml",
    "/etc/elastipool/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path.
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides. An unreadable or unparsable file is reported and the
    /// built-in defaults are used instead.
    pub fn load(&self) -> AppConfig {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            match AppConfig::from_file(&path) {
                Ok(loaded) => {
                    info!(?path, pools = loaded.pools.len(), "Loaded configuration from file");
                    config = loaded;
                }
                Err(e) => {
                    warn!(?path, error = %e, "Failed to load config file, using defaults");
                }
            }
        }

        self.apply_env_overrides(&mut config);

        config
    }

    /// Strict variant of [`load`](Self::load): a present-but-invalid file
    /// is an error instead of a fallback.
    pub fn try_load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => AppConfig::from_file(&path)?,
            None => AppConfig::default(),
        };
        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        // Explicit path wins
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("ELASTIPOOL_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("ELASTIPOOL_SELECTOR") {
            config.selector = val;
        }
        if let Ok(val) = env::var("ELASTIPOOL_METRICS_ENABLED") {
            if let Ok(enabled) = val.parse() {
                config.metrics_enabled = enabled;
            }
        }
    }
}
