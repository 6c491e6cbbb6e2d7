//! Configuration management for docguard.

use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::error::{DocGuardError, Result};
use crate::ratelimit::LimitConfigUpdate;

/// Settings file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuardSettings {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Limits merged into the limiter at startup
    #[serde(default)]
    pub limits: LimitConfigUpdate,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GuardSettings {
    /// Load settings from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading settings");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| DocGuardError::Config(format!("Failed to parse settings: {}", e)))
    }
}
