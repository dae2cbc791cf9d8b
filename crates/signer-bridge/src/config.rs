//! Signing bridge configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::validator::{DEFAULT_FRESHNESS_WINDOW_MS, DEFAULT_MAX_REQUEST_BYTES};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine {0} directory")]
    NoDirectory(&'static str),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Signing bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Accepted clock skew of request timestamps, either direction
    pub freshness_window_ms: u64,
    /// Largest accepted request body
    pub max_request_bytes: usize,
    /// How long a prompt may stay unanswered before the request is denied
    pub approval_timeout_ms: u64,
    /// How long finished outcomes are replayed to duplicate requests
    pub completed_cache_ttl_ms: u64,
    /// Upper bound on replayable outcomes kept in memory
    pub completed_cache_capacity: usize,
    /// Data directory for permissions.db and audit.jsonl
    pub data_dir: Option<PathBuf>,
    /// Default tracing filter; `RUST_LOG` overrides it
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            freshness_window_ms: DEFAULT_FRESHNESS_WINDOW_MS as u64,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            approval_timeout_ms: 60_000,
            completed_cache_ttl_ms: 30_000,
            completed_cache_capacity: 1_024,
            data_dir: None,
            log_filter: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl BridgeConfig {
    /// Load config from file or create default
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path()?)
    }

    /// Load config from `path`, falling back to defaults if it does not exist
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::config_path()?)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;
        Ok(config_dir.join("signer-bridge").join("config.toml"))
    }

    /// Get data directory path
    pub fn data_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref path) = self.data_dir {
            Ok(path.clone())
        } else {
            let data_dir = dirs::data_dir().ok_or(ConfigError::NoDirectory("data"))?;
            Ok(data_dir.join("signer-bridge"))
        }
    }

    pub fn permissions_db_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_path()?.join("permissions.db"))
    }

    pub fn audit_log_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_path()?.join("audit.jsonl"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.freshness_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "freshness_window_ms must be greater than zero".into(),
            ));
        }
        if self.freshness_window_ms > i64::MAX as u64 {
            return Err(ConfigError::Invalid("freshness_window_ms is too large".into()));
        }
        if self.max_request_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_request_bytes must be greater than zero".into(),
            ));
        }
        if self.approval_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "approval_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.approval_timeout_ms)
    }

    pub fn completed_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.completed_cache_ttl_ms)
    }

    pub fn with_freshness_window_ms(mut self, ms: u64) -> Self {
        self.freshness_window_ms = ms;
        self
    }

    pub fn with_max_request_bytes(mut self, bytes: usize) -> Self {
        self.max_request_bytes = bytes;
        self
    }

    pub fn with_approval_timeout_ms(mut self, ms: u64) -> Self {
        self.approval_timeout_ms = ms;
        self
    }

    pub fn with_completed_cache_ttl_ms(mut self, ms: u64) -> Self {
        self.completed_cache_ttl_ms = ms;
        self
    }

    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(path.into());
        self
    }
}
