//! Daemon configuration: TOML file with serde defaults.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! a runnable configuration. CLI flags override file values in `main`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audit::DEFAULT_AUDIT_QUEUE_DEPTH;

/// Default database location, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "callvault.db";

/// Default Unix socket location.
pub const DEFAULT_SOCKET_PATH: &str = "callvault.sock";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed.
        path: PathBuf,
        /// Underlying parse error.
        source: toml::de::Error,
    },

    /// A field value is out of range.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Unix socket the server listens on.
    pub socket_path: PathBuf,
    /// Audit channel depth; events past this backlog are dropped.
    pub audit_queue_depth: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            audit_queue_depth: DEFAULT_AUDIT_QUEUE_DEPTH,
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed, or when a
    /// value fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.audit_queue_depth == 0 {
            return Err(ConfigError::Validation(
                "audit_queue_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
