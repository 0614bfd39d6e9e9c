//! Manager configuration via TOML
//!
//! A `TransactionManager` can be built from defaults or from a small TOML
//! document. Unknown keys are rejected so typos surface at load time.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default prefix for participant worker thread names.
pub const DEFAULT_WORKER_NAME_PREFIX: &str = "txnmgr-worker";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("failed to access config file '{}': {}", .path.display(), .source)]
    Io {
        /// File that was being accessed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Config text is not valid TOML for [`ManagerConfig`]
    #[error("failed to parse config{}: {}", source_suffix(.path), .message)]
    Parse {
        /// File the text came from, if it was loaded from disk
        path: Option<PathBuf>,
        /// Parser diagnostic
        message: String,
    },

    /// Config could not be rendered as TOML
    #[error("failed to serialize config: {0}")]
    Serialize(String),

    /// Config parsed but holds an unusable value
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn source_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" '{}'", path.display()),
        None => String::new(),
    }
}

/// Configuration for a `TransactionManager`.
///
/// # Example
///
/// ```toml
/// worker_name_prefix = "txnmgr-worker"
/// # max_participants = 64
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    /// Worker threads are named `{worker_name_prefix}-{index}`.
    #[serde(default = "default_worker_name_prefix")]
    pub worker_name_prefix: String,
    /// Upper bound on participants per episode. Unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_participants: Option<usize>,
}

fn default_worker_name_prefix() -> String {
    DEFAULT_WORKER_NAME_PREFIX.to_string()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_name_prefix: default_worker_name_prefix(),
            max_participants: None,
        }
    }
}

impl ManagerConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Transaction manager configuration
#
# Participant worker threads are named "<prefix>-<index>".
worker_name_prefix = "txnmgr-worker"

# Reject episodes with more participants than this (default: unlimited).
# Each participant occupies one worker thread for the whole episode.
# max_participants = 64
"#
    }

    /// Check that every field holds a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_name_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "worker_name_prefix must not be empty".to_string(),
            ));
        }
        if self.worker_name_prefix.contains('\0') {
            return Err(ConfigError::Invalid(
                "worker_name_prefix must not contain NUL bytes".to_string(),
            ));
        }
        if self.max_participants == Some(0) {
            return Err(ConfigError::Invalid(
                "max_participants must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, None)
    }

    fn parse(content: &str, path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: ManagerConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.map(Path::to_path_buf),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, Some(path))
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
