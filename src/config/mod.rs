//! Configuration module
//!
//! YAML configuration for the uploader binary, with `${VAR}` and
//! `${VAR:-default}` environment expansion applied before parsing.
//!
//! ```yaml
//! upload:
//!   part_size: 10485760
//!   concurrency: 8
//! provider:
//!   type: local
//!   root: /var/lib/uploadr
//!   base_url: https://files.example.com
//!   signing_secret: ${UPLOADR_SIGNING_SECRET}
//! logging:
//!   level: debug
//!   json: false
//! checkpoint_dir: /var/lib/uploadr/checkpoints
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::provider::DEFAULT_MULTIPART_THRESHOLD;
use crate::upload::partition::{DEFAULT_MIN_PART_SIZE, DEFAULT_PART_COUNT_LIMIT, DEFAULT_PART_SIZE};
use crate::upload::worker_pool::DEFAULT_CONCURRENCY;

mod loader;

pub use loader::ConfigLoader;

/// Validate that a base URL uses a scheme the providers can serve
fn is_valid_base_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://") || url.starts_with("file://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upload: UploadConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Where the CLI keeps resumable upload checkpoints
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upload.validate()?;

        match &self.provider {
            ProviderConfig::Local(local) => {
                if local.root.as_os_str().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "Local provider root cannot be empty".into(),
                    ));
                }
                if !is_valid_base_url(&local.base_url) {
                    return Err(ConfigError::ValidationError(format!(
                        "Invalid base_url '{}': must start with http://, https:// or file://",
                        local.base_url
                    )));
                }
                if local.part_count_limit == 0 {
                    return Err(ConfigError::ValidationError(
                        "Provider part_count_limit must be greater than zero".into(),
                    ));
                }
                if matches!(&local.signing_secret, Some(secret) if secret.trim().is_empty()) {
                    return Err(ConfigError::ValidationError(
                        "signing_secret cannot be empty when set".into(),
                    ));
                }
            }
        }

        match self.logging.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level '{}': must be trace, debug, info, warn or error",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Upload engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Files at or above this size use multipart upload
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Preferred part size
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    #[serde(default = "default_min_part_size")]
    pub min_part_size: u64,

    /// Optional cap below the provider's own part count limit
    #[serde(default)]
    pub part_count_limit: Option<u32>,

    /// Concurrent part uploads
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Spool directory for stream sources
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: default_multipart_threshold(),
            part_size: default_part_size(),
            min_part_size: default_min_part_size(),
            part_count_limit: None,
            concurrency: default_concurrency(),
            spool_dir: None,
        }
    }
}

impl UploadConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "Upload concurrency must be greater than zero".into(),
            ));
        }
        if self.min_part_size == 0 {
            return Err(ConfigError::ValidationError(
                "min_part_size must be greater than zero".into(),
            ));
        }
        if self.part_size < self.min_part_size {
            return Err(ConfigError::ValidationError(format!(
                "part_size ({}) must be at least min_part_size ({})",
                self.part_size, self.min_part_size
            )));
        }
        if self.multipart_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "multipart_threshold must be greater than zero".into(),
            ));
        }
        if self.part_count_limit == Some(0) {
            return Err(ConfigError::ValidationError(
                "part_count_limit must be greater than zero when set".into(),
            ));
        }
        Ok(())
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Directory-backed storage
    Local(LocalProviderConfig),
}

/// Local filesystem provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalProviderConfig {
    pub root: PathBuf,

    /// Prefix of the URLs handed out for stored objects
    pub base_url: String,

    /// HMAC key for presigned URLs; random per process when unset
    #[serde(default)]
    pub signing_secret: Option<String>,

    #[serde(default = "default_part_count_limit")]
    pub part_count_limit: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default = "default_json")]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_json(),
        }
    }
}

fn default_multipart_threshold() -> u64 {
    DEFAULT_MULTIPART_THRESHOLD
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_min_part_size() -> u64 {
    DEFAULT_MIN_PART_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_part_count_limit() -> u32 {
    DEFAULT_PART_COUNT_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json() -> bool {
    true
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".uploadr/checkpoints")
}
