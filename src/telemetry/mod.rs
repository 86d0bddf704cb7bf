//! Logging setup
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and a fmt
//! layer writing to stderr:
//!
//! ```text
//! Registry
//!   ├── EnvFilter (RUST_LOG, else LoggingConfig::level)
//!   └── Fmt Layer (JSON lines or human-readable)
//! ```
//!
//! Stdout stays free for command output.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Telemetry errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),

    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}

/// Filter from `RUST_LOG`, falling back to `level`
pub fn env_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|_| TelemetryError::InvalidFilter(level.to_string())),
    }
}

/// Install the global subscriber
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(&config.level)?;

    if config.json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .with_writer(std::io::stderr);

        let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_writer(std::io::stderr);

        let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;
    }

    Ok(())
}
