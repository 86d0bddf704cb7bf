//! Configuration loader with environment variable expansion

use lazy_static::lazy_static;
use regex_lite::Regex;
use std::path::Path;

use super::{Config, ConfigError};

lazy_static! {
    // ${VAR} or ${VAR:-default}
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var pattern");
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse and validate configuration from YAML text
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Expand `${VAR}` and `${VAR:-default}`.
    ///
    /// Unset variables without a default keep their placeholder.
    pub fn expand_env_vars(content: &str) -> String {
        ENV_VAR
            .replace_all(content, |caps: &regex_lite::Captures<'_>| {
                match std::env::var(&caps[1]) {
                    Ok(value) => value,
                    Err(_) => match caps.get(2) {
                        Some(default) => default.as_str().to_string(),
                        None => caps[0].to_string(),
                    },
                }
            })
            .into_owned()
    }
}
