//! Daemon configuration.
//!
//! A small TOML file; every field has a default so an empty file (or no
//! file at all) yields a runnable configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertwatchConfig {
    /// SQLite database holding the check list.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Cadence for re-checking apps stuck in a transient verdict.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// How long the user prompt may wait for an answer.
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_secs: u64,

    /// Connectivity poll cadence.
    #[serde(default = "default_net_poll")]
    pub net_poll_secs: u64,

    /// Helper command asked about revoked apps. When unset the prompt
    /// backend reports failure and revoked apps stay pending.
    #[serde(default)]
    pub prompt_command: Option<PathBuf>,

    /// Helper command that extracts signatures and performs the OCSP
    /// exchange. When unset nothing can ever be verified and freshly
    /// installed apps are dropped from the check list.
    #[serde(default)]
    pub verifier_command: Option<PathBuf>,

    /// Unix socket the platform integration writes package notices to.
    #[serde(default = "default_event_socket")]
    pub event_socket: PathBuf,
}

impl Default for CertwatchConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retry_interval_secs: default_retry_interval(),
            prompt_timeout_secs: default_prompt_timeout(),
            net_poll_secs: default_net_poll(),
            prompt_command: None,
            verifier_command: None,
            event_socket: default_event_socket(),
        }
    }
}

impl CertwatchConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, contains unknown keys, or
    /// carries a zero interval.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "retry_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.net_poll_secs == 0 {
            return Err(ConfigError::Validation(
                "net_poll_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/certwatch/checklist.db")
}

fn default_event_socket() -> PathBuf {
    PathBuf::from("/run/certwatch/events.sock")
}

const fn default_retry_interval() -> u64 {
    3600
}

const fn default_prompt_timeout() -> u64 {
    60
}

const fn default_net_poll() -> u64 {
    30
}
