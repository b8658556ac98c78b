//! Configuration loading for slowpoke-server.
//!
//! Configuration is loaded from a TOML file (default: `slowpoke.toml`).
//!
//! ```toml
//! [server]
//! host = "localhost"
//! port = 8000
//! root = "./public"
//!
//! [behavior]
//! kind = "delay_before_sending_upon_acceptance"
//! delay_secs = 0.5
//! chunk_len = 512
//! ```

use serde::Deserialize;
use slowpoke_core::{Behavior, DEFAULT_CHUNK_LEN};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for slowpoke-server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Behavior to install (optional; the CLI can supply one instead).
    pub behavior: Option<BehaviorConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host name to bind to (default: localhost).
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to (default: 8000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory whose files are served (default: current directory).
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Seconds to wait for a client's request before giving up (default: 10).
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

/// Behavior configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BehaviorConfig {
    /// Which behavior to install.
    pub kind: BehaviorKind,
    /// Delay in seconds (default: 1). Ignored by `close_upon_acceptance`.
    #[serde(default = "default_delay_secs")]
    pub delay_secs: f64,
    /// Chunk length in bytes (default: 1024). Only used by the chopping
    /// behaviors.
    #[serde(default = "default_chunk_len")]
    pub chunk_len: usize,
}

/// Behavior names accepted in the `kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    /// `close_upon_acceptance`
    CloseUponAcceptance,
    /// `delay_before_sending_once`
    DelayBeforeSendingOnce,
    /// `delay_before_sending`
    DelayBeforeSending,
    /// `delay_before_sending_upon_acceptance_once`
    DelayBeforeSendingUponAcceptanceOnce,
    /// `delay_before_sending_upon_acceptance`
    DelayBeforeSendingUponAcceptance,
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_read_timeout_secs() -> u64 {
    10
}

fn default_delay_secs() -> f64 {
    1.0
}

fn default_chunk_len() -> usize {
    DEFAULT_CHUNK_LEN.get()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            root: default_root(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// `host:port`, as passed to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Read timeout for accepted connections.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Check values that parse but cannot be served with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty host or a zero read
    /// timeout (sockets reject a zero timeout).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "server.host must not be empty".to_string(),
            });
        }
        if self.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "server.read_timeout_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl BehaviorConfig {
    /// Build the behavior this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a negative, non-finite or
    /// overflowing delay, or a zero chunk length.
    pub fn to_behavior(&self) -> Result<Behavior, ConfigError> {
        let delay = parse_delay(self.delay_secs)?;
        let chunk_len = NonZeroUsize::new(self.chunk_len).ok_or_else(|| ConfigError::Invalid {
            reason: "chunk_len must be at least 1".to_string(),
        })?;

        Ok(match self.kind {
            BehaviorKind::CloseUponAcceptance => Behavior::CloseUponAcceptance,
            BehaviorKind::DelayBeforeSendingOnce => Behavior::DelayBeforeSendingOnce { delay },
            BehaviorKind::DelayBeforeSending => Behavior::DelayBeforeSending { delay, chunk_len },
            BehaviorKind::DelayBeforeSendingUponAcceptanceOnce => {
                Behavior::DelayBeforeSendingUponAcceptanceOnce { delay }
            }
            BehaviorKind::DelayBeforeSendingUponAcceptance => {
                Behavior::DelayBeforeSendingUponAcceptance { delay, chunk_len }
            }
        })
    }
}

/// Convert a delay in seconds, rejecting values that are not a valid duration.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if `secs` is negative, NaN, infinite or
/// too large.
pub fn parse_delay(secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Invalid {
        reason: format!("delay {secs} is not a valid number of seconds: {e}"),
    })
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that parse but make no sense.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(behavior) = &self.behavior {
            behavior.to_behavior()?;
        }
        Ok(())
    }

    /// The configured behavior, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the behavior parameters are invalid.
    pub fn behavior(&self) -> Result<Option<Behavior>, ConfigError> {
        self.behavior
            .as_ref()
            .map(BehaviorConfig::to_behavior)
            .transpose()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value parsed but is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}
