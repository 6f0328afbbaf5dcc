//! Configuration for backend connections
//!
//! All knobs are immutable once a connection is constructed; changing them
//! requires building new connections.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Knobs shared by every backend connection built from one pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Timeout for establishing the TCP connection, in milliseconds.
    pub dial_timeout_ms: u64,
    /// Timeout for a single read from the backend, in milliseconds.
    pub recv_timeout_ms: u64,
    /// Timeout for a single write to the backend, in milliseconds.
    pub send_timeout_ms: u64,
    /// Socket receive buffer size in bytes.
    pub recv_bufsize: usize,
    /// Socket send buffer size in bytes.
    pub send_bufsize: usize,
    /// TCP keep-alive probe period in seconds.
    pub keepalive_period_sec: u64,
    /// Maximum number of requests in flight on one connection.
    pub max_pipeline: usize,
    /// Password sent via AUTH during the handshake, if any.
    pub auth: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: 5000,
            recv_timeout_ms: 30_000,
            send_timeout_ms: 30_000,
            recv_bufsize: 128 * 1024,
            send_bufsize: 128 * 1024,
            keepalive_period_sec: 75,
            max_pipeline: 1024,
            auth: None,
        }
    }
}

impl BackendConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: BackendConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dial_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dial_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.recv_timeout_ms == 0 || self.send_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "recv_timeout_ms and send_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.recv_bufsize == 0 || self.send_bufsize == 0 {
            return Err(ConfigError::ValidationError(
                "socket buffer sizes must be greater than 0".to_string(),
            ));
        }

        if self.max_pipeline == 0 {
            return Err(ConfigError::ValidationError(
                "max_pipeline must be greater than 0".to_string(),
            ));
        }

        if let Some(auth) = &self.auth {
            if auth.is_empty() {
                return Err(ConfigError::ValidationError(
                    "auth must not be empty when set".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn keepalive_period(&self) -> Duration {
        Duration::from_secs(self.keepalive_period_sec)
    }
}
