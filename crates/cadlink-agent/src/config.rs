use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cadlink_core::{ConnectionMode, ConnectionSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// License authority and session broker.
    pub server_url: String,
    pub mode: ConnectionMode,

    // Local mode endpoint
    pub local_host: String,
    pub local_port: u16,

    /// Overrides the per-user storage directory.
    pub storage_dir: Option<PathBuf>,

    // Timeouts
    pub http_timeout_secs: u64,
    pub close_timeout_secs: u64,
    /// 0 disables periodic integrity checks.
    pub integrity_check_interval_secs: u64,

    // Logging
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            mode: ConnectionMode::Remote,
            local_host: "127.0.0.1".to_string(),
            local_port: 1999,
            storage_dir: None,
            http_timeout_secs: 30,
            close_timeout_secs: 5,
            integrity_check_interval_secs: 30,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl AgentConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {e}", path.display())))?;

        let config: AgentConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CADLINK_*` and `RUST_LOG` overrides from `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("CADLINK_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(mode) = lookup("CADLINK_MODE") {
            self.mode = match mode.to_ascii_lowercase().as_str() {
                "remote" => ConnectionMode::Remote,
                "local" => ConnectionMode::Local,
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "CADLINK_MODE must be 'remote' or 'local', got '{other}'"
                    )))
                }
            };
        }
        if let Some(host) = lookup("CADLINK_LOCAL_HOST") {
            self.local_host = host;
        }
        if let Some(port) = lookup("CADLINK_LOCAL_PORT") {
            self.local_port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("CADLINK_LOCAL_PORT is not a port: {port}"))
            })?;
        }
        if let Some(dir) = lookup("CADLINK_STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup("RUST_LOG") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.server_url.trim();
        if url.is_empty() {
            return Err(ConfigError::ValidationError(
                "server_url must not be empty".to_string(),
            ));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(
                "server_url must be an http:// or https:// URL".to_string(),
            ));
        }
        if self.local_port == 0 {
            return Err(ConfigError::ValidationError(
                "local_port must be non-zero".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 || self.close_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn integrity_check_interval(&self) -> Option<Duration> {
        (self.integrity_check_interval_secs > 0)
            .then(|| Duration::from_secs(self.integrity_check_interval_secs))
    }

    /// Settings for a connection attempt in the configured mode.
    pub fn connection_settings(&self) -> ConnectionSettings {
        match self.mode {
            ConnectionMode::Remote => ConnectionSettings::remote(self.server_url.clone()),
            ConnectionMode::Local => ConnectionSettings::local(self.local_host.clone(), self.local_port),
        }
    }
}
