//! Data model shared across the CadLink core services.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::FingerprintId;

// ============================================================================
// Connection Settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Local,
    Remote,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Local => write!(f, "local"),
            ConnectionMode::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("remote URL is empty")]
    EmptyRemoteUrl,
    #[error("remote URL is invalid: {0}")]
    InvalidRemoteUrl(String),
    #[error("unsupported remote URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("local host is empty")]
    EmptyLocalHost,
    #[error("local port must be non-zero")]
    InvalidLocalPort,
}

/// Parameters for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub mode: ConnectionMode,
    #[serde(default)]
    pub remote_url: String,
    #[serde(default = "default_local_host")]
    pub local_host: String,
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    /// Skip ledger-based resumption and always create a new session.
    #[serde(default)]
    pub force_new_session: bool,
}

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

fn default_local_port() -> u16 {
    1999
}

impl ConnectionSettings {
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            mode: ConnectionMode::Remote,
            remote_url: url.into(),
            local_host: default_local_host(),
            local_port: default_local_port(),
            force_new_session: false,
        }
    }

    pub fn local(host: impl Into<String>, port: u16) -> Self {
        Self {
            mode: ConnectionMode::Local,
            remote_url: String::new(),
            local_host: host.into(),
            local_port: port,
            force_new_session: false,
        }
    }

    pub fn with_force_new_session(mut self, force: bool) -> Self {
        self.force_new_session = force;
        self
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        match self.mode {
            ConnectionMode::Remote => {
                let raw = self.remote_url.trim();
                if raw.is_empty() {
                    return Err(SettingsError::EmptyRemoteUrl);
                }
                let url = url::Url::parse(raw)
                    .map_err(|e| SettingsError::InvalidRemoteUrl(e.to_string()))?;
                match url.scheme() {
                    "http" | "https" | "ws" | "wss" => Ok(()),
                    other => Err(SettingsError::UnsupportedScheme(other.to_string())),
                }
            }
            ConnectionMode::Local => {
                if self.local_host.trim().is_empty() {
                    return Err(SettingsError::EmptyLocalHost);
                }
                if self.local_port == 0 {
                    return Err(SettingsError::InvalidLocalPort);
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// Connection Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ============================================================================
// License
// ============================================================================

/// A license registered to this machine.
///
/// Only usable while `machine_fingerprint` equals the current fingerprint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRecord {
    pub license_id: String,
    pub license_key: String,
    pub user_id: String,
    pub machine_fingerprint: FingerprintId,
    pub tier: String,
    pub max_concurrent_files: u32,
    pub registered_at: DateTime<Utc>,
    /// Authority the license was registered against.
    #[serde(default)]
    pub server_url: String,
}

impl fmt::Debug for LicenseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseRecord")
            .field("license_id", &self.license_id)
            .field("license_key", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("machine_fingerprint", &self.machine_fingerprint)
            .field("tier", &self.tier)
            .field("max_concurrent_files", &self.max_concurrent_files)
            .field("registered_at", &self.registered_at)
            .field("server_url", &self.server_url)
            .finish()
    }
}

// ============================================================================
// Session
// ============================================================================

/// A server-issued session bound to one file. In-memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub instance_id: String,
    pub license_id: String,
    pub file_path: PathBuf,
    /// Document GUID when the host provides one, otherwise the content hash.
    pub file_identity: String,
    pub file_size: u64,
    pub websocket_url: String,
}

// ============================================================================
// File Integrity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    Available,
    Missing,
    Modified,
    Moved,
    PathChanged,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Available => "Available",
            FileStatus::Missing => "Missing",
            FileStatus::Modified => "Modified",
            FileStatus::Moved => "Moved",
            FileStatus::PathChanged => "PathChanged",
        };
        f.write_str(s)
    }
}

/// Ledger entry linking a session to a local file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedFileRecord {
    pub session_id: String,
    #[serde(default)]
    pub document_guid: Option<String>,
    pub file_path: PathBuf,
    pub original_path: PathBuf,
    pub file_size: u64,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
    pub status: FileStatus,
}

/// A status transition detected by a ledger check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatusChange {
    pub session_id: String,
    pub file_path: PathBuf,
    pub old_status: FileStatus,
    pub new_status: FileStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationScenario {
    PerfectMatch,
    FilePathChanged,
    LegacyFile,
    FileReplacedNoGuid,
    FileReplaced,
    NoLinkFound,
    ValidationError,
}

/// Result of matching a candidate file against the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub scenario: ValidationScenario,
    pub session_id: Option<String>,
    pub requires_update: bool,
    pub requires_user_decision: bool,
    pub message: String,
}

impl ValidationOutcome {
    /// Whether the linked session can be resumed without asking anyone.
    pub fn is_auto_valid(&self) -> bool {
        matches!(
            self.scenario,
            ValidationScenario::PerfectMatch
                | ValidationScenario::FilePathChanged
                | ValidationScenario::LegacyFile
        )
    }
}
