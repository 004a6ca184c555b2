//! Encrypted key/value storage for small JSON documents.
//!
//! Each key maps to one file `<dir>/<key>.dat`. Values are serialized to
//! JSON, sealed by the platform [`Protector`] and written whole. Reads never
//! fail loudly: a missing, truncated or undecryptable file is reported as
//! absent so callers can fall back to a fresh state.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use cadlink_crypto::sealed::{self, MachineKey};

use crate::errors::{Classify, ErrorKind};
use crate::fingerprint;

/// Key holding the registered [`crate::types::LicenseRecord`].
pub const LICENSE_KEY: &str = "license_registration";
/// Key holding the list of [`crate::types::LinkedFileRecord`].
pub const LINKED_FILES_KEY: &str = "linked_files";

const FILE_EXTENSION: &str = "dat";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("protection failed: {0}")]
    Protection(String),

    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("no storage directory available on this platform")]
    NoStorageDir,
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Storage
    }
}

// ============================================================================
// Protectors
// ============================================================================

/// Encrypts and decrypts stored blobs.
pub trait Protector: Send + Sync {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError>;
    fn unprotect(&self, ciphertext: &[u8]) -> Result<Vec<u8>, StoreError>;
    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// AES-256-GCM with a key derived from stable machine attributes.
pub struct MachineKeyProtector {
    key: MachineKey,
}

impl MachineKeyProtector {
    /// Derive the key from this machine's hostname, OS and CPU count.
    pub fn for_this_machine() -> Self {
        Self::from_attributes(&fingerprint::stable_attributes())
    }

    pub fn from_attributes<S: AsRef<str>>(attributes: &[S]) -> Self {
        Self {
            key: MachineKey::derive(attributes),
        }
    }
}

impl Protector for MachineKeyProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        sealed::seal(&self.key, plaintext).map_err(|e| StoreError::Protection(e.to_string()))
    }

    fn unprotect(&self, ciphertext: &[u8]) -> Result<Vec<u8>, StoreError> {
        sealed::open(&self.key, ciphertext).map_err(|e| StoreError::Protection(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "machine-key"
    }
}

/// Windows DPAPI scoped to the current user.
#[cfg(windows)]
pub struct DpapiUserProtector {
    inner: cadlink_platform_win::DpapiProtector,
}

#[cfg(windows)]
impl DpapiUserProtector {
    pub fn new() -> Self {
        Self {
            inner: cadlink_platform_win::DpapiProtector::new(
                cadlink_platform_win::DpapiScope::CurrentUser,
            ),
        }
    }
}

#[cfg(windows)]
impl Default for DpapiUserProtector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
impl Protector for DpapiUserProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.inner
            .protect(plaintext)
            .map_err(|e| StoreError::Protection(e.to_string()))
    }

    fn unprotect(&self, ciphertext: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.inner
            .unprotect(ciphertext)
            .map(|bytes| bytes.as_bytes().to_vec())
            .map_err(|e| StoreError::Protection(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "dpapi-user"
    }
}

/// The protector appropriate for the running OS.
pub fn platform_protector() -> Arc<dyn Protector> {
    #[cfg(windows)]
    {
        Arc::new(DpapiUserProtector::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(MachineKeyProtector::for_this_machine())
    }
}

// ============================================================================
// Secure Store
// ============================================================================

/// Durable encrypted storage, one file per key.
#[derive(Clone)]
pub struct SecureStore {
    dir: PathBuf,
    protector: Arc<dyn Protector>,
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("dir", &self.dir)
            .field("protector", &self.protector.name())
            .finish()
    }
}

impl SecureStore {
    pub fn new(dir: impl Into<PathBuf>, protector: Arc<dyn Protector>) -> Self {
        Self {
            dir: dir.into(),
            protector,
        }
    }

    /// Store in the per-user application directory with the platform protector.
    pub fn open_default() -> Result<Self, StoreError> {
        let dir = default_dir().ok_or(StoreError::NoStorageDir)?;
        Ok(Self::new(dir, platform_protector()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialize, encrypt and write `value` under `key`.
    pub fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let json =
            serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let blob = self.protector.protect(&json)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, blob)?;
        debug!(key, protector = self.protector.name(), "stored value");
        Ok(())
    }

    /// Read the value under `key`; absent when missing or unreadable.
    pub fn retrieve<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = match self.path_for(key) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "rejected storage key");
                return None;
            }
        };
        let blob = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(key, error = %e, "failed to read stored value");
                return None;
            }
        };

        let plaintext = match self.protector.unprotect(&blob) {
            Ok(p) => p,
            Err(e) => match legacy_decode(&blob) {
                Some(p) => {
                    debug!(key, "read value through legacy base64 fallback");
                    p
                }
                None => {
                    warn!(key, error = %e, "stored value is unreadable");
                    return None;
                }
            },
        };

        match serde_json::from_slice(&plaintext) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "stored value is corrupt");
                None
            }
        }
    }

    /// Remove the value under `key`. Missing keys are not an error.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key, "deleted stored value");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.{FILE_EXTENSION}")))
    }
}

/// Per-user configuration directory for CadLink.
///
/// Roaming AppData on Windows, Application Support on macOS, the XDG config
/// directory elsewhere.
pub fn default_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "cadlink", "CadLink").map(|d| d.config_dir().to_path_buf())
}

/// Older builds wrote plain base64 JSON.
fn legacy_decode(blob: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(blob).ok()?;
    BASE64.decode(text.trim()).ok()
}
