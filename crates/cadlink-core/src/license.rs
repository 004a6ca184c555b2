//! License registration and validation against the remote authority.
//!
//! The server owns license validity. The locally stored [`LicenseRecord`]
//! is a cache pinned to this machine's fingerprint and is purged whenever
//! the server (or a fingerprint mismatch) proves it void. Transport
//! failures leave the cache alone.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::errors::{Classify, ErrorKind};
use crate::fingerprint::FingerprintSource;
use crate::secure_store::{SecureStore, StoreError, LICENSE_KEY};
use crate::types::LicenseRecord;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const NO_LICENSE_MESSAGE: &str = "No license found. Please register a license first.";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone)]
pub enum LicenseError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("http client error: {0}")]
    Client(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("invalid server response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Rejected(String),

    #[error("license is bound to a different machine")]
    FingerprintMismatch,

    #[error("no license found")]
    NotFound,
}

impl Classify for LicenseError {
    fn kind(&self) -> ErrorKind {
        match self {
            LicenseError::Store(_) => ErrorKind::Storage,
            LicenseError::Client(_)
            | LicenseError::Http(_)
            | LicenseError::Timeout
            | LicenseError::Status(_)
            | LicenseError::InvalidResponse(_) => ErrorKind::Transport,
            LicenseError::Rejected(_) | LicenseError::FingerprintMismatch => {
                ErrorKind::AuthorityRejection
            }
            LicenseError::NotFound => ErrorKind::Configuration,
        }
    }
}

impl From<reqwest::Error> for LicenseError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LicenseError::Timeout
        } else if e.is_decode() {
            LicenseError::InvalidResponse(e.to_string())
        } else {
            LicenseError::Http(e.to_string())
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseRegistrationResult {
    pub success: bool,
    pub license_id: Option<String>,
    pub tier: Option<String>,
    pub max_concurrent_files: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseValidationResult {
    pub is_valid: bool,
    pub license_id: Option<String>,
    pub user_id: Option<String>,
    pub tier: Option<String>,
    pub max_concurrent_files: Option<u32>,
    pub message: String,
    /// The local record was deleted as part of this call.
    pub purged: bool,
    /// Failure classification; `None` when valid.
    pub kind: Option<ErrorKind>,
}

impl LicenseValidationResult {
    fn valid(record: &LicenseRecord, message: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            license_id: Some(record.license_id.clone()),
            user_id: Some(record.user_id.clone()),
            tier: Some(record.tier.clone()),
            max_concurrent_files: Some(record.max_concurrent_files),
            message: message.into(),
            purged: false,
            kind: None,
        }
    }

    fn invalid(error: &LicenseError, record: Option<&LicenseRecord>, purged: bool) -> Self {
        let message = match error {
            LicenseError::NotFound => NO_LICENSE_MESSAGE.to_string(),
            LicenseError::FingerprintMismatch => {
                "License was registered on a different machine and has been removed.".to_string()
            }
            LicenseError::Rejected(msg) => format!("License is no longer valid: {msg}"),
            other => format!("Could not validate license: {other}"),
        };
        Self {
            is_valid: false,
            license_id: record.map(|r| r.license_id.clone()),
            user_id: record.map(|r| r.user_id.clone()),
            tier: None,
            max_concurrent_files: None,
            message,
            purged,
            kind: Some(error.kind()),
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    license_key: &'a str,
    user_id: &'a str,
    machine_fingerprint: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    license_id: String,
    #[serde(default = "default_tier")]
    tier: String,
    #[serde(default = "default_max_files")]
    max_concurrent_files: u32,
}

fn default_tier() -> String {
    "standard".to_string()
}

fn default_max_files() -> u32 {
    1
}

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    license_id: &'a str,
    license_key: &'a str,
    machine_fingerprint: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    tier: Option<String>,
    #[serde(default)]
    max_concurrent_files: Option<u32>,
}

// ============================================================================
// License Authority
// ============================================================================

pub struct LicenseAuthority {
    store: SecureStore,
    fingerprint: Arc<dyn FingerprintSource>,
    http: reqwest::Client,
}

impl LicenseAuthority {
    pub fn new(
        store: SecureStore,
        fingerprint: Arc<dyn FingerprintSource>,
    ) -> Result<Self, LicenseError> {
        Self::with_timeout(store, fingerprint, DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(
        store: SecureStore,
        fingerprint: Arc<dyn FingerprintSource>,
        timeout: Duration,
    ) -> Result<Self, LicenseError> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| LicenseError::Client(e.to_string()))?;
        Ok(Self {
            store,
            fingerprint,
            http,
        })
    }

    /// Register `license_key` for `user_id` on this machine.
    ///
    /// Never fails; problems are reported through the result message.
    pub async fn register(
        &self,
        license_key: &str,
        user_id: &str,
        server_url: &str,
    ) -> LicenseRegistrationResult {
        match self.try_register(license_key, user_id, server_url).await {
            Ok(record) => {
                info!(
                    license_id = %record.license_id,
                    fingerprint = %record.machine_fingerprint,
                    "license registered"
                );
                LicenseRegistrationResult {
                    success: true,
                    message: format!("License {} registered to this machine.", record.license_id),
                    license_id: Some(record.license_id),
                    tier: Some(record.tier),
                    max_concurrent_files: Some(record.max_concurrent_files),
                }
            }
            Err(e) => {
                warn!(error = %e, "license registration failed");
                LicenseRegistrationResult {
                    success: false,
                    license_id: None,
                    tier: None,
                    max_concurrent_files: None,
                    message: format!("License registration failed: {e}"),
                }
            }
        }
    }

    async fn try_register(
        &self,
        license_key: &str,
        user_id: &str,
        server_url: &str,
    ) -> Result<LicenseRecord, LicenseError> {
        let fingerprint = self.fingerprint.current();
        let response = self
            .http
            .post(endpoint(server_url, "license/register"))
            .json(&RegisterRequest {
                license_key,
                user_id,
                machine_fingerprint: fingerprint.as_str(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LicenseError::Status(response.status().as_u16()));
        }
        let body: RegisterResponse = response.json().await?;

        let record = LicenseRecord {
            license_id: body.license_id,
            license_key: license_key.to_string(),
            user_id: user_id.to_string(),
            machine_fingerprint: fingerprint,
            tier: body.tier,
            max_concurrent_files: body.max_concurrent_files,
            registered_at: Utc::now(),
            server_url: server_url.trim_end_matches('/').to_string(),
        };
        self.store.store(LICENSE_KEY, &record)?;
        Ok(record)
    }

    /// Check the stored license against this machine and the server.
    pub async fn validate(&self) -> LicenseValidationResult {
        let Some(record) = self.load_record() else {
            return LicenseValidationResult::invalid(&LicenseError::NotFound, None, false);
        };

        if record.machine_fingerprint != self.fingerprint.current() {
            warn!(
                license_id = %record.license_id,
                stored = %record.machine_fingerprint,
                "license fingerprint mismatch, purging"
            );
            let purged = self.purge();
            return LicenseValidationResult::invalid(
                &LicenseError::FingerprintMismatch,
                Some(&record),
                purged,
            );
        }

        match self.check_with_server(&record).await {
            Ok(body) => {
                debug!(license_id = %record.license_id, "license validated");
                let mut result = LicenseValidationResult::valid(
                    &record,
                    body.message.unwrap_or_else(|| "License is valid.".to_string()),
                );
                if body.tier.is_some() {
                    result.tier = body.tier;
                }
                if body.max_concurrent_files.is_some() {
                    result.max_concurrent_files = body.max_concurrent_files;
                }
                result
            }
            Err(e) if e.kind().is_authoritative() => {
                warn!(license_id = %record.license_id, error = %e, "server rejected license, purging");
                let purged = self.purge();
                LicenseValidationResult::invalid(&e, Some(&record), purged)
            }
            Err(e) => {
                warn!(license_id = %record.license_id, error = %e, "license validation inconclusive");
                LicenseValidationResult::invalid(&e, Some(&record), false)
            }
        }
    }

    async fn check_with_server(
        &self,
        record: &LicenseRecord,
    ) -> Result<ValidateResponse, LicenseError> {
        if record.server_url.is_empty() {
            return Err(LicenseError::InvalidResponse(
                "license record has no server URL".to_string(),
            ));
        }
        let response = self
            .http
            .post(endpoint(&record.server_url, "license/validate"))
            .json(&ValidateRequest {
                license_id: &record.license_id,
                license_key: &record.license_key,
                machine_fingerprint: record.machine_fingerprint.as_str(),
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(LicenseError::Rejected("license not found on server".to_string()))
            }
            StatusCode::FORBIDDEN => {
                return Err(LicenseError::Rejected("license revoked or forbidden".to_string()))
            }
            s if !s.is_success() => return Err(LicenseError::Status(s.as_u16())),
            _ => {}
        }

        let body: ValidateResponse = response.json().await?;
        if body.status != "valid" {
            let reason = body
                .message
                .clone()
                .unwrap_or_else(|| format!("status {}", body.status));
            return Err(LicenseError::Rejected(reason));
        }
        Ok(body)
    }

    /// Offline check: a record exists and belongs to this machine.
    pub fn status(&self) -> LicenseValidationResult {
        let Some(record) = self.load_record() else {
            return LicenseValidationResult::invalid(&LicenseError::NotFound, None, false);
        };
        if record.machine_fingerprint != self.fingerprint.current() {
            let purged = self.purge();
            return LicenseValidationResult::invalid(
                &LicenseError::FingerprintMismatch,
                Some(&record),
                purged,
            );
        }
        LicenseValidationResult::valid(&record, "License registered on this machine.")
    }

    /// Remove the stored license unconditionally.
    pub fn clear(&self) -> Result<(), LicenseError> {
        self.store.delete(LICENSE_KEY)?;
        info!("license record cleared");
        Ok(())
    }

    pub fn load_record(&self) -> Option<LicenseRecord> {
        self.store.retrieve(LICENSE_KEY)
    }

    pub fn fingerprint(&self) -> &Arc<dyn FingerprintSource> {
        &self.fingerprint
    }

    fn purge(&self) -> bool {
        match self.store.delete(LICENSE_KEY) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to purge license record");
                false
            }
        }
    }
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}
