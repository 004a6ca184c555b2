//! Error classification for CadLink core.
//!
//! Every module owns its own `thiserror` enum. This module defines the
//! coarse [`ErrorKind`] taxonomy the services agree on and a unified
//! [`CoreError`] for callers that juggle several subsystems at once.

use thiserror::Error;

use crate::backend::BackendError;
use crate::connection::ConnectionError;
use crate::ledger::LedgerError;
use crate::license::LicenseError;
use crate::protocol::ProtocolError;
use crate::secure_store::StoreError;
use crate::session_client::SessionError;
use crate::types::SettingsError;

// ============================================================================
// Error Kinds
// ============================================================================

/// Coarse classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network unreachable, timeout, malformed response, socket failure.
    Transport,
    /// The license authority explicitly rejected the license.
    AuthorityRejection,
    /// The ledger match needs a decision before proceeding.
    IntegrityConflict,
    /// Local secure storage could not be read or written.
    Storage,
    /// Settings or configuration are invalid.
    Configuration,
}

impl ErrorKind {
    /// Transport failures may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transport)
    }

    /// Authoritative failures purge the license record.
    pub fn is_authoritative(self) -> bool {
        matches!(self, ErrorKind::AuthorityRejection)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::AuthorityRejection => "authority rejection",
            ErrorKind::IntegrityConflict => "integrity conflict",
            ErrorKind::Storage => "storage",
            ErrorKind::Configuration => "configuration",
        };
        f.write_str(s)
    }
}

/// Implemented by every module error so callers can branch on the kind.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

// ============================================================================
// Unified Error
// ============================================================================

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    License(#[from] LicenseError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl Classify for CoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Store(e) => e.kind(),
            CoreError::License(e) => e.kind(),
            CoreError::Ledger(e) => e.kind(),
            CoreError::Backend(e) => e.kind(),
            CoreError::Protocol(e) => e.kind(),
            CoreError::Session(e) => e.kind(),
            CoreError::Settings(_) => ErrorKind::Configuration,
            CoreError::Connection(e) => e.kind(),
        }
    }
}

impl CoreError {
    /// Message suitable for showing to the user.
    ///
    /// Transport and storage details stay in the logs; the user sees a
    /// short description of what category of thing went wrong.
    pub fn user_message(&self) -> String {
        user_message(self.kind(), &self.to_string())
    }
}

/// Build a user-facing message for an error of the given kind.
pub fn user_message(kind: ErrorKind, detail: &str) -> String {
    match kind {
        ErrorKind::Transport => "Could not reach the CadLink server. Check your network connection.".to_string(),
        ErrorKind::AuthorityRejection => format!("License rejected: {}", detail),
        ErrorKind::IntegrityConflict => detail.to_string(),
        ErrorKind::Storage => "Local CadLink storage is unavailable.".to_string(),
        ErrorKind::Configuration => format!("Invalid configuration: {}", detail),
    }
}

impl Classify for SettingsError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}
