//! CadLink Core - session lifecycle and secure connection subsystem.
//!
//! This crate implements:
//! - Encrypted key/value storage for license and ledger data
//! - Machine fingerprinting
//! - License registration and server-authoritative validation
//! - The file integrity ledger and its reconciliation algorithm
//! - The remote session client (handshake, heartbeat, command dispatch)
//! - The connection manager enforcing a single active connection

#![forbid(unsafe_code)]

// Leaf services
pub mod secure_store;
pub mod fingerprint;

// Domain services
pub mod license;
pub mod ledger;

// Connection stack
pub mod backend;
pub mod protocol;
pub mod router;
pub mod document;
pub mod session_client;
pub mod connection;

// Supporting modules
pub mod errors;
pub mod types;
pub mod harness;

pub use connection::{Connection, ConnectionEvent, ConnectionFactory, ConnectionManager, DefaultConnectionFactory};
pub use document::{HostDocument, StaticDocument};
pub use fingerprint::{FingerprintId, FingerprintSource, MachineFingerprint};
pub use ledger::FileIntegrityLedger;
pub use license::LicenseAuthority;
pub use router::{CommandRouter, ToolRegistry};
pub use secure_store::SecureStore;
pub use session_client::{SessionClient, SessionClientConfig, StopMode};
pub use types::*;
