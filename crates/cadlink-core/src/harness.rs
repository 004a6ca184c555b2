//! Test helpers shared by unit and integration tests.
//!
//! Nothing here touches the real machine identity or the per-user storage
//! directory, so tests can run side by side.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::fingerprint::{FingerprintId, FingerprintSource};
use crate::router::{ToolError, ToolHandler};
use crate::secure_store::{MachineKeyProtector, SecureStore};

/// A fingerprint source whose value tests can change.
pub struct FixedFingerprint {
    current: Mutex<FingerprintId>,
}

impl FixedFingerprint {
    /// Fingerprint built from a repeated hex byte, e.g. `0xab`.
    pub fn new(byte: u8) -> Self {
        Self {
            current: Mutex::new(fingerprint_of(byte)),
        }
    }

    /// Simulate the license file being moved to another machine.
    pub fn set(&self, byte: u8) {
        *self.current.lock() = fingerprint_of(byte);
    }
}

impl FingerprintSource for FixedFingerprint {
    fn current(&self) -> FingerprintId {
        self.current.lock().clone()
    }
}

/// A deterministic fingerprint for tests.
pub fn fingerprint_of(byte: u8) -> FingerprintId {
    FingerprintId::from_hex(hex::encode([byte; 32])).unwrap_or_else(|_| unreachable!())
}

/// Secure store rooted at `dir` with a fixed machine key.
pub fn test_store(dir: &Path) -> SecureStore {
    SecureStore::new(
        dir,
        Arc::new(MachineKeyProtector::from_attributes(&["test-host", "test-os", "4"])),
    )
}

/// Tool that sleeps for `delay` then echoes its params under `"echo"`.
pub struct SleepEchoTool {
    pub delay: Duration,
}

#[async_trait]
impl ToolHandler for SleepEchoTool {
    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({ "echo": params }))
    }
}

/// Tool that always fails with the given message.
pub struct FailingTool {
    pub message: String,
}

#[async_trait]
impl ToolHandler for FailingTool {
    async fn call(&self, _params: Value) -> Result<Value, ToolError> {
        Err(ToolError::Failed(self.message.clone()))
    }
}
