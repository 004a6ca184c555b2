//! Wires an [`AgentConfig`] into the core services.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::error;

use cadlink_core::errors::{Classify, CoreError};
use cadlink_core::router::{ToolError, ToolHandler};
use cadlink_core::secure_store::platform_protector;
use cadlink_core::{
    ConnectionManager, DefaultConnectionFactory, FileIntegrityLedger, FingerprintSource,
    HostDocument, LicenseAuthority, MachineFingerprint, SecureStore, SessionClientConfig,
    ToolRegistry,
};

use crate::config::AgentConfig;

/// Long-lived services shared by every CLI command.
pub struct Services {
    pub store: SecureStore,
    pub fingerprint: Arc<dyn FingerprintSource>,
    pub license: Arc<LicenseAuthority>,
    pub ledger: Arc<FileIntegrityLedger>,
}

impl Services {
    pub fn open(config: &AgentConfig) -> Result<Self, CoreError> {
        let store = match &config.storage_dir {
            Some(dir) => SecureStore::new(dir, platform_protector()),
            None => SecureStore::open_default()?,
        };
        Self::with_store(config, store, Arc::new(MachineFingerprint::new()))
    }

    pub fn with_store(
        config: &AgentConfig,
        store: SecureStore,
        fingerprint: Arc<dyn FingerprintSource>,
    ) -> Result<Self, CoreError> {
        let license = Arc::new(LicenseAuthority::with_timeout(
            store.clone(),
            fingerprint.clone(),
            config.http_timeout(),
        )?);
        let ledger = Arc::new(FileIntegrityLedger::load(store.clone()));
        Ok(Self {
            store,
            fingerprint,
            license,
            ledger,
        })
    }

    /// Connection manager bound to `document`, dispatching to [`agent_tools`].
    pub fn connection_manager(
        &self,
        config: &AgentConfig,
        document: Arc<dyn HostDocument>,
    ) -> ConnectionManager {
        let router = Arc::new(agent_tools(document.clone()));
        let factory = DefaultConnectionFactory::new(
            self.license.clone(),
            self.ledger.clone(),
            router,
            document,
            session_config(config),
        );
        ConnectionManager::new(Arc::new(factory), config.close_timeout())
    }
}

/// Log `err` in full and keep only its user-facing message for the CLI.
pub fn user_facing(err: impl Into<CoreError>) -> anyhow::Error {
    let err = err.into();
    error!(error = %err, kind = %err.kind(), "command failed");
    anyhow::anyhow!(err.user_message())
}

pub fn session_config(config: &AgentConfig) -> SessionClientConfig {
    SessionClientConfig {
        http_timeout: config.http_timeout(),
        connect_timeout: config.http_timeout(),
        close_timeout: config.close_timeout(),
        integrity_check_interval: config.integrity_check_interval(),
    }
}

/// `ping` plus `get_info`.
pub fn agent_tools(document: Arc<dyn HostDocument>) -> ToolRegistry {
    ToolRegistry::with_builtins().register("get_info", GetInfoTool { document })
}

/// Describes the agent and the bound document.
pub struct GetInfoTool {
    document: Arc<dyn HostDocument>,
}

#[async_trait]
impl ToolHandler for GetInfoTool {
    async fn call(&self, _params: Value) -> Result<Value, ToolError> {
        Ok(json!({
            "agent": "cadlink-agent",
            "version": env!("CARGO_PKG_VERSION"),
            "file_path": self.document.file_path().map(|p| p.display().to_string()),
            "document_guid": self.document.document_guid(),
        }))
    }
}
