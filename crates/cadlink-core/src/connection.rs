//! Connection lifecycle façade.
//!
//! [`ConnectionManager`] keeps at most one connection alive, builds the
//! implementation matching [`ConnectionMode`] through a
//! [`ConnectionFactory`], and relays the active connection's events to its
//! own broadcast channel. It holds no protocol logic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::document::HostDocument;
use crate::errors::{self, Classify, ErrorKind};
use crate::ledger::FileIntegrityLedger;
use crate::license::LicenseAuthority;
use crate::router::CommandRouter;
use crate::session_client::{SessionClient, SessionClientConfig, StopMode};
use crate::types::{ConnectionMode, ConnectionSettings, ConnectionStatus, SettingsError};

const EVENT_CAPACITY: usize = 128;

/// Notifications emitted by connections. Sending never blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StatusChanged {
        status: ConnectionStatus,
        message: String,
    },
    CommandReceived {
        tool: String,
        correlation_id: String,
    },
}

#[derive(Debug, Error, Clone)]
pub enum ConnectionError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("local connection mode is not available in this host")]
    LocalModeUnavailable,
}

impl Classify for ConnectionError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

/// A started-or-startable connection of one mode.
#[async_trait]
pub trait Connection: Send + Sync {
    fn mode(&self) -> ConnectionMode;

    /// Returns `false` if already active or if connecting failed.
    async fn start(&self, settings: &ConnectionSettings) -> bool;

    /// Idempotent.
    async fn stop(&self, mode: StopMode);

    fn status(&self) -> ConnectionStatus;

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;
}

#[async_trait]
impl Connection for SessionClient {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Remote
    }

    async fn start(&self, settings: &ConnectionSettings) -> bool {
        SessionClient::start(self, settings).await
    }

    async fn stop(&self, mode: StopMode) {
        self.stop_with(mode).await
    }

    fn status(&self) -> ConnectionStatus {
        SessionClient::status(self)
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        SessionClient::subscribe(self)
    }
}

/// Builds the connection implementation for a settings object.
pub trait ConnectionFactory: Send + Sync {
    fn create(&self, settings: &ConnectionSettings) -> Result<Arc<dyn Connection>, ConnectionError>;
}

/// Remote connections are [`SessionClient`]s; local ones come from the host.
pub struct DefaultConnectionFactory {
    license: Arc<LicenseAuthority>,
    ledger: Arc<FileIntegrityLedger>,
    router: Arc<dyn CommandRouter>,
    document: Arc<dyn HostDocument>,
    config: SessionClientConfig,
    local: Option<Arc<dyn ConnectionFactory>>,
}

impl DefaultConnectionFactory {
    pub fn new(
        license: Arc<LicenseAuthority>,
        ledger: Arc<FileIntegrityLedger>,
        router: Arc<dyn CommandRouter>,
        document: Arc<dyn HostDocument>,
        config: SessionClientConfig,
    ) -> Self {
        Self {
            license,
            ledger,
            router,
            document,
            config,
            local: None,
        }
    }

    pub fn with_local(mut self, local: Arc<dyn ConnectionFactory>) -> Self {
        self.local = Some(local);
        self
    }
}

impl ConnectionFactory for DefaultConnectionFactory {
    fn create(&self, settings: &ConnectionSettings) -> Result<Arc<dyn Connection>, ConnectionError> {
        match settings.mode {
            ConnectionMode::Remote => Ok(Arc::new(SessionClient::new(
                self.license.clone(),
                self.ledger.clone(),
                self.router.clone(),
                self.document.clone(),
                self.config.clone(),
            ))),
            ConnectionMode::Local => match &self.local {
                Some(factory) => factory.create(settings),
                None => Err(ConnectionError::LocalModeUnavailable),
            },
        }
    }
}

// ============================================================================
// Connection Manager
// ============================================================================

struct ActiveConnection {
    connection: Arc<dyn Connection>,
    relay: JoinHandle<()>,
    relay_shutdown: oneshot::Sender<()>,
}

pub struct ConnectionManager {
    factory: Arc<dyn ConnectionFactory>,
    current: Mutex<Option<ActiveConnection>>,
    events: broadcast::Sender<ConnectionEvent>,
    stop_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn ConnectionFactory>, stop_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            factory,
            current: Mutex::new(None),
            events,
            stop_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Stop any active connection, then start a new one for `settings`.
    pub async fn start_connection(&self, settings: &ConnectionSettings) -> bool {
        if let Err(e) = settings.validate() {
            warn!(error = %e, "rejecting connection settings");
            self.emit_failed(&errors::user_message(e.kind(), &e.to_string()));
            return false;
        }

        let mut current = self.current.lock().await;
        if let Some(active) = current.take() {
            self.shutdown(active, StopMode::Resumable).await;
        }

        let connection = match self.factory.create(settings) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, mode = %settings.mode, "cannot create connection");
                self.emit_failed(&errors::user_message(e.kind(), &e.to_string()));
                return false;
            }
        };

        let (relay_shutdown, shutdown_rx) = oneshot::channel();
        let relay = spawn_relay(connection.subscribe(), self.events.clone(), shutdown_rx);
        *current = Some(ActiveConnection {
            connection: connection.clone(),
            relay,
            relay_shutdown,
        });
        drop(current);

        info!(mode = %settings.mode, "starting connection");
        connection.start(settings).await
    }

    /// Same as [`start_connection`](Self::start_connection); names the intent
    /// of replacing the current connection.
    pub async fn switch_connection(&self, settings: &ConnectionSettings) -> bool {
        self.start_connection(settings).await
    }

    pub async fn stop_connection(&self) {
        self.stop_connection_with(StopMode::Resumable).await
    }

    /// Idempotent; a stop that exceeds the timeout is abandoned.
    pub async fn stop_connection_with(&self, mode: StopMode) {
        let active = self.current.lock().await.take();
        match active {
            Some(active) => self.shutdown(active, mode).await,
            None => debug!("no active connection to stop"),
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        match self.current.lock().await.as_ref() {
            Some(active) => active.connection.status(),
            None => ConnectionStatus::Disconnected,
        }
    }

    pub async fn active_mode(&self) -> Option<ConnectionMode> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|active| active.connection.mode())
    }

    async fn shutdown(&self, active: ActiveConnection, mode: StopMode) {
        let ActiveConnection {
            connection,
            mut relay,
            relay_shutdown,
        } = active;

        if timeout(self.stop_timeout, connection.stop(mode)).await.is_err() {
            warn!(timeout = ?self.stop_timeout, "connection stop timed out, dropping it");
        }

        let _ = relay_shutdown.send(());
        if timeout(self.stop_timeout, &mut relay).await.is_err() {
            relay.abort();
        }
    }

    fn emit_failed(&self, message: &str) {
        let _ = self.events.send(ConnectionEvent::StatusChanged {
            status: ConnectionStatus::Failed,
            message: message.to_string(),
        });
    }
}

/// Forward events until the source closes or shutdown is signalled.
///
/// On shutdown any events already buffered are still forwarded.
fn spawn_relay(
    mut source: broadcast::Receiver<ConnectionEvent>,
    sink: broadcast::Sender<ConnectionEvent>,
    mut shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = source.recv() => match event {
                    Ok(event) => {
                        let _ = sink.send(event);
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "event relay lagged"),
                    Err(RecvError::Closed) => break,
                },
                _ = &mut shutdown => {
                    loop {
                        match source.try_recv() {
                            Ok(event) => {
                                let _ = sink.send(event);
                            }
                            Err(TryRecvError::Lagged(_)) => continue,
                            Err(_) => break,
                        }
                    }
                    break;
                }
            }
        }
    })
}
