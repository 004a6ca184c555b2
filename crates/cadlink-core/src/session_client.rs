//! Remote session client.
//!
//! Owns one WebSocket connection to the session broker and the state
//! machine around it:
//!
//! ```text
//! Disconnected --start--> Connecting --licensed & socket open--> Connected
//! Connected --error/close--> Failed
//! Connecting | Connected | Failed --stop--> Disconnected
//! ```
//!
//! Status reads and writes go through a `parking_lot` mutex that is never
//! held across an `.await`. Each connection attempt gets its own `watch`
//! cancellation channel, which interrupts in-flight HTTP calls during
//! `start` and the receive loop afterwards.
//!
//! Commands run on a `JoinSet` beside the receive loop so a slow tool never
//! delays heartbeat replies. All outbound frames go through one writer lock.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use cadlink_crypto::hash::sha256_file;

use crate::backend::{
    BackendError, ConnectSessionRequest, CreateSessionRequest, SessionBackend, SessionGrant,
};
use crate::connection::ConnectionEvent;
use crate::document::HostDocument;
use crate::errors::{self, Classify, ErrorKind};
use crate::ledger::{FileIntegrityLedger, LedgerError};
use crate::license::LicenseAuthority;
use crate::protocol::{parse_frame, ClientFrame, InboundFrame, ProtocolError, MAX_MESSAGE_SIZE};
use crate::router::CommandRouter;
use crate::types::{
    ConnectionMode, ConnectionSettings, ConnectionStatus, Session, SettingsError,
    ValidationScenario,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 64;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone)]
pub enum SessionError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("session client only supports remote mode")]
    UnsupportedMode,

    #[error("{message}")]
    NotLicensed { message: String, kind: ErrorKind },

    #[error("no document is open, or it has not been saved")]
    NoDocument,

    #[error("cannot read {path}: {reason}")]
    File { path: PathBuf, reason: String },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("{0}")]
    IntegrityConflict(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("connection attempt cancelled")]
    Cancelled,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl Classify for SessionError {
    fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Settings(_)
            | SessionError::UnsupportedMode
            | SessionError::NoDocument
            | SessionError::File { .. } => ErrorKind::Configuration,
            SessionError::NotLicensed { kind, .. } => *kind,
            SessionError::Backend(e) => e.kind(),
            SessionError::Ledger(e) => e.kind(),
            SessionError::IntegrityConflict(_) => ErrorKind::IntegrityConflict,
            SessionError::WebSocket(_)
            | SessionError::Timeout(_)
            | SessionError::Cancelled
            | SessionError::Protocol(_) => ErrorKind::Transport,
        }
    }
}

impl SessionError {
    pub fn user_message(&self) -> String {
        match self {
            SessionError::NotLicensed { message, .. } => message.clone(),
            SessionError::NoDocument => self.to_string(),
            SessionError::File { path, reason } => {
                format!("Cannot read the document {}: {reason}", path.display())
            }
            other => errors::user_message(other.kind(), &other.to_string()),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SessionClientConfig {
    /// Ceiling for each broker HTTP call.
    pub http_timeout: Duration,
    /// Ceiling for the WebSocket opening handshake.
    pub connect_timeout: Duration,
    /// How long `stop` waits for a graceful close and for the receive loop.
    pub close_timeout: Duration,
    /// Period of ledger integrity checks while connected; `None` disables them.
    pub integrity_check_interval: Option<Duration>,
}

impl Default for SessionClientConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            integrity_check_interval: Some(Duration::from_secs(30)),
        }
    }
}

/// What `stop` does with the ledger entry of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Keep the ledger entry so the next start resumes the session.
    #[default]
    Resumable,
    /// Drop the ledger entry; the next start creates a fresh session.
    DiscardSession,
}

// ============================================================================
// Receive Statistics
// ============================================================================

#[derive(Debug, Default)]
pub struct ReceiveStats {
    pub received: AtomicU64,
    pub commands: AtomicU64,
    pub heartbeats: AtomicU64,
    pub unknown_type: AtomicU64,
    pub malformed: AtomicU64,
    pub tool_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStatsSnapshot {
    pub received: u64,
    pub commands: u64,
    pub heartbeats: u64,
    pub unknown_type: u64,
    pub malformed: u64,
    pub tool_errors: u64,
}

impl ReceiveStats {
    pub fn snapshot(&self) -> ReceiveStatsSnapshot {
        ReceiveStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            unknown_type: self.unknown_type.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            tool_errors: self.tool_errors.load(Ordering::Relaxed),
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Outbound Writer
// ============================================================================

/// Serializes all writes to the socket.
#[derive(Clone)]
struct FrameWriter {
    sink: Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>,
}

impl FrameWriter {
    fn new(sink: SplitSink<WsStream, Message>) -> Self {
        Self {
            sink: Arc::new(tokio::sync::Mutex::new(sink)),
        }
    }

    async fn send(&self, frame: &ClientFrame) -> Result<(), SessionError> {
        let text = frame.to_json()?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| SessionError::WebSocket(e.to_string()))
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| SessionError::WebSocket(e.to_string()))
    }
}

struct RunningConnection {
    writer: FrameWriter,
    receive_task: JoinHandle<()>,
}

struct Established {
    session: Session,
    writer: FrameWriter,
    stream: SplitStream<WsStream>,
}

// ============================================================================
// Session Client
// ============================================================================

struct Inner {
    license: Arc<LicenseAuthority>,
    ledger: Arc<FileIntegrityLedger>,
    router: Arc<dyn CommandRouter>,
    document: Arc<dyn HostDocument>,
    config: SessionClientConfig,
    status: Mutex<ConnectionStatus>,
    /// Bumped by every `start` and `stop`, only while `status` is locked.
    /// Transitions from an older attempt are refused.
    attempt: AtomicU64,
    session: Mutex<Option<Session>>,
    /// Ledger key of the current session; the server may later rename it.
    ledger_key: Mutex<Option<String>>,
    cancel: Mutex<Option<watch::Sender<bool>>>,
    running: tokio::sync::Mutex<Option<RunningConnection>>,
    events: broadcast::Sender<ConnectionEvent>,
    stats: ReceiveStats,
}

#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

impl SessionClient {
    pub fn new(
        license: Arc<LicenseAuthority>,
        ledger: Arc<FileIntegrityLedger>,
        router: Arc<dyn CommandRouter>,
        document: Arc<dyn HostDocument>,
        config: SessionClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                license,
                ledger,
                router,
                document,
                config,
                status: Mutex::new(ConnectionStatus::Disconnected),
                attempt: AtomicU64::new(0),
                session: Mutex::new(None),
                ledger_key: Mutex::new(None),
                cancel: Mutex::new(None),
                running: tokio::sync::Mutex::new(None),
                events,
                stats: ReceiveStats::default(),
            }),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.lock()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.session.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> ReceiveStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Connect using `settings`.
    ///
    /// Returns `false` without side effects when the client is not
    /// `Disconnected`, and `false` after moving to `Failed` when any step
    /// fails. Failures are reported through [`ConnectionEvent::StatusChanged`].
    pub async fn start(&self, settings: &ConnectionSettings) -> bool {
        let Some((attempt, mut cancel_rx)) = self.inner.begin_attempt() else {
            return false;
        };
        self.inner
            .emit_status(ConnectionStatus::Connecting, "Connecting to CadLink server");

        let established = match self.establish(settings, &mut cancel_rx).await {
            Ok(est) => est,
            Err(e) => {
                if self
                    .inner
                    .transition(attempt, ConnectionStatus::Connecting, ConnectionStatus::Failed)
                {
                    warn!(error = %e, kind = %e.kind(), "session start failed");
                    self.inner
                        .emit_status(ConnectionStatus::Failed, &e.user_message());
                } else {
                    debug!(error = %e, "session start abandoned after stop");
                }
                return false;
            }
        };

        let Established {
            session,
            writer,
            stream,
        } = established;

        let mut running = self.inner.running.lock().await;
        if !self
            .inner
            .transition(attempt, ConnectionStatus::Connecting, ConnectionStatus::Connected)
        {
            drop(running);
            debug!("stopped while connecting, closing fresh socket");
            let _ = timeout(self.inner.config.close_timeout, writer.close()).await;
            return false;
        }

        info!(
            session_id = %session.session_id,
            instance_id = %session.instance_id,
            file = %session.file_path.display(),
            "session connected"
        );
        *self.inner.ledger_key.lock() = Some(session.session_id.clone());
        *self.inner.session.lock() = Some(session);
        let receive_task = tokio::spawn(receive_loop(
            self.inner.clone(),
            attempt,
            stream,
            writer.clone(),
            cancel_rx,
        ));
        *running = Some(RunningConnection {
            writer,
            receive_task,
        });
        drop(running);

        self.inner
            .emit_status(ConnectionStatus::Connected, "Connected to CadLink server");
        true
    }

    async fn establish(
        &self,
        settings: &ConnectionSettings,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Established, SessionError> {
        settings.validate()?;
        if settings.mode != ConnectionMode::Remote {
            return Err(SessionError::UnsupportedMode);
        }
        let inner = &self.inner;

        let license = cancellable(cancel, inner.license.validate()).await?;
        if !license.is_valid {
            return Err(SessionError::NotLicensed {
                message: license.message,
                kind: license.kind.unwrap_or(ErrorKind::AuthorityRejection),
            });
        }
        let license_id = license.license_id.unwrap_or_default();
        let user_id = license.user_id.unwrap_or_default();

        let file_path = inner.document.file_path().ok_or(SessionError::NoDocument)?;
        let document_guid = inner.document.document_guid().filter(|g| !g.is_empty());
        let (file_hash, file_size) = cancellable(cancel, hash_file(file_path.clone())).await??;

        let backend = SessionBackend::new(&settings.remote_url, inner.config.http_timeout)?;
        let grant = self
            .acquire_session(
                &backend,
                settings,
                cancel,
                SessionRequest {
                    user_id: &user_id,
                    license_id: &license_id,
                    file_path: &file_path,
                    document_guid: document_guid.as_deref(),
                    file_hash: &file_hash,
                    file_size,
                },
            )
            .await?;

        let ws_url = backend.websocket_url(&grant)?;
        let ws_config = WebSocketConfig {
            max_message_size: Some(MAX_MESSAGE_SIZE),
            max_frame_size: Some(MAX_MESSAGE_SIZE),
            ..Default::default()
        };
        let connect = timeout(
            inner.config.connect_timeout,
            connect_async_with_config(ws_url.as_str(), Some(ws_config), false),
        );
        let (socket, _response) = cancellable(cancel, connect)
            .await?
            .map_err(|_| SessionError::Timeout("websocket connect"))?
            .map_err(|e| SessionError::WebSocket(e.to_string()))?;
        debug!(url = %ws_url, "websocket open");

        let (sink, stream) = socket.split();
        let writer = FrameWriter::new(sink);

        let session = Session {
            session_id: grant.session_id,
            instance_id: grant.instance_id.unwrap_or_default(),
            license_id,
            file_path,
            file_identity: document_guid.unwrap_or(file_hash),
            file_size,
            websocket_url: ws_url,
        };

        writer
            .send(&ClientFrame::Handshake {
                session_id: session.session_id.clone(),
                instance_id: session.instance_id.clone(),
                file_path: session.file_path.to_string_lossy().into_owned(),
            })
            .await?;

        Ok(Established {
            session,
            writer,
            stream,
        })
    }

    /// Resume the ledger-linked session when possible, otherwise create one.
    async fn acquire_session(
        &self,
        backend: &SessionBackend,
        settings: &ConnectionSettings,
        cancel: &mut watch::Receiver<bool>,
        req: SessionRequest<'_>,
    ) -> Result<SessionGrant, SessionError> {
        let ledger = &self.inner.ledger;

        if !settings.force_new_session {
            let outcome = ledger.validate_for_connection(req.file_path, req.document_guid);
            match outcome.scenario {
                ValidationScenario::PerfectMatch
                | ValidationScenario::FilePathChanged
                | ValidationScenario::LegacyFile => {
                    let session_id = outcome.session_id.clone().unwrap_or_default();
                    let resumed = cancellable(
                        cancel,
                        backend.connect(&ConnectSessionRequest {
                            session_id: session_id.clone(),
                            user_id: req.user_id.to_string(),
                            license_id: req.license_id.to_string(),
                            file_path: req.file_path.to_string_lossy().into_owned(),
                            document_guid: req.document_guid.map(str::to_string),
                        }),
                    )
                    .await??;
                    match resumed {
                        Some(grant) => {
                            if let Err(e) =
                                ledger.apply_outcome(&outcome, req.file_path, req.document_guid)
                            {
                                warn!(error = %e, "failed to update ledger entry");
                            }
                            if let Err(e) = ledger.rekey(&session_id, &grant.session_id) {
                                warn!(error = %e, "failed to re-key resumed ledger entry");
                            }
                            info!(session_id = %grant.session_id, scenario = ?outcome.scenario, "resuming session");
                            return Ok(grant);
                        }
                        None => {
                            info!(session_id = %session_id, "linked session expired on server");
                            ledger.unregister(&session_id);
                        }
                    }
                }
                ValidationScenario::FileReplaced
                | ValidationScenario::FileReplacedNoGuid
                | ValidationScenario::ValidationError => {
                    return Err(SessionError::IntegrityConflict(outcome.message));
                }
                ValidationScenario::NoLinkFound => {}
            }
        }

        let grant = cancellable(
            cancel,
            backend.create(&CreateSessionRequest {
                user_id: req.user_id.to_string(),
                file_path: req.file_path.to_string_lossy().into_owned(),
                file_hash: req.file_hash.to_string(),
                file_size: req.file_size,
                license_id: req.license_id.to_string(),
            }),
        )
        .await??;

        let guid = req.document_guid.or(grant.document_guid.as_deref());
        ledger.register(&grant.session_id, req.file_path, guid)?;
        info!(session_id = %grant.session_id, "session created");
        Ok(grant)
    }

    /// Disconnect, keeping the ledger entry for later resumption.
    pub async fn stop(&self) {
        self.stop_with(StopMode::Resumable).await
    }

    /// Disconnect. Safe to call repeatedly and concurrently with `start`.
    pub async fn stop_with(&self, mode: StopMode) {
        let previous = {
            let mut status = self.inner.status.lock();
            self.inner.attempt.fetch_add(1, Ordering::SeqCst);
            std::mem::replace(&mut *status, ConnectionStatus::Disconnected)
        };
        if let Some(cancel) = self.inner.cancel.lock().take() {
            let _ = cancel.send(true);
        }

        let running = self.inner.running.lock().await.take();
        if let Some(running) = running {
            let close_timeout = self.inner.config.close_timeout;
            match timeout(close_timeout, running.writer.close()).await {
                Ok(Ok(())) => debug!("websocket closed"),
                Ok(Err(e)) => debug!(error = %e, "websocket close failed"),
                Err(_) => warn!("websocket close timed out"),
            }
            let mut task = running.receive_task;
            if timeout(close_timeout, &mut task).await.is_err() {
                warn!("receive loop did not exit in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }

        self.inner.session.lock().take();
        let ledger_key = self.inner.ledger_key.lock().take();
        if mode == StopMode::DiscardSession {
            if let Some(key) = &ledger_key {
                self.inner.ledger.unregister(key);
            }
        }

        if previous != ConnectionStatus::Disconnected {
            info!(from = %previous, "session client stopped");
            self.inner
                .emit_status(ConnectionStatus::Disconnected, "Disconnected");
        }
    }
}

struct SessionRequest<'a> {
    user_id: &'a str,
    license_id: &'a str,
    file_path: &'a std::path::Path,
    document_guid: Option<&'a str>,
    file_hash: &'a str,
    file_size: u64,
}

impl Inner {
    /// `Disconnected -> Connecting`, returning the new attempt number and its
    /// cancellation receiver.
    fn begin_attempt(&self) -> Option<(u64, watch::Receiver<bool>)> {
        let mut status = self.status.lock();
        let current = *status;
        if current != ConnectionStatus::Disconnected {
            warn!(status = %current, "start ignored, client is not disconnected");
            return None;
        }
        *status = ConnectionStatus::Connecting;
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = watch::channel(false);
        *self.cancel.lock() = Some(tx);
        Some((attempt, rx))
    }

    /// Move `from -> to` atomically for `attempt`; false if the status was
    /// not `from` or a newer start or stop has happened since.
    fn transition(&self, attempt: u64, from: ConnectionStatus, to: ConnectionStatus) -> bool {
        let mut status = self.status.lock();
        if *status == from && self.attempt.load(Ordering::SeqCst) == attempt {
            *status = to;
            true
        } else {
            false
        }
    }

    fn emit_status(&self, status: ConnectionStatus, message: &str) {
        let _ = self.events.send(ConnectionEvent::StatusChanged {
            status,
            message: message.to_string(),
        });
    }

    fn current_session_id(&self) -> String {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.session_id.clone())
            .unwrap_or_default()
    }

    async fn handle_text(
        self: &Arc<Self>,
        text: &str,
        writer: &FrameWriter,
        tools: &mut JoinSet<()>,
    ) {
        ReceiveStats::inc(&self.stats.received);
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                ReceiveStats::inc(&self.stats.malformed);
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match frame {
            InboundFrame::Handshake {
                session_id,
                instance_id,
                ..
            } => {
                let renamed = {
                    let mut guard = self.session.lock();
                    let Some(session) = guard.as_mut() else {
                        return;
                    };
                    let mut renamed = None;
                    if let Some(id) = session_id.filter(|s| !s.is_empty()) {
                        if id != session.session_id {
                            renamed = Some(id.clone());
                        }
                        session.session_id = id;
                    }
                    if let Some(id) = instance_id.filter(|s| !s.is_empty()) {
                        session.instance_id = id;
                    }
                    debug!(session_id = %session.session_id, instance_id = %session.instance_id, "handshake acknowledged");
                    renamed
                };
                if let Some(new_id) = renamed {
                    self.adopt_ledger_key(&new_id);
                }
            }
            InboundFrame::Command {
                tool,
                params,
                correlation_id,
            } => {
                ReceiveStats::inc(&self.stats.commands);
                let _ = self.events.send(ConnectionEvent::CommandReceived {
                    tool: tool.clone(),
                    correlation_id: correlation_id.clone(),
                });
                let inner = self.clone();
                let writer = writer.clone();
                tools.spawn(async move {
                    debug!(%tool, %correlation_id, "executing command");
                    let frame = match inner.router.execute(&tool, params).await {
                        Ok(result) => ClientFrame::response_ok(&correlation_id, result),
                        Err(e) => {
                            ReceiveStats::inc(&inner.stats.tool_errors);
                            warn!(%tool, %correlation_id, error = %e, "command failed");
                            ClientFrame::response_err(&correlation_id, e.to_string())
                        }
                    };
                    if let Err(e) = writer.send(&frame).await {
                        warn!(%correlation_id, error = %e, "failed to send response");
                    }
                });
            }
            InboundFrame::Heartbeat => {
                ReceiveStats::inc(&self.stats.heartbeats);
                let ack = ClientFrame::heartbeat_ack(self.current_session_id(), Utc::now());
                if let Err(e) = writer.send(&ack).await {
                    warn!(error = %e, "failed to send heartbeat ack");
                }
            }
            InboundFrame::Error { message } => {
                warn!(%message, "server reported an error");
            }
            InboundFrame::Unknown(kind) => {
                ReceiveStats::inc(&self.stats.unknown_type);
                debug!(frame_type = %kind, "ignoring unknown frame type");
            }
        }
    }

    /// Follow a server-assigned session id in the ledger.
    fn adopt_ledger_key(&self, new_id: &str) {
        let old_id = self.ledger_key.lock().replace(new_id.to_string());
        let Some(old_id) = old_id.filter(|old| old != new_id) else {
            return;
        };
        match self.ledger.rekey(&old_id, new_id) {
            Ok(()) => info!(%old_id, %new_id, "server assigned a new session id"),
            Err(e) => warn!(%old_id, %new_id, error = %e, "failed to re-key ledger entry"),
        }
    }

    async fn report_integrity(&self, writer: &FrameWriter) {
        let ledger = self.ledger.clone();
        let changes = match tokio::task::spawn_blocking(move || ledger.check_all()).await {
            Ok(changes) => changes,
            Err(e) => {
                warn!(error = %e, "integrity check panicked");
                return;
            }
        };
        if changes.is_empty() {
            return;
        }
        let license_id = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.license_id.clone())
            .unwrap_or_default();
        let update = ClientFrame::FileStatusUpdate {
            license_id,
            status_changes: changes,
        };
        if let Err(e) = writer.send(&update).await {
            warn!(error = %e, "failed to send file status update");
        }
    }
}

// ============================================================================
// Receive Loop
// ============================================================================

async fn receive_loop(
    inner: Arc<Inner>,
    attempt: u64,
    mut stream: SplitStream<WsStream>,
    writer: FrameWriter,
    mut cancel: watch::Receiver<bool>,
) {
    let mut tools: JoinSet<()> = JoinSet::new();
    let mut integrity = inner.config.integrity_check_interval.map(|period| {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let lost: Option<String> = loop {
        tokio::select! {
            _ = wait_cancelled(&mut cancel) => break None,
            Some(joined) = tools.join_next(), if !tools.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(error = %e, "command task panicked");
                    }
                }
            }
            _ = next_tick(&mut integrity) => inner.report_integrity(&writer).await,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => inner.handle_text(&text, &writer, &mut tools).await,
                Some(Ok(Message::Binary(bytes))) => {
                    debug!(len = bytes.len(), "ignoring binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("server closed the connection ({})", f.code))
                        .unwrap_or_else(|| "server closed the connection".to_string());
                    break Some(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(format!("connection error: {e}")),
                None => break Some("connection closed".to_string()),
            },
        }
    };

    tools.abort_all();
    while tools.join_next().await.is_some() {}

    if let Some(reason) = lost {
        if inner.transition(attempt, ConnectionStatus::Connected, ConnectionStatus::Failed) {
            warn!(%reason, "session connection lost");
            inner.emit_status(ConnectionStatus::Failed, &format!("Connection lost: {reason}"));
        }
    }
    debug!("receive loop exited");
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Resolves once cancellation is requested or the sender is gone.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Run `fut` unless cancellation is requested first.
async fn cancellable<F: Future>(
    cancel: &mut watch::Receiver<bool>,
    fut: F,
) -> Result<F::Output, SessionError> {
    tokio::select! {
        biased;
        _ = wait_cancelled(cancel) => Err(SessionError::Cancelled),
        out = fut => Ok(out),
    }
}

async fn hash_file(path: PathBuf) -> Result<(String, u64), SessionError> {
    let for_err = path.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let size = std::fs::metadata(&path)?.len();
        let hash = sha256_file(&path)?;
        Ok::<_, std::io::Error>((hash, size))
    })
    .await;
    match joined {
        Ok(Ok(out)) => Ok(out),
        Ok(Err(e)) => Err(SessionError::File {
            path: for_err,
            reason: e.to_string(),
        }),
        Err(e) => Err(SessionError::File {
            path: for_err,
            reason: e.to_string(),
        }),
    }
}
