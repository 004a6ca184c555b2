//! In-process mock of the license authority and session broker.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path as FsPath, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use cadlink_core::harness::{test_store, FixedFingerprint, FailingTool, SleepEchoTool};
use cadlink_core::{
    ConnectionStatus, FileIntegrityLedger, LicenseAuthority, SecureStore, SessionClient,
    SessionClientConfig, StaticDocument, ToolRegistry,
};

/// Sent through [`MockBroker::to_client`] to make the server close the socket.
pub const CLOSE: &str = "__close__";

pub const LICENSE_KEY: &str = "CL-TEST-KEY";
pub const USER_ID: &str = "user-1";

pub struct BrokerState {
    /// Forces `/license/validate` to answer with this status.
    pub validate_override: Mutex<Option<StatusCode>>,
    licenses: Mutex<HashMap<String, String>>,
    sessions: Mutex<HashSet<String>>,
    pub created: AtomicUsize,
    pub resumed: AtomicUsize,
    inbound: mpsc::UnboundedSender<Value>,
    outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

pub struct MockBroker {
    pub url: String,
    pub state: Arc<BrokerState>,
    /// Frames the client sent, in order.
    pub from_client: mpsc::UnboundedReceiver<Value>,
    /// Text frames to push to the connected client.
    pub to_client: mpsc::UnboundedSender<String>,
}

impl MockBroker {
    pub async fn start() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(BrokerState {
            validate_override: Mutex::new(None),
            licenses: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashSet::new()),
            created: AtomicUsize::new(0),
            resumed: AtomicUsize::new(0),
            inbound: inbound_tx,
            outbound: tokio::sync::Mutex::new(outbound_rx),
        });

        let app = Router::new()
            .route("/license/register", post(register))
            .route("/license/validate", post(validate))
            .route("/sessions/create", post(create_session))
            .route("/sessions/connect", post(connect_session))
            .route("/ws/:session_id", get(ws_upgrade))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            state,
            from_client: inbound_rx,
            to_client: outbound_tx,
        }
    }

    pub fn send(&self, frame: Value) {
        self.to_client.send(frame.to_string()).unwrap();
    }

    pub fn forget_sessions(&self) {
        self.state.sessions.lock().clear();
    }

    /// Next frame from the client with the given `type`, skipping others.
    pub async fn next_of_type(&mut self, kind: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let frame = tokio::time::timeout_at(deadline, self.from_client.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {kind} frame"))
                .expect("broker channel closed");
            if frame["type"] == kind {
                return frame;
            }
        }
    }
}

async fn register(State(state): State<Arc<BrokerState>>, Json(body): Json<Value>) -> Response {
    let key = body["license_key"].as_str().unwrap_or_default().to_string();
    if key == "bad-key" || body["machine_fingerprint"].as_str().is_none() {
        return (StatusCode::FORBIDDEN, "invalid license key").into_response();
    }
    let mut licenses = state.licenses.lock();
    let license_id = format!("LIC-{}", licenses.len() + 1);
    licenses.insert(license_id.clone(), key);
    Json(json!({
        "license_id": license_id,
        "tier": "beta",
        "max_concurrent_files": 3
    }))
    .into_response()
}

async fn validate(State(state): State<Arc<BrokerState>>, Json(body): Json<Value>) -> Response {
    if let Some(status) = *state.validate_override.lock() {
        return (status, Json(json!({"detail": "forced"}))).into_response();
    }
    let id = body["license_id"].as_str().unwrap_or_default();
    let key = body["license_key"].as_str().unwrap_or_default();
    let known = state.licenses.lock().get(id).is_some_and(|k| k == key);
    if known {
        Json(json!({"status": "valid"})).into_response()
    } else {
        Json(json!({"status": "invalid", "message": "unknown license"})).into_response()
    }
}

async fn create_session(State(state): State<Arc<BrokerState>>, Json(body): Json<Value>) -> Response {
    for field in ["user_id", "file_path", "file_hash", "license_id"] {
        if body[field].as_str().is_none() {
            return (StatusCode::BAD_REQUEST, format!("missing {field}")).into_response();
        }
    }
    let n = state.created.fetch_add(1, Ordering::SeqCst) + 1;
    let session_id = format!("sess-{n}");
    state.sessions.lock().insert(session_id.clone());
    Json(json!({
        "session_id": session_id,
        "instance_id": "inst-1",
        "websocket_url": format!("/ws/{session_id}")
    }))
    .into_response()
}

async fn connect_session(State(state): State<Arc<BrokerState>>, Json(body): Json<Value>) -> Response {
    let session_id = body["session_id"].as_str().unwrap_or_default().to_string();
    if !state.sessions.lock().contains(&session_id) {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    }
    state.resumed.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "session_id": session_id,
        "document_guid": null,
        "websocket_url": format!("/ws/{session_id}")
    }))
    .into_response()
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<BrokerState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

async fn handle_socket(socket: WebSocket, session_id: String, state: Arc<BrokerState>) {
    let (mut tx, mut rx) = socket.split();
    let hello = json!({"type": "handshake", "session_id": session_id, "instance_id": "inst-1"});
    if tx.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }

    let mut outbound = state.outbound.lock().await;
    loop {
        tokio::select! {
            msg = rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        let _ = state.inbound.send(value);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            out = outbound.recv() => match out {
                Some(text) if text == CLOSE => {
                    let _ = tx.send(Message::Close(None)).await;
                    break;
                }
                Some(text) => {
                    if tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

// ============================================================================
// Client fixture
// ============================================================================

pub struct Fixture {
    pub broker: MockBroker,
    pub dir: TempDir,
    pub store: SecureStore,
    pub fingerprint: Arc<FixedFingerprint>,
    pub license: Arc<LicenseAuthority>,
    pub ledger: Arc<FileIntegrityLedger>,
    pub document_path: PathBuf,
}

impl Fixture {
    pub async fn new() -> Self {
        let broker = MockBroker::start().await;
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir.path().join("store"));
        let fingerprint = Arc::new(FixedFingerprint::new(0x5a));
        let license = Arc::new(
            LicenseAuthority::with_timeout(store.clone(), fingerprint.clone(), Duration::from_secs(5))
                .unwrap(),
        );
        let ledger = Arc::new(FileIntegrityLedger::load(store.clone()));
        let document_path = dir.path().join("model.3dm");
        std::fs::write(&document_path, b"solid model bytes").unwrap();

        Self {
            broker,
            dir,
            store,
            fingerprint,
            license,
            ledger,
            document_path,
        }
    }

    pub async fn registered() -> Self {
        let fx = Self::new().await;
        let result = fx.license.register(LICENSE_KEY, USER_ID, &fx.broker.url).await;
        assert!(result.success, "{}", result.message);
        fx
    }

    pub fn tools() -> ToolRegistry {
        ToolRegistry::with_builtins()
            .register("xyz", SleepEchoTool { delay: Duration::from_millis(500) })
            .register("abc", SleepEchoTool { delay: Duration::ZERO })
            .register("fail", FailingTool { message: "geometry is invalid".into() })
    }

    pub fn client(&self, guid: Option<&str>) -> SessionClient {
        self.client_with(guid, SessionClientConfig {
            integrity_check_interval: None,
            ..SessionClientConfig::default()
        })
    }

    pub fn client_with(&self, guid: Option<&str>, config: SessionClientConfig) -> SessionClient {
        self.client_for(&self.document_path, guid, config)
    }

    pub fn client_for(
        &self,
        path: &FsPath,
        guid: Option<&str>,
        config: SessionClientConfig,
    ) -> SessionClient {
        SessionClient::new(
            self.license.clone(),
            self.ledger.clone(),
            Arc::new(Self::tools()),
            Arc::new(StaticDocument::new(path, guid)),
            config,
        )
    }
}

pub async fn wait_for_status(client: &SessionClient, status: ConnectionStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while client.status() != status {
        assert!(
            tokio::time::Instant::now() < deadline,
            "status stuck at {} waiting for {}",
            client.status(),
            status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
