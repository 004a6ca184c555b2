//! HTTP client for the session broker.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::errors::{Classify, ErrorKind};

#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("http client error: {0}")]
    Client(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("server rejected request: HTTP {status}")]
    Rejected { status: u16, body: String },

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("invalid server response: {0}")]
    InvalidResponse(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl Classify for BackendError {
    fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Rejected { .. } => ErrorKind::AuthorityRejection,
            BackendError::InvalidUrl(_) => ErrorKind::Configuration,
            _ => ErrorKind::Transport,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::InvalidResponse(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub file_path: String,
    pub file_hash: String,
    pub file_size: u64,
    pub license_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectSessionRequest {
    pub session_id: String,
    pub user_id: String,
    pub license_id: String,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_guid: Option<String>,
}

/// Session details issued by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionGrant {
    pub session_id: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub document_guid: Option<String>,
    pub websocket_url: String,
}

#[derive(Clone)]
pub struct SessionBackend {
    base_url: String,
    client: reqwest::Client,
}

impl SessionBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;
        Ok(Self {
            base_url: http_base(&base_url.into()),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `/sessions/create`.
    pub async fn create(&self, req: &CreateSessionRequest) -> Result<SessionGrant, BackendError> {
        let resp = self
            .client
            .post(format!("{}/sessions/create", self.base_url))
            .json(req)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => {
                let grant: SessionGrant = resp.json().await?;
                debug!(session_id = %grant.session_id, "session created");
                Ok(grant)
            }
            s => Err(status_error(s, resp.text().await.unwrap_or_default())),
        }
    }

    /// POST `/sessions/connect`. `None` when the server no longer knows the session.
    pub async fn connect(
        &self,
        req: &ConnectSessionRequest,
    ) -> Result<Option<SessionGrant>, BackendError> {
        let resp = self
            .client
            .post(format!("{}/sessions/connect", self.base_url))
            .json(req)
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                debug!(session_id = %req.session_id, "session unknown to server");
                Ok(None)
            }
            s if s.is_success() => Ok(Some(resp.json().await?)),
            s => Err(status_error(s, resp.text().await.unwrap_or_default())),
        }
    }

    /// Absolute WebSocket URL for a grant, resolving relative paths against the base URL.
    pub fn websocket_url(&self, grant: &SessionGrant) -> Result<String, BackendError> {
        resolve_websocket_url(&self.base_url, &grant.websocket_url)
    }
}

fn status_error(status: StatusCode, body: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Rejected {
            status: status.as_u16(),
            body,
        },
        other => BackendError::Status(other.as_u16()),
    }
}

/// Broker URLs may be given with a WebSocket scheme; HTTP calls need the
/// matching HTTP one.
fn http_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        trimmed.to_string()
    }
}

/// Resolve a broker-issued WebSocket URL against `base`.
///
/// `base` is treated as a directory, so relative URLs keep its last path
/// segment.
pub fn resolve_websocket_url(base: &str, raw: &str) -> Result<String, BackendError> {
    let mut base = Url::parse(base).map_err(|e| BackendError::InvalidUrl(e.to_string()))?;
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    let mut url = base
        .join(raw)
        .map_err(|e| BackendError::InvalidUrl(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(BackendError::InvalidUrl(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| BackendError::InvalidUrl(format!("cannot use scheme {scheme}")))?;
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_base_from_websocket_scheme() {
        assert_eq!(http_base("ws://127.0.0.1:8080/"), "http://127.0.0.1:8080");
        assert_eq!(http_base("wss://broker.example.com"), "https://broker.example.com");
        assert_eq!(http_base("https://broker.example.com/"), "https://broker.example.com");
    }

    #[test]
    fn test_resolve_relative_websocket_url() {
        assert_eq!(
            resolve_websocket_url("http://127.0.0.1:8080", "/ws/abc").unwrap(),
            "ws://127.0.0.1:8080/ws/abc"
        );
        assert_eq!(
            resolve_websocket_url("https://broker.example.com/api/", "ws/abc").unwrap(),
            "wss://broker.example.com/api/ws/abc"
        );
    }

    #[test]
    fn test_relative_url_keeps_base_path() {
        assert_eq!(
            resolve_websocket_url("http://h/api", "ws/abc").unwrap(),
            "ws://h/api/ws/abc"
        );
        assert_eq!(
            resolve_websocket_url("http://h/api", "/ws/abc").unwrap(),
            "ws://h/ws/abc"
        );

        let backend = SessionBackend::new("https://h/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.base_url(), "https://h/api");
        let grant = SessionGrant {
            session_id: "s".into(),
            instance_id: None,
            document_guid: None,
            websocket_url: "ws/s".into(),
        };
        assert_eq!(backend.websocket_url(&grant).unwrap(), "wss://h/api/ws/s");
    }

    #[test]
    fn test_resolve_absolute_websocket_url() {
        assert_eq!(
            resolve_websocket_url("http://a:1", "wss://b.example.com/s/1").unwrap(),
            "wss://b.example.com/s/1"
        );
        assert_eq!(
            resolve_websocket_url("http://a:1", "https://b.example.com/s/1").unwrap(),
            "wss://b.example.com/s/1"
        );
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        assert!(matches!(
            resolve_websocket_url("http://a:1", "ftp://b/s"),
            Err(BackendError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            status_error(StatusCode::FORBIDDEN, String::new()).kind(),
            ErrorKind::AuthorityRejection
        );
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, String::new()).kind(),
            ErrorKind::Transport
        );
    }
}
