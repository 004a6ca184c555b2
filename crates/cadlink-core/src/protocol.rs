//! WebSocket message envelope.
//!
//! Every frame is a UTF-8 JSON object carrying a `type` discriminator.
//! Inbound frames are parsed leniently: unknown types are surfaced as
//! [`InboundFrame::Unknown`] instead of failing, so newer servers can add
//! message kinds without breaking older clients.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::errors::{Classify, ErrorKind};
use crate::types::FileStatusChange;

/// Largest message accepted from the server.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame has no type")]
    MissingType,

    #[error("{frame} frame is missing {field}")]
    MissingField {
        frame: &'static str,
        field: &'static str,
    },
}

impl Classify for ProtocolError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }
}

// ============================================================================
// Inbound
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Handshake {
        session_id: Option<String>,
        instance_id: Option<String>,
        file_path: Option<String>,
    },
    Command {
        tool: String,
        params: Value,
        correlation_id: String,
    },
    Heartbeat,
    /// Server-side error notice.
    Error { message: String },
    Unknown(String),
}

pub fn parse_frame(text: &str) -> Result<InboundFrame, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ProtocolError::Malformed("expected a JSON object".to_string()))?;
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    let string_field = |name: &str| obj.get(name).and_then(Value::as_str).map(str::to_string);

    let frame = match kind {
        "handshake" => InboundFrame::Handshake {
            session_id: string_field("session_id"),
            instance_id: string_field("instance_id"),
            file_path: string_field("file_path"),
        },
        "command" => {
            let correlation_id = string_field("correlation_id")
                .filter(|id| !id.is_empty())
                .ok_or(ProtocolError::MissingField {
                    frame: "command",
                    field: "correlation_id",
                })?;
            let tool = string_field("tool").ok_or(ProtocolError::MissingField {
                frame: "command",
                field: "tool",
            })?;
            InboundFrame::Command {
                tool,
                params: obj
                    .get("params")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
                correlation_id,
            }
        }
        "heartbeat" => InboundFrame::Heartbeat,
        "error" => InboundFrame::Error {
            message: string_field("message").unwrap_or_default(),
        },
        other => InboundFrame::Unknown(other.to_string()),
    };
    Ok(frame)
}

// ============================================================================
// Outbound
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Handshake {
        session_id: String,
        instance_id: String,
        file_path: String,
    },
    Response {
        correlation_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    HeartbeatAck {
        session_id: String,
        timestamp: String,
    },
    FileStatusUpdate {
        license_id: String,
        status_changes: Vec<FileStatusChange>,
    },
}

impl ClientFrame {
    pub fn response_ok(correlation_id: impl Into<String>, result: Value) -> Self {
        ClientFrame::Response {
            correlation_id: correlation_id.into(),
            result: Some(result),
            status: None,
            message: None,
        }
    }

    pub fn response_err(correlation_id: impl Into<String>, message: impl Into<String>) -> Self {
        ClientFrame::Response {
            correlation_id: correlation_id.into(),
            result: None,
            status: Some("error"),
            message: Some(message.into()),
        }
    }

    pub fn heartbeat_ack(session_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        ClientFrame::HeartbeatAck {
            session_id: session_id.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}
