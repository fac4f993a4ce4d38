//! JSON-RPC 2.0 message types shared by the stdio and HTTP transports.
//!
//! Provides serialization and deserialization of JSON-RPC 2.0 messages,
//! batch handling, and the outbound channel used for server-initiated
//! notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

/// A JSON-RPC 2.0 request received from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version; must be `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier. May be a number, string, or null.
    /// Absent for notifications.
    #[serde(default)]
    pub id: Value,
    /// The RPC method name.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 response sent back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version; always `"2.0"`.
    pub jsonrpc: String,
    /// The request identifier that this response corresponds to.
    pub id: Value,
    /// The result on success; absent on error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure; absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Creates a successful JSON-RPC response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error JSON-RPC response.
    pub fn error(id: Value, code: ErrorCode, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code: code.as_i32(),
                message,
                data: None,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A JSON-RPC 2.0 notification sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received.
    ParseError,
    /// The request is not a valid JSON-RPC request.
    InvalidRequest,
    /// The requested method does not exist.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal server error.
    InternalError,
}

impl ErrorCode {
    /// Returns the numeric error code as defined by JSON-RPC 2.0.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }
}

/// A POST body or stdin line: one message or a batch of them.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingPayload {
    Single(Value),
    Batch(Vec<Value>),
}

impl IncomingPayload {
    /// Parses raw bytes. Fails only if the bytes are not JSON at all.
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        Ok(match serde_json::from_slice::<Value>(bytes)? {
            Value::Array(items) => Self::Batch(items),
            other => Self::Single(other),
        })
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    /// Returns `true` if the payload is, or contains, an `initialize` request.
    pub fn contains_initialize(&self) -> bool {
        match self {
            Self::Single(msg) => is_initialize_request(msg),
            Self::Batch(items) => items.iter().any(is_initialize_request),
        }
    }

    pub fn into_messages(self) -> Vec<Value> {
        match self {
            Self::Single(msg) => vec![msg],
            Self::Batch(items) => items,
        }
    }
}

/// Returns `true` for an `initialize` request (a call, not a notification).
pub fn is_initialize_request(message: &Value) -> bool {
    message.get("method").and_then(Value::as_str) == Some("initialize")
        && message.get("id").is_some()
}

/// Returns `true` for messages that expect no response: notifications and
/// client responses to server requests.
pub fn expects_no_response(message: &Value) -> bool {
    message.get("id").is_none() || message.get("method").is_none()
}

/// Outbound channel for server-initiated notifications.
///
/// Delivery never blocks and never fails from the caller's point of view.
#[derive(Debug, Clone)]
pub enum NotificationSink {
    /// HTTP sessions: fan out to every open GET stream.
    Broadcast(broadcast::Sender<Value>),
    /// Stdio: feed the single writer task.
    Channel(mpsc::Sender<Value>),
    Discard,
}

impl NotificationSink {
    pub fn deliver(&self, message: Value) {
        match self {
            // No open stream is not an error.
            Self::Broadcast(tx) => {
                let _ = tx.send(message);
            }
            Self::Channel(tx) => {
                if tx.try_send(message).is_err() {
                    tracing::debug!("dropped client notification");
                }
            }
            Self::Discard => {}
        }
    }
}
