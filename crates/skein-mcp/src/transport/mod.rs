//! Transport abstraction layer for MCP
//!
//! Every transport correlates `send` calls with inbound responses through its
//! own [`PendingCalls`] registry and publishes everything else (unsolicited
//! messages, errors, state transitions) on a broadcast event stream.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod framing;
pub mod http;
pub mod process;
pub mod websocket;

pub use self::http::{Backoff, HttpConfig, HttpTransport};
pub use self::process::{ProcessConfig, ProcessTransport, Signal};
pub use self::websocket::{WebSocketConfig, WebSocketTransport};

use crate::pending::PendingCalls;
use crate::protocol::{check_size, validate_response, ValidationError};
use crate::types::{error_codes, McpError, McpMessage, McpNotification, McpRequest, McpResponse, RequestId};

/// Default cap on a single encoded message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

const EVENT_CAPACITY: usize = 256;

/// Transport error type
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Request {id} timed out after {timeout:?}")]
    Timeout { id: RequestId, timeout: Duration },

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    /// Not connected, or the connection dropped mid-call
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TransportError::NotConnected
                | TransportError::ConnectionClosed(_)
                | TransportError::Connection(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

impl From<TransportError> for McpError {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::Timeout { .. } => error_codes::REQUEST_TIMEOUT,
            TransportError::Validation(_) => error_codes::INVALID_REQUEST,
            _ => error_codes::INTERNAL_ERROR,
        };
        McpError::new(code, err.to_string())
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of a transport's connection
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub id: Uuid,
    pub state: ConnectionState,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
}

impl Connection {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: ConnectionState::Disconnected,
            connected_at: None,
            last_activity: Utc::now(),
        }
    }
}

/// Everything a transport reports outside of `send` results
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32 },
    /// Requests, notifications, and responses nobody was waiting for
    Message(McpMessage),
    Error(Arc<TransportError>),
}

/// Core transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying channel
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the channel and fail every outstanding call
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Send a request and wait for its correlated response
    async fn send(&self, request: McpRequest) -> Result<McpResponse, TransportError>;

    /// Send a notification; no response is expected
    async fn notify(&self, notification: McpNotification) -> Result<(), TransportError>;

    /// Subscribe to connection, message and error events
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Current connection snapshot
    fn connection(&self) -> Connection;

    fn state(&self) -> ConnectionState {
        self.connection().state
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// State shared by every transport variant
pub(crate) struct TransportCore {
    connection: RwLock<Connection>,
    events: broadcast::Sender<TransportEvent>,
    pub(crate) pending: PendingCalls,
    pub(crate) max_message_size: usize,
}

impl TransportCore {
    pub(crate) fn new(max_message_size: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connection: RwLock::new(Connection::new()),
            events,
            pending: PendingCalls::new(),
            max_message_size,
        }
    }

    pub(crate) fn connection(&self) -> Connection {
        self.connection.read().clone()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.connection.read().state
    }

    /// Start a fresh connection identity in the connecting state
    pub(crate) fn begin_connection(&self) {
        let mut conn = self.connection.write();
        conn.id = Uuid::new_v4();
        conn.state = ConnectionState::Connecting;
        conn.connected_at = None;
        conn.last_activity = Utc::now();
    }

    pub(crate) fn set_state(&self, state: ConnectionState) -> ConnectionState {
        let mut conn = self.connection.write();
        let previous = conn.state;
        conn.state = state;
        conn.last_activity = Utc::now();
        if state == ConnectionState::Connected {
            conn.connected_at = Some(conn.last_activity);
        }
        if previous != state {
            debug!(connection = %conn.id, from = %previous, to = %state, "connection state changed");
        }
        previous
    }

    pub(crate) fn touch(&self) {
        self.connection.write().last_activity = Utc::now();
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn emit_error(&self, error: TransportError) {
        warn!(error = %error, "transport error");
        self.emit(TransportEvent::Error(Arc::new(error)));
    }

    /// Mark connected and announce it
    pub(crate) fn mark_connected(&self) {
        self.set_state(ConnectionState::Connected);
        self.emit(TransportEvent::Connected);
    }

    /// Fail everything outstanding and announce the disconnect
    pub(crate) fn mark_disconnected<F>(&self, reason: &str, make_error: F)
    where
        F: Fn() -> TransportError,
    {
        self.pending.fail_all(make_error);
        self.set_state(ConnectionState::Disconnected);
        self.emit(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Encode an outgoing message, enforcing the size cap
    pub(crate) fn encode<T: Serialize>(&self, message: &T) -> Result<String, TransportError> {
        let json = serde_json::to_string(message)?;
        check_size(json.len(), self.max_message_size)?;
        Ok(json)
    }

    /// Decode one inbound payload and route what it contains
    pub(crate) fn receive(&self, bytes: &[u8]) {
        let trimmed = trim_ascii(bytes);
        if trimmed.is_empty() {
            return;
        }
        if let Err(e) = check_size(trimmed.len(), self.max_message_size) {
            self.emit_error(e.into());
            return;
        }
        let value: Value = match serde_json::from_slice(trimmed) {
            Ok(value) => value,
            Err(e) => {
                self.emit_error(ValidationError::Malformed(e.to_string()).into());
                return;
            }
        };
        self.touch();
        match value {
            Value::Array(items) => {
                for item in items {
                    self.route(item);
                }
            }
            single => self.route(single),
        }
    }

    fn route(&self, value: Value) {
        match McpMessage::from_value(value) {
            Ok(message) => self.dispatch(message),
            Err(e) => self.emit_error(e.into()),
        }
    }

    /// Responses resolve pending calls; everything else goes to subscribers
    pub(crate) fn dispatch(&self, message: McpMessage) {
        match message {
            McpMessage::Response(response) => {
                if let Err(e) = validate_response(&response) {
                    self.emit_error(e.into());
                    return;
                }
                if let Err(unsolicited) = self.pending.resolve(response) {
                    debug!(id = ?unsolicited.id, "unsolicited response");
                    self.emit(TransportEvent::Message(McpMessage::Response(unsolicited)));
                }
            }
            other => self.emit(TransportEvent::Message(other)),
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Serializable selection of a transport variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportSettings {
    #[serde(alias = "ws")]
    Websocket(WebSocketConfig),
    Http(HttpConfig),
    #[serde(alias = "stdio")]
    Process(ProcessConfig),
}

/// Build a transport from settings and connect it
pub async fn connect_transport(settings: TransportSettings) -> Result<Arc<dyn Transport>, TransportError> {
    let transport: Arc<dyn Transport> = match settings {
        TransportSettings::Websocket(config) => Arc::new(WebSocketTransport::new(config)),
        TransportSettings::Http(config) => Arc::new(HttpTransport::new(config)?),
        TransportSettings::Process(config) => Arc::new(ProcessTransport::new(config)),
    };
    transport.connect().await?;
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unsolicited_response_becomes_event() {
        let core = TransportCore::new(DEFAULT_MAX_MESSAGE_SIZE);
        let mut events = core.subscribe();

        core.receive(br#"{"jsonrpc":"2.0","id":"stray","result":{}}"#);

        match events.recv().await.unwrap() {
            TransportEvent::Message(McpMessage::Response(resp)) => {
                assert_eq!(resp.id, Some(RequestId::from("stray")));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_matching_response_resolves_pending() {
        let core = TransportCore::new(DEFAULT_MAX_MESSAGE_SIZE);
        let call = core.pending.register("1".into(), Duration::from_secs(5)).unwrap();

        core.receive(br#"{"jsonrpc":"2.0","id":"1","result":{"tools":[]}}"#);

        let resp = call.wait().await.unwrap();
        assert_eq!(resp.result, Some(json!({"tools": []})));
    }

    #[tokio::test]
    async fn test_malformed_input_reports_error() {
        let core = TransportCore::new(DEFAULT_MAX_MESSAGE_SIZE);
        let mut events = core.subscribe();

        core.receive(b"{not json");

        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_oversized_input_rejected() {
        let core = TransportCore::new(8);
        let mut events = core.subscribe();

        core.receive(br#"{"jsonrpc":"2.0","method":"x"}"#);

        match events.recv().await.unwrap() {
            TransportEvent::Error(err) => {
                assert!(matches!(*err, TransportError::Validation(ValidationError::TooLarge { .. })));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_state_transitions_track_connected_at() {
        let core = TransportCore::new(DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(core.state(), ConnectionState::Disconnected);
        core.begin_connection();
        assert_eq!(core.state(), ConnectionState::Connecting);
        core.mark_connected();
        let conn = core.connection();
        assert_eq!(conn.state, ConnectionState::Connected);
        assert!(conn.connected_at.is_some());
    }

    #[test]
    fn test_settings_tagged_by_type() {
        let settings: TransportSettings = serde_json::from_value(json!({
            "type": "process",
            "command": "cat"
        }))
        .unwrap();
        assert!(matches!(settings, TransportSettings::Process(ref c) if c.command == "cat"));
    }

    #[test]
    fn test_timeout_maps_to_timeout_code() {
        let err = TransportError::Timeout {
            id: "1".into(),
            timeout: Duration::from_millis(10),
        };
        assert_eq!(McpError::from(err).code, error_codes::REQUEST_TIMEOUT);
    }
}
