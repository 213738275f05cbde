//! WebSocket transport for MCP
//!
//! A persistent duplex connection with heartbeat supervision and bounded
//! automatic reconnection. Each live socket is a `Session` of three tasks
//! (writer, reader, heartbeat); whoever takes the session out of the shared
//! slot owns the disconnect.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};
use url::Url;

use crate::protocol::validate_request;
use crate::transport::{
    Connection, ConnectionState, Transport, TransportCore, TransportError, TransportEvent,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::types::{McpNotification, McpRequest, McpResponse};

/// WebSocket transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// `ws://` or `wss://` endpoint
    pub url: String,
    pub handshake_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_interval_ms: u64,
    /// Zero disables the heartbeat
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            handshake_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            max_reconnect_attempts: 5,
            reconnect_interval_ms: 1_000,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 10_000,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

struct Session {
    generation: u64,
    outbound: mpsc::UnboundedSender<WsMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Session {
    fn abort(self) {
        self.writer.abort();
        self.reader.abort();
        if let Some(heartbeat) = self.heartbeat {
            heartbeat.abort();
        }
    }
}

struct Shared {
    config: WebSocketConfig,
    core: TransportCore,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    reconnect_attempts: AtomicU32,
    /// Set by a manual disconnect; suppresses reconnection
    closing: AtomicBool,
    pong: Notify,
    supervisor: Mutex<Option<mpsc::UnboundedSender<u32>>>,
}

/// WebSocket transport for MCP communication
pub struct WebSocketTransport {
    shared: Arc<Shared>,
}

impl WebSocketTransport {
    pub fn new(config: WebSocketConfig) -> Self {
        let max = config.max_message_size;
        Self {
            shared: Arc::new(Shared {
                config,
                core: TransportCore::new(max),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                reconnect_attempts: AtomicU32::new(0),
                closing: AtomicBool::new(false),
                pong: Notify::new(),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Reconnect attempts made since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.shared.config
    }

    fn ensure_supervisor(&self) {
        let mut slot = self.shared.supervisor.lock();
        if slot.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(supervise(Arc::downgrade(&self.shared), rx));
            *slot = Some(tx);
        }
    }
}

impl Shared {
    /// Open a socket and install a fresh session
    async fn establish(self: &Arc<Self>) -> Result<(), TransportError> {
        let url = Url::parse(&self.config.url)
            .map_err(|e| TransportError::Config(format!("invalid WebSocket URL '{}': {}", self.config.url, e)))?;

        self.core.begin_connection();
        let handshake = Duration::from_millis(self.config.handshake_timeout_ms);
        let stream = match tokio::time::timeout(handshake, connect_async(url.as_str())).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                return Err(self.connect_failed(format!("WebSocket connection failed: {}", e)));
            }
            Err(_) => {
                return Err(self.connect_failed(format!("handshake timed out after {:?}", handshake)));
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (mut sink, mut stream) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();

        let shared = Arc::clone(self);
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    shared.connection_lost(generation, format!("write failed: {}", e));
                    return;
                }
            }
            let _ = sink.close().await;
        });

        let shared = Arc::clone(self);
        let reader = tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => shared.core.receive(text.as_bytes()),
                    Some(Ok(WsMessage::Binary(data))) => shared.core.receive(&data),
                    Some(Ok(WsMessage::Pong(_))) => {
                        shared.core.touch();
                        shared.pong.notify_waiters();
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!("closed by peer: {} {}", frame.code, frame.reason),
                            None => "closed by peer".to_string(),
                        };
                    }
                    Some(Ok(_)) => shared.core.touch(),
                    Some(Err(e)) => break format!("read failed: {}", e),
                    None => break "stream ended".to_string(),
                }
            };
            shared.connection_lost(generation, reason);
        });

        let heartbeat = (self.config.ping_interval_ms > 0).then(|| {
            let shared = Arc::clone(self);
            let outbound = outbound.clone();
            tokio::spawn(async move { shared.heartbeat(generation, outbound).await })
        });

        let previous = self.session.lock().replace(Session {
            generation,
            outbound,
            writer,
            reader,
            heartbeat,
        });
        if let Some(stale) = previous {
            stale.abort();
        }

        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.core.mark_connected();
        info!(url = %self.config.url, generation, "WebSocket connected");
        Ok(())
    }

    fn connect_failed(&self, message: String) -> TransportError {
        self.core.set_state(ConnectionState::Error);
        let err = TransportError::Connection(message.clone());
        self.core.emit_error(TransportError::Connection(message));
        err
    }

    async fn heartbeat(&self, generation: u64, outbound: mpsc::UnboundedSender<WsMessage>) {
        let period = Duration::from_millis(self.config.ping_interval_ms);
        let pong_timeout = Duration::from_millis(self.config.pong_timeout_ms);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            ticker.tick().await;
            let pong = self.pong.notified();
            tokio::pin!(pong);
            pong.as_mut().enable();

            if outbound.send(WsMessage::Ping(Vec::new())).is_err() {
                return;
            }
            if tokio::time::timeout(pong_timeout, pong).await.is_err() {
                warn!(generation, ?pong_timeout, "no pong received, dropping connection");
                self.connection_lost(generation, "pong timeout".to_string());
                return;
            }
        }
    }

    /// Tear down the session `generation` if it is still the live one
    fn connection_lost(&self, generation: u64, reason: String) {
        let session = {
            let mut slot = self.session.lock();
            match slot.as_ref() {
                Some(session) if session.generation == generation => slot.take(),
                _ => None,
            }
        };
        let Some(session) = session else {
            return;
        };
        session.abort();

        warn!(generation, reason = %reason, "WebSocket connection lost");
        let detail = reason.clone();
        self.core
            .mark_disconnected(&reason, || TransportError::ConnectionClosed(detail.clone()));
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let max = self.config.max_reconnect_attempts;
        if self.reconnect_attempts.load(Ordering::SeqCst) >= max {
            self.core.set_state(ConnectionState::Error);
            self.core.emit_error(TransportError::Connection(format!(
                "giving up after {} reconnect attempts",
                max
            )));
            return;
        }

        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.core.set_state(ConnectionState::Reconnecting);
        self.core.emit(TransportEvent::Reconnecting { attempt });
        info!(attempt, max, "scheduling WebSocket reconnect");

        let scheduled = self
            .supervisor
            .lock()
            .as_ref()
            .map(|tx| tx.send(attempt).is_ok())
            .unwrap_or(false);
        if !scheduled {
            self.core.set_state(ConnectionState::Error);
            self.core
                .emit_error(TransportError::Connection("reconnect supervisor is gone".to_string()));
        }
    }
}

/// Runs scheduled reconnects one at a time
async fn supervise(shared: Weak<Shared>, mut attempts: mpsc::UnboundedReceiver<u32>) {
    while let Some(attempt) = attempts.recv().await {
        let interval = match shared.upgrade() {
            Some(shared) => Duration::from_millis(shared.config.reconnect_interval_ms),
            None => return,
        };
        tokio::time::sleep(interval).await;

        let Some(shared) = shared.upgrade() else {
            return;
        };
        if shared.closing.load(Ordering::SeqCst) {
            continue;
        }
        match shared.establish().await {
            Ok(()) => info!(attempt, "WebSocket reconnected"),
            Err(e) => {
                warn!(attempt, error = %e, "WebSocket reconnect failed");
                shared.schedule_reconnect();
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.shared.core.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.shared.closing.store(false, Ordering::SeqCst);
        self.ensure_supervisor();
        self.shared.establish().await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.shared.closing.store(true, Ordering::SeqCst);
        let session = self.shared.session.lock().take();

        if let Some(session) = session {
            let _ = session.outbound.send(WsMessage::Close(None));
            session.reader.abort();
            if let Some(heartbeat) = session.heartbeat {
                heartbeat.abort();
            }
            // Dropping the last sender lets the writer flush the close frame and exit.
            drop(session.outbound);
            let mut writer = session.writer;
            if tokio::time::timeout(Duration::from_secs(1), &mut writer).await.is_err() {
                writer.abort();
            }
        }

        if self.shared.core.state() != ConnectionState::Disconnected {
            self.shared.core.mark_disconnected("client disconnect", || {
                TransportError::ConnectionClosed("transport disconnected".to_string())
            });
            debug!(url = %self.shared.config.url, "WebSocket disconnected");
        }
        Ok(())
    }

    async fn send(&self, request: McpRequest) -> Result<McpResponse, TransportError> {
        if self.shared.core.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        validate_request(&request)?;
        let payload = self.shared.core.encode(&request)?;

        let timeout = Duration::from_millis(self.shared.config.request_timeout_ms);
        let call = self.shared.core.pending.register(request.id.clone(), timeout)?;

        let outbound = self
            .shared
            .session
            .lock()
            .as_ref()
            .map(|session| session.outbound.clone())
            .ok_or(TransportError::NotConnected)?;
        outbound
            .send(WsMessage::Text(payload))
            .map_err(|_| TransportError::ConnectionClosed("writer stopped".to_string()))?;
        self.shared.core.touch();

        call.wait().await
    }

    async fn notify(&self, notification: McpNotification) -> Result<(), TransportError> {
        if self.shared.core.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let payload = self.shared.core.encode(&notification)?;
        let outbound = self
            .shared
            .session
            .lock()
            .as_ref()
            .map(|session| session.outbound.clone())
            .ok_or(TransportError::NotConnected)?;
        outbound
            .send(WsMessage::Text(payload))
            .map_err(|_| TransportError::ConnectionClosed("writer stopped".to_string()))?;
        self.shared.core.touch();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.core.subscribe()
    }

    fn connection(&self) -> Connection {
        self.shared.core.connection()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        if let Some(session) = self.shared.session.lock().take() {
            session.abort();
        }
        // Closing the channel stops the supervisor.
        self.shared.supervisor.lock().take();
    }
}
