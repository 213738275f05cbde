//! HTTP transport for MCP
//!
//! Each call is an independent POST, so "connected" only means the endpoint
//! answered a probe. Transient failures are retried with backoff.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::protocol::{check_size, validate_request, validate_response};
use crate::transport::{
    Connection, ConnectionState, Transport, TransportCore, TransportError, TransportEvent,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::types::{McpNotification, McpRequest, McpResponse, RequestId};

/// Longest error body kept in an HTTP error
const ERROR_BODY_LIMIT: usize = 512;

/// Delay growth between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Linear,
    Exponential,
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Backoff::Linear => base.saturating_mul(attempt),
            Backoff::Exponential => base.saturating_mul(2u32.saturating_pow(attempt - 1)),
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Endpoint every call is POSTed to
    pub base_url: String,
    pub headers: HashMap<String, String>,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Total attempts per call, including the first
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub backoff: Backoff,
    pub probe_method: String,
    /// Cap on concurrently outstanding calls; unlimited when unset
    pub max_concurrent_requests: Option<usize>,
    pub max_message_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/mcp".to_string(),
            headers: HashMap::new(),
            timeout_ms: 30_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            backoff: Backoff::Exponential,
            probe_method: "ping".to_string(),
            max_concurrent_requests: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// HTTP transport for MCP communication
pub struct HttpTransport {
    config: HttpConfig,
    client: reqwest::Client,
    endpoint: Url,
    core: TransportCore,
    cancel: Mutex<CancellationToken>,
    limiter: Option<Arc<Semaphore>>,
}

impl HttpTransport {
    /// Build the client; fails on an invalid URL or header
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let endpoint = Url::parse(&config.base_url)
            .map_err(|e| TransportError::Config(format!("invalid base URL '{}': {}", config.base_url, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Config(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Config(format!("invalid value for header '{}': {}", name, e)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Config(format!("failed to build HTTP client: {}", e)))?;

        let limiter = config
            .max_concurrent_requests
            .filter(|limit| *limit > 0)
            .map(|limit| Arc::new(Semaphore::new(limit)));

        Ok(Self {
            core: TransportCore::new(config.max_message_size),
            config,
            client,
            endpoint,
            cancel: Mutex::new(CancellationToken::new()),
            limiter,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Upper bound on one call including every retry and backoff delay
    fn call_deadline(&self) -> Duration {
        let attempts = self.config.retry_attempts.max(1);
        let base = Duration::from_millis(self.config.retry_delay_ms);
        let delays: Duration = (1..attempts).map(|n| self.config.backoff.delay(base, n)).sum();
        self.attempt_timeout() * attempts + delays + Duration::from_secs(1)
    }

    /// One POST attempt; the timeout covers the headers and the whole body
    async fn post(&self, body: &Value, label: &RequestId) -> Result<Option<Value>, TransportError> {
        let payload = serde_json::to_vec(body)?;
        check_size(payload.len(), self.config.max_message_size)?;

        let timeout = self.attempt_timeout();
        tokio::time::timeout(timeout, self.round_trip(payload, label))
            .await
            .map_err(|_| TransportError::Timeout {
                id: label.clone(),
                timeout,
            })?
    }

    async fn round_trip(&self, payload: Vec<u8>, label: &RequestId) -> Result<Option<Value>, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .body(payload)
            .send()
            .await
            .map_err(|e| classify(e, label, self.attempt_timeout()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > ERROR_BODY_LIMIT {
                let mut cut = ERROR_BODY_LIMIT;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify(e, label, self.attempt_timeout()))?;
        check_size(bytes.len(), self.config.max_message_size)?;
        self.core.touch();
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| TransportError::Protocol(format!("response is not valid JSON: {}", e)))
    }

    async fn exchange(&self, request: &McpRequest) -> Result<McpResponse, TransportError> {
        let body = serde_json::to_value(request)?;
        let value = self
            .post(&body, &request.id)
            .await?
            .ok_or_else(|| TransportError::Protocol("empty response body".to_string()))?;
        let response = decode_response(value)?;
        if response.id.as_ref() != Some(&request.id) {
            return Err(TransportError::Protocol(format!(
                "response id {:?} does not match request id {}",
                response.id, request.id
            )));
        }
        Ok(response)
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out
    async fn with_retry<T, F, Fut>(&self, label: &RequestId, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let attempts = self.config.retry_attempts.max(1);
        let base = Duration::from_millis(self.config.retry_delay_ms);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && is_transient(&e) => {
                    let delay = self.config.backoff.delay(base, attempt);
                    warn!(id = %label, attempt, ?delay, error = %e, "retrying HTTP call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn acquire(&self) -> Result<Option<tokio::sync::OwnedSemaphorePermit>, TransportError> {
        match &self.limiter {
            Some(limiter) => Arc::clone(limiter)
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| TransportError::ConnectionClosed("request limiter closed".to_string())),
            None => Ok(None),
        }
    }

    /// Submit several requests in one round trip.
    ///
    /// The outer error covers the round trip itself; each inner result is the
    /// independently validated response for the request at the same index.
    pub async fn send_batch(
        &self,
        requests: Vec<McpRequest>,
    ) -> Result<Vec<Result<McpResponse, TransportError>>, TransportError> {
        if self.core.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let Some(first) = requests.first() else {
            return Ok(Vec::new());
        };
        for request in &requests {
            validate_request(request)?;
        }
        let label = first.id.clone();
        let body = serde_json::to_value(&requests)?;
        let _permit = self.acquire().await?;
        let token = self.cancel.lock().clone();

        let (body, label) = (&body, &label);
        let work = self.with_retry(label, move || self.post(body, label));
        let value = tokio::select! {
            _ = token.cancelled() => {
                return Err(TransportError::ConnectionClosed("transport disconnected".to_string()));
            }
            value = work => value?,
        };

        let items = match value {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None => Vec::new(),
        };
        let mut by_id: HashMap<RequestId, Value> = HashMap::new();
        for item in items {
            if let Some(id) = item.get("id").cloned().and_then(|id| serde_json::from_value(id).ok()) {
                by_id.insert(id, item);
            }
        }

        Ok(requests
            .iter()
            .map(|request| match by_id.remove(&request.id) {
                Some(value) => decode_response(value),
                None => Err(TransportError::Protocol(format!(
                    "batch response is missing id {}",
                    request.id
                ))),
            })
            .collect())
    }
}

fn decode_response(value: Value) -> Result<McpResponse, TransportError> {
    let response: McpResponse = serde_json::from_value(value)
        .map_err(|e| TransportError::Protocol(format!("malformed response: {}", e)))?;
    validate_response(&response)?;
    Ok(response)
}

fn classify(err: reqwest::Error, id: &RequestId, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            id: id.clone(),
            timeout,
        }
    } else if let Some(status) = err.status() {
        TransportError::Http {
            status: status.as_u16(),
            body: err.to_string(),
        }
    } else {
        TransportError::Connection(err.to_string())
    }
}

/// Whether another attempt could succeed
pub fn is_transient(err: &TransportError) -> bool {
    match err {
        TransportError::Timeout { .. } | TransportError::Connection(_) | TransportError::Io(_) => true,
        TransportError::Http { status, .. } => *status == 408 || *status == 429 || *status >= 500,
        _ => false,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.core.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.core.begin_connection();
        *self.cancel.lock() = CancellationToken::new();

        let probe = McpRequest::new(self.config.probe_method.clone(), None);
        match self.exchange(&probe).await {
            Ok(response) => {
                if let Some(error) = &response.error {
                    // Any well-formed answer proves reachability.
                    debug!(method = %probe.method, code = error.code, "probe answered with an error");
                }
                self.core.mark_connected();
                info!(endpoint = %self.endpoint, "HTTP transport connected");
                Ok(())
            }
            Err(e) => {
                self.core.set_state(ConnectionState::Error);
                let message = format!("probe to {} failed: {}", self.endpoint, e);
                self.core.emit_error(TransportError::Connection(message.clone()));
                Err(TransportError::Connection(message))
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.cancel.lock().cancel();
        if self.core.state() != ConnectionState::Disconnected {
            self.core.mark_disconnected("client disconnect", || {
                TransportError::ConnectionClosed("transport disconnected".to_string())
            });
            debug!(endpoint = %self.endpoint, "HTTP transport disconnected");
        }
        Ok(())
    }

    async fn send(&self, request: McpRequest) -> Result<McpResponse, TransportError> {
        if self.core.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        validate_request(&request)?;
        let _permit = self.acquire().await?;

        let call = self.core.pending.register(request.id.clone(), self.call_deadline())?;
        let wait = call.wait();
        tokio::pin!(wait);
        let request = &request;
        let work = self.with_retry(&request.id, move || self.exchange(request));
        tokio::pin!(work);

        // A disconnect fails the pending entry, which ends `wait` and drops the work.
        let outcome = tokio::select! {
            biased;
            outcome = &mut wait => return outcome,
            outcome = &mut work => outcome,
        };
        match outcome {
            Ok(response) => {
                let _ = self.core.pending.resolve(response);
            }
            Err(e) => {
                self.core.pending.fail(&request.id, e);
            }
        }
        wait.await
    }

    async fn notify(&self, notification: McpNotification) -> Result<(), TransportError> {
        if self.core.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let body = serde_json::to_value(&notification)?;
        let label = RequestId::String(notification.method.clone());
        let (body, label) = (&body, &label);
        self.with_retry(label, move || self.post(body, label)).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.core.subscribe()
    }

    fn connection(&self) -> Connection {
        self.core.connection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delays() {
        let base = Duration::from_millis(100);
        assert_eq!(Backoff::Linear.delay(base, 1), Duration::from_millis(100));
        assert_eq!(Backoff::Linear.delay(base, 3), Duration::from_millis(300));
        assert_eq!(Backoff::Exponential.delay(base, 1), Duration::from_millis(100));
        assert_eq!(Backoff::Exponential.delay(base, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_transient_classification() {
        let http = |status| TransportError::Http {
            status,
            body: String::new(),
        };
        assert!(is_transient(&http(503)));
        assert!(is_transient(&http(429)));
        assert!(is_transient(&http(408)));
        assert!(!is_transient(&http(400)));
        assert!(!is_transient(&http(404)));
        assert!(is_transient(&TransportError::Connection("refused".into())));
        assert!(!is_transient(&TransportError::Protocol("bad json".into())));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut config = HttpConfig::new("http://localhost:1/mcp");
        config.headers.insert("bad header".into(), "x".into());
        assert!(matches!(HttpTransport::new(config), Err(TransportError::Config(_))));
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            HttpTransport::new(HttpConfig::new("::not a url::")),
            Err(TransportError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let transport = HttpTransport::new(HttpConfig::new("http://127.0.0.1:1/mcp")).unwrap();
        let err = transport.send(McpRequest::new("ping", None)).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
