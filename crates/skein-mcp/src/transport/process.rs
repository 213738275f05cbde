//! Child-process transport for MCP
//!
//! Requests go to the child's stdin and responses come back on its stdout,
//! both delimiter-framed. The child's stderr is forwarded to the log.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::validate_request;
use crate::transport::framing::{frame, Framer};
use crate::transport::{
    Connection, ConnectionState, Transport, TransportCore, TransportError, TransportEvent,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::types::{McpNotification, McpRequest, McpResponse};

/// How long a child gets to exit after stdin closes before it is killed
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Process transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Only UTF-8 is supported
    pub encoding: String,
    pub delimiter: String,
    /// Per-call timeout
    pub timeout_ms: u64,
    pub max_message_size: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            encoding: "utf-8".to_string(),
            delimiter: "\n".to_string(),
            timeout_ms: 30_000,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ProcessConfig {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.command.trim().is_empty() {
            return Err(TransportError::Config("process command is empty".to_string()));
        }
        if !matches!(self.encoding.to_ascii_lowercase().as_str(), "utf-8" | "utf8") {
            return Err(TransportError::Config(format!(
                "unsupported encoding '{}', only utf-8 is supported",
                self.encoding
            )));
        }
        if self.delimiter.is_empty() {
            return Err(TransportError::Config("frame delimiter must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Signals that can be delivered to the child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
    Hangup,
}

impl Signal {
    #[cfg(unix)]
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Hangup => libc::SIGHUP,
        }
    }
}

struct Session {
    generation: u64,
    pid: Option<u32>,
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    kill: Option<oneshot::Sender<()>>,
    watcher: JoinHandle<()>,
}

struct Shared {
    config: ProcessConfig,
    core: TransportCore,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    /// Set while a manual disconnect is tearing the child down
    stopping: AtomicBool,
}

/// Process transport for MCP communication
pub struct ProcessTransport {
    shared: Arc<Shared>,
}

impl ProcessTransport {
    pub fn new(config: ProcessConfig) -> Self {
        let max = config.max_message_size;
        Self {
            shared: Arc::new(Shared {
                config,
                core: TransportCore::new(max),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                stopping: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.shared.config
    }

    /// OS process id of the running child
    pub fn pid(&self) -> Option<u32> {
        self.shared.session.lock().as_ref().and_then(|s| s.pid)
    }

    /// Stop the child and spawn a fresh one
    pub async fn restart(&self) -> Result<(), TransportError> {
        info!(command = %self.shared.config.command, "restarting process transport");
        self.disconnect().await?;
        self.connect().await
    }

    /// Deliver an OS signal to the child
    pub fn signal(&self, signal: Signal) -> Result<(), TransportError> {
        let pid = self
            .pid()
            .ok_or_else(|| TransportError::Process("process is not running".to_string()))?;
        send_signal(pid, signal)
    }

    async fn write_frame(&self, payload: String) -> Result<(), TransportError> {
        let stdin = self
            .shared
            .session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.stdin))
            .ok_or_else(|| TransportError::Process("process is not running".to_string()))?;

        let bytes = frame(payload.as_bytes(), self.shared.config.delimiter.as_bytes());
        let mut guard = stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| TransportError::Process("process input is closed".to_string()))?;
        stdin
            .write_all(&bytes)
            .await
            .map_err(|e| TransportError::Process(format!("failed to write to process: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| TransportError::Process(format!("failed to flush process input: {}", e)))?;
        self.shared.core.touch();
        Ok(())
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> Result<(), TransportError> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| TransportError::Process(format!("pid {} out of range", pid)))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal.as_raw()) };
    if rc == -1 {
        return Err(TransportError::Io(std::io::Error::last_os_error()));
    }
    debug!(pid, ?signal, "sent signal to process");
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, signal: Signal) -> Result<(), TransportError> {
    Err(TransportError::Unsupported(format!(
        "signal {:?} is not supported on this platform",
        signal
    )))
}

impl Shared {
    async fn read_stdout(self: Arc<Self>, mut stdout: ChildStdout) {
        let mut framer = match Framer::new(self.config.delimiter.as_bytes(), self.config.max_message_size) {
            Ok(framer) => framer,
            Err(e) => {
                self.core.emit_error(TransportError::Config(e.to_string()));
                return;
            }
        };
        let mut chunk = vec![0u8; 8192];
        loop {
            match stdout.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    for frame in framer.push(&chunk[..n]) {
                        match frame {
                            Ok(bytes) => self.core.receive(&bytes),
                            Err(e) => self.core.emit_error(TransportError::Protocol(e.to_string())),
                        }
                    }
                }
                Err(e) => {
                    self.core.emit_error(TransportError::Io(e));
                    break;
                }
            }
        }
        if framer.buffered() > 0 {
            debug!(bytes = framer.buffered(), "discarding unterminated output");
        }
    }

    async fn watch(
        self: Arc<Self>,
        generation: u64,
        mut child: Child,
        kill: oneshot::Receiver<()>,
        reader: JoinHandle<()>,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill process");
                }
                child.wait().await
            }
        };
        let reason = match status {
            Ok(status) => format!("process exited with {}", status),
            Err(e) => format!("failed to wait for process: {}", e),
        };
        // Let the reader drain whatever the child wrote before exiting.
        if tokio::time::timeout(Duration::from_millis(500), reader).await.is_err() {
            debug!("stdout reader still running after exit");
        }
        self.exited(generation, reason);
    }

    fn exited(&self, generation: u64, reason: String) {
        let session = {
            let mut slot = self.session.lock();
            match slot.as_ref() {
                Some(session) if session.generation == generation => slot.take(),
                _ => None,
            }
        };
        // A manual disconnect already took the session and will report it.
        if session.is_none() || self.stopping.load(Ordering::SeqCst) {
            debug!(generation, reason = %reason, "process stopped");
            return;
        }

        warn!(command = %self.config.command, reason = %reason, "process exited unexpectedly");
        let detail = reason.clone();
        self.core
            .mark_disconnected(&reason, || TransportError::Process(detail.clone()));
        self.core.emit_error(TransportError::Process(reason));
    }
}

async fn forward_stderr(command: String, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "skein_mcp::process::stderr", command = %command, "{}", line);
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.shared.core.state() == ConnectionState::Connected {
            return Ok(());
        }
        let config = &self.shared.config;
        config.validate()?;
        self.shared.stopping.store(false, Ordering::SeqCst);
        self.shared.core.begin_connection();

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            self.shared.core.set_state(ConnectionState::Error);
            TransportError::Process(format!("failed to spawn '{}': {}", config.command, e))
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            self.shared.core.set_state(ConnectionState::Error);
            return Err(TransportError::Process("child stdio was not captured".to_string()));
        };
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(config.command.clone(), stderr));
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pid = child.id();
        let reader = tokio::spawn(Arc::clone(&self.shared).read_stdout(stdout));
        let (kill_tx, kill_rx) = oneshot::channel();
        let watcher = tokio::spawn(Arc::clone(&self.shared).watch(generation, child, kill_rx, reader));

        *self.shared.session.lock() = Some(Session {
            generation,
            pid,
            stdin: Arc::new(tokio::sync::Mutex::new(Some(stdin))),
            kill: Some(kill_tx),
            watcher,
        });
        self.shared.core.mark_connected();
        info!(command = %config.command, pid = ?pid, "process transport started");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.shared.stopping.store(true, Ordering::SeqCst);
        let session = self.shared.session.lock().take();

        if let Some(mut session) = session {
            // Closing stdin asks a well-behaved child to exit on its own.
            drop(session.stdin.lock().await.take());
            if tokio::time::timeout(EXIT_GRACE, &mut session.watcher).await.is_err() {
                if let Some(kill) = session.kill.take() {
                    let _ = kill.send(());
                }
                if tokio::time::timeout(EXIT_GRACE, &mut session.watcher).await.is_err() {
                    session.watcher.abort();
                }
            }
        }

        if self.shared.core.state() != ConnectionState::Disconnected {
            self.shared.core.mark_disconnected("client disconnect", || {
                TransportError::ConnectionClosed("process transport disconnected".to_string())
            });
            debug!(command = %self.shared.config.command, "process transport stopped");
        }
        Ok(())
    }

    async fn send(&self, request: McpRequest) -> Result<McpResponse, TransportError> {
        if self.shared.core.state() != ConnectionState::Connected {
            return Err(TransportError::Process("process is not running".to_string()));
        }
        validate_request(&request)?;
        let payload = self.shared.core.encode(&request)?;

        let timeout = Duration::from_millis(self.shared.config.timeout_ms);
        let call = self.shared.core.pending.register(request.id.clone(), timeout)?;
        self.write_frame(payload).await?;
        call.wait().await
    }

    async fn notify(&self, notification: McpNotification) -> Result<(), TransportError> {
        if self.shared.core.state() != ConnectionState::Connected {
            return Err(TransportError::Process("process is not running".to_string()));
        }
        let payload = self.shared.core.encode(&notification)?;
        self.write_frame(payload).await
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.core.subscribe()
    }

    fn connection(&self) -> Connection {
        self.shared.core.connection()
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        if let Some(mut session) = self.shared.session.lock().take() {
            if let Some(kill) = session.kill.take() {
                let _ = kill.send(());
            }
        }
    }
}
