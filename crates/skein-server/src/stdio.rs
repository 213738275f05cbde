//! Delimiter-framed JSON-RPC over stdin/stdout
//!
//! Stdout carries frames only; logging must go to stderr while this runs.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use skein_mcp::router::McpRouter;
use skein_mcp::transport::framing::{frame, Framer};

use crate::error::{ServerError, ServerResult};

const READ_CHUNK: usize = 8 * 1024;

/// Requests still being routed. Finished tasks are reaped before each spawn.
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<()>,
}

impl InFlight {
    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap();
        self.tasks.spawn(task);
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            log_join_error(result);
        }
    }

    async fn drain(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            log_join_error(result);
        }
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        warn!(error = %e, "stdio request task failed");
    }
}

/// Serve the router on the process's own stdin and stdout until stdin closes
pub async fn run_stdio(router: Arc<McpRouter>, delimiter: &str, max_frame_size: usize) -> ServerResult<()> {
    serve_framed(router, delimiter, max_frame_size, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Read frames from `reader`, route each concurrently and write framed replies to `writer`
pub async fn serve_framed<R, W>(
    router: Arc<McpRouter>,
    delimiter: &str,
    max_frame_size: usize,
    mut reader: R,
    mut writer: W,
) -> ServerResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut framer = Framer::new(delimiter.as_bytes().to_vec(), max_frame_size)
        .map_err(|e| ServerError::Config(e.to_string()))?;
    let delimiter = delimiter.as_bytes().to_vec();

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let output = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            writer.write_all(&bytes).await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    info!("serving MCP on stdio");
    let mut in_flight = InFlight::default();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        for frame_result in framer.push(&buf[..n]) {
            let payload = match frame_result {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "dropping oversized frame");
                    continue;
                }
            };
            if payload.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let router = Arc::clone(&router);
            let tx = tx.clone();
            let delimiter = delimiter.clone();
            in_flight.spawn(async move {
                if let Some(reply) = router.handle_bytes(&payload).await {
                    let _ = tx.send(frame(reply.to_string().as_bytes(), &delimiter));
                }
            });
        }
    }

    if framer.buffered() > 0 {
        debug!(bytes = framer.buffered(), "discarding unterminated trailing input");
    }
    in_flight.drain().await;
    drop(tx);

    output
        .await
        .map_err(|e| ServerError::Internal(format!("stdio writer failed: {}", e)))??;
    info!("stdin closed; stdio session finished");
    Ok(())
}
