//! Line-delimited request router: one task per request, one locked output sink.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::Mutex,
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::protocol::{parse_request, RpcError, RpcRequest, RpcResponse, PARSE_ERROR};

#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// `None` means no reply is written (notifications).
    async fn handle(&self, request: RpcRequest) -> Option<RpcResponse>;
}

/// Writes whole reply lines; concurrent writers never interleave.
pub struct OutputSink<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for OutputSink<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> OutputSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    pub async fn send(&self, response: &RpcResponse) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(response)?;
        line.push(b'\n');

        let mut writer = self.inner.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await
    }
}

pub struct Router<H> {
    handler: Arc<H>,
}

impl<H: RequestHandler> Router<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Serve until `input` reaches EOF, then wait for in-flight requests.
    pub async fn serve<R, W>(&self, input: R, output: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let sink = OutputSink::new(output);
        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();
        let mut workers = JoinSet::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            while let Some(finished) = workers.try_join_next() {
                report_worker(finished);
            }

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    warn!(error = %e, "rejected request line that is not UTF-8");
                    let reply = RpcResponse::error(
                        serde_json::Value::Null,
                        RpcError::new(PARSE_ERROR, format!("Parse error: {e}")),
                    );
                    sink.send(&reply).await?;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            let request = match parse_request(line) {
                Ok(request) => request,
                Err(reply) => {
                    warn!("rejected malformed request line");
                    if let Some(reply) = reply {
                        sink.send(&reply).await?;
                    }
                    continue;
                }
            };

            debug!(
                method = %request.method,
                id = ?request.id,
                notification = request.is_notification(),
                "dispatching request"
            );
            let handler = Arc::clone(&self.handler);
            let sink = sink.clone();
            workers.spawn(async move {
                let method = request.method.clone();
                if let Some(response) = handler.handle(request).await {
                    if let Err(e) = sink.send(&response).await {
                        error!(%method, error = %e, "failed to write reply");
                    }
                }
            });
        }

        info!(in_flight = workers.len(), "input closed, draining requests");
        while let Some(finished) = workers.join_next().await {
            report_worker(finished);
        }
        Ok(())
    }
}

fn report_worker(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "request worker failed");
    }
}
