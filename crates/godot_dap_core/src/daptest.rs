//! In-process stand-in for the Godot debug adapter, for tests.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use serde_json::{json, Value};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpListener},
    sync::{mpsc, Mutex},
    task::JoinHandle,
};

use crate::{
    codec::{self, Frame},
    types::Request,
};

const EXPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts one client on `127.0.0.1:<ephemeral>` and records every request it
/// sends. Responses and events are written only when the test asks.
pub struct MockDapServer {
    port: u16,
    requests: mpsc::UnboundedReceiver<Request>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    received: Arc<AtomicUsize>,
    seq: AtomicU64,
    task: JoinHandle<()>,
}

impl MockDapServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (tx, requests) = mpsc::unbounded_channel();
        let writer = Arc::new(Mutex::new(None));
        let received = Arc::new(AtomicUsize::new(0));

        let task = {
            let writer = Arc::clone(&writer);
            let received = Arc::clone(&received);
            tokio::spawn(async move {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let (read_half, write_half) = stream.into_split();
                *writer.lock().await = Some(write_half);

                let mut reader = BufReader::new(read_half);
                while let Ok(frame) = codec::read_frame(&mut reader).await {
                    received.fetch_add(1, Ordering::SeqCst);
                    if let Frame::Message(value) = frame {
                        match serde_json::from_value::<Request>(value) {
                            Ok(request) => {
                                if tx.send(request).is_err() {
                                    return;
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "mock adapter got a non-request frame"),
                        }
                    }
                }
            })
        };

        Ok(Self {
            port,
            requests,
            writer,
            received,
            seq: AtomicU64::new(1000),
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of frames read from the client so far.
    pub fn frames_received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    pub async fn next_request(&mut self) -> Request {
        tokio::time::timeout(EXPECT_TIMEOUT, self.requests.recv())
            .await
            .expect("timed out waiting for a DAP request")
            .expect("mock adapter connection ended")
    }

    pub async fn expect_request(&mut self, command: &str) -> Request {
        let request = self.next_request().await;
        assert_eq!(request.command, command, "unexpected request {request:?}");
        request
    }

    pub async fn try_next_request(&mut self, wait: Duration) -> Option<Request> {
        tokio::time::timeout(wait, self.requests.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn respond(&self, request: &Request, body: Value) {
        self.send_response(request.seq, &request.command, true, Some(body), None)
            .await;
    }

    pub async fn respond_error(&self, request: &Request, message: &str) {
        self.send_response(request.seq, &request.command, false, None, Some(message))
            .await;
    }

    pub async fn send_response(
        &self,
        request_seq: u64,
        command: &str,
        success: bool,
        body: Option<Value>,
        message: Option<&str>,
    ) {
        let mut response = json!({
            "type": "response",
            "seq": self.seq.fetch_add(1, Ordering::SeqCst),
            "request_seq": request_seq,
            "success": success,
            "command": command,
        });
        if let Some(body) = body {
            response["body"] = body;
        }
        if let Some(message) = message {
            response["message"] = json!(message);
        }
        self.send_value(&response).await;
    }

    pub async fn send_event(&self, event: &str, body: Value) {
        let event = json!({
            "type": "event",
            "seq": self.seq.fetch_add(1, Ordering::SeqCst),
            "event": event,
            "body": body,
        });
        self.send_value(&event).await;
    }

    pub async fn send_value(&self, value: &Value) {
        let framed = codec::encode(value).expect("mock frame should encode");
        self.send_raw(&framed).await;
    }

    pub async fn send_raw(&self, bytes: &[u8]) {
        for _ in 0..500 {
            {
                let mut writer = self.writer.lock().await;
                if let Some(writer) = writer.as_mut() {
                    writer
                        .write_all(bytes)
                        .await
                        .expect("mock adapter write should succeed");
                    writer.flush().await.expect("mock adapter flush should succeed");
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no client connected to the mock adapter");
    }

    /// Answer `initialize` with a small capability set and emit `initialized`.
    pub async fn complete_initialize(&mut self) {
        let request = self.expect_request("initialize").await;
        self.respond(
            &request,
            json!({
                "supportsConfigurationDoneRequest": true,
                "supportsSetVariable": false
            }),
        )
        .await;
        self.send_event("initialized", json!({})).await;
    }

    /// Drop the write side so the client sees EOF.
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

impl Drop for MockDapServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
