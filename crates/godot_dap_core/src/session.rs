//! Connection lifecycle, command legality and the request primitive.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use serde::Serialize;
use serde_json::Value;
use tokio::{
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::{oneshot, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    codec,
    config::DapConfig,
    demux::{self, Demultiplexer, PendingCall},
    events::EventLog,
    seq::SeqAllocator,
    types::{Capabilities, DisconnectArguments, Event, ProtocolMessage, Request, Response},
    DapError, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connected,
    Initialized,
    Configuring,
    Running,
    Paused,
    Terminated,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Initialized => "initialized",
            Self::Configuring => "configuring",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Terminated => "terminated",
        }
    }

    /// States in which `command` may be issued.
    pub fn legal_states(command: &str) -> &'static [SessionState] {
        use SessionState::*;
        match command {
            "connect" => &[Disconnected],
            "initialize" => &[Connected],
            "launch" | "attach" => &[Initialized],
            "configurationDone" | "setExceptionBreakpoints" => &[Configuring],
            // Godot accepts breakpoint edits while the game runs.
            "setBreakpoints" => &[Configuring, Running, Paused],
            "next" | "stepIn" | "stepOut" => &[Paused],
            "disconnect" | "terminate" => &[
                Connected,
                Initialized,
                Configuring,
                Running,
                Paused,
                Terminated,
            ],
            _ => &[Running, Paused],
        }
    }

    pub fn permits(self, command: &str) -> bool {
        Self::legal_states(command).contains(&self)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    /// Stops observed on the current connection.
    stops: u64,
}

/// State shared with the reader task. Holds no socket, so the reader never
/// keeps a connection alive on its own.
struct Shared {
    lifecycle: Mutex<Lifecycle>,
    demux: Demultiplexer,
    generation: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> SessionState {
        self.lock().state
    }

    fn set_state(&self, next: SessionState) {
        let mut lifecycle = self.lock();
        transition(&mut lifecycle, next);
    }

    /// Move to `to` only when currently in one of `from`.
    fn advance(&self, from: &[SessionState], to: SessionState) -> bool {
        let mut lifecycle = self.lock();
        if from.contains(&lifecycle.state) {
            transition(&mut lifecycle, to);
            true
        } else {
            false
        }
    }

    fn observe_event(&self, event: &Event) {
        use SessionState::*;
        match event.event.as_str() {
            "stopped" => {
                let mut lifecycle = self.lock();
                lifecycle.stops += 1;
                if matches!(lifecycle.state, Configuring | Running | Paused) {
                    transition(&mut lifecycle, Paused);
                }
            }
            "continued" => {
                self.advance(&[Paused], Running);
            }
            "terminated" | "exited" => {
                self.advance(&[Configuring, Running, Paused], Terminated);
            }
            _ => {}
        }
    }

    fn connection_lost(&self, generation: u64, error: DapError) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        warn!(error = %error, "DAP connection lost");
        self.set_state(SessionState::Terminated);
        self.demux.fail_all(&error.to_string(), true);
        self.set_state(SessionState::Disconnected);
    }
}

fn transition(lifecycle: &mut Lifecycle, next: SessionState) {
    if lifecycle.state != next {
        debug!(from = %lifecycle.state, to = %next, "session state change");
        lifecycle.state = next;
    }
}

struct Connection {
    peer: String,
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Removes a pending call when its waiter goes away (timeout or cancel).
struct PendingGuard<'a> {
    demux: &'a Demultiplexer,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.demux.cancel(self.seq) {
            debug!(seq = self.seq, "abandoned pending DAP request");
        }
    }
}

/// `launch`/`attach` request whose response arrives only after
/// `configurationDone`. Dropping it forgets the pending call.
pub struct DeferredResponse {
    command: String,
    seq: u64,
    rx: oneshot::Receiver<Result<Response>>,
    shared: Arc<Shared>,
}

impl DeferredResponse {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub async fn wait(mut self, timeout: Duration) -> Result<Response> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(delivered)) => delivered?.into_result(),
            Ok(Err(_)) => Err(DapError::closed(format!(
                "'{}' was abandoned by the session",
                self.command
            ))),
            Err(_) => Err(DapError::timeout(self.command.clone(), timeout)),
        }
    }
}

impl Drop for DeferredResponse {
    fn drop(&mut self) {
        self.shared.demux.cancel(self.seq);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchIntent {
    pub command: String,
    pub arguments: Value,
}

/// One debug session against one adapter connection at a time.
pub struct Session {
    config: DapConfig,
    seq: SeqAllocator,
    shared: Arc<Shared>,
    /// Single-flight gate: one permit, held by the in-flight call.
    gate: Arc<Semaphore>,
    /// Issue lock. Held only while a request is registered and written.
    connection: tokio::sync::Mutex<Option<Connection>>,
    /// Serializes connect and disconnect.
    lifecycle: tokio::sync::Mutex<()>,
    project_root: Mutex<Option<PathBuf>>,
    capabilities: Mutex<Option<Capabilities>>,
    intent: Mutex<Option<LaunchIntent>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Session {
    pub fn new(config: DapConfig) -> Self {
        Self {
            config,
            seq: SeqAllocator::new(),
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle {
                    state: SessionState::Disconnected,
                    stops: 0,
                }),
                demux: Demultiplexer::new(),
                generation: AtomicU64::new(0),
            }),
            gate: Arc::new(Semaphore::new(1)),
            connection: tokio::sync::Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            project_root: Mutex::new(None),
            capabilities: Mutex::new(None),
            intent: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DapConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn events(&self) -> &EventLog {
        self.shared.demux.events()
    }

    /// Calls currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.shared.demux.in_flight()
    }

    pub fn project_root(&self) -> Option<PathBuf> {
        locked(&self.project_root).clone()
    }

    pub fn set_project_root(&self, root: Option<&Path>) {
        *locked(&self.project_root) = root.map(Path::to_path_buf);
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        locked(&self.capabilities).clone()
    }

    pub fn launch_intent(&self) -> Option<LaunchIntent> {
        locked(&self.intent).clone()
    }

    /// Reject `command` locally if the current state does not allow it.
    pub fn check(&self, command: &str) -> Result<()> {
        let state = self.state();
        if state.permits(command) {
            return Ok(());
        }
        let allowed = SessionState::legal_states(command)
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Err(DapError::State {
            command: command.to_string(),
            state,
            allowed,
        })
    }

    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.check("connect")?;

        let address = format!("{host}:{port}");
        info!(%address, "connecting to Godot debug adapter");

        let timeout = self.config.connect_timeout;
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| DapError::timeout("connect", timeout))?
            .map_err(|source| DapError::Connect {
                address: address.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let (read_half, writer) = stream.into_split();

        // Callers that see Connected queue on this lock until the slot is filled.
        let mut slot = self.connection.lock().await;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.demux.reopen();
        *locked(&self.capabilities) = None;
        *locked(&self.intent) = None;

        let shared = Arc::clone(&self.shared);
        let reader = tokio::spawn(async move {
            let error =
                demux::run(read_half, &shared.demux, |event| shared.observe_event(event)).await;
            shared.connection_lost(generation, error);
        });
        *slot = Some(Connection {
            peer: address,
            writer,
            reader,
        });

        {
            let mut lifecycle = self.shared.lock();
            lifecycle.stops = 0;
            transition(&mut lifecycle, SessionState::Connected);
        }
        Ok(())
    }

    /// Send `disconnect`, fail every outstanding call and drop the socket.
    /// The session ends up Disconnected even when the adapter does not answer.
    pub async fn disconnect(&self, terminate_debuggee: Option<bool>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.check("disconnect")?;

        let reason = "session disconnected";
        self.shared.set_state(SessionState::Terminated);
        self.shared.demux.fail_all(reason, false);

        let timeout = self.config.disconnect_timeout;
        let deadline = Instant::now() + timeout;
        let arguments = serde_json::to_value(DisconnectArguments { terminate_debuggee })?;
        // Bypasses the gate: whoever held it was just failed.
        let outcome = match tokio::time::timeout_at(
            deadline,
            self.exchange("disconnect", Some(arguments), deadline, false),
        )
        .await
        {
            Ok(result) => result.and_then(Response::into_result).map(|_| ()),
            Err(_) => Err(DapError::timeout("disconnect", timeout)),
        };
        if let Err(e) = &outcome {
            warn!(error = %e, "disconnect was not acknowledged");
        }

        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.demux.fail_all(reason, true);
        self.connection.lock().await.take();
        self.shared.set_state(SessionState::Disconnected);
        info!("DAP session closed");
        outcome
    }

    /// Issue `command` and wait for its response under `timeout`. A failed
    /// response is returned as [`DapError::Remote`].
    pub async fn request(
        &self,
        command: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<Response> {
        self.check(command)?;
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, self.exchange(command, arguments, deadline, true))
            .await
        {
            Ok(result) => result?.into_result(),
            Err(_) => {
                warn!(command, ?timeout, "DAP request timed out");
                Err(DapError::timeout(command, timeout))
            }
        }
    }

    /// Issue `launch` or `attach` without waiting for the response. The gate
    /// is released right after the write so configuration can proceed.
    pub async fn begin_deferred(&self, command: &str, arguments: Value) -> Result<DeferredResponse> {
        self.check(command)?;
        let timeout = self.config.command_timeout;
        let deadline = Instant::now() + timeout;

        let permit = tokio::time::timeout_at(deadline, self.acquire_gate())
            .await
            .map_err(|_| DapError::timeout(command, timeout))??;
        self.check(command)?;

        let (seq, rx) = self
            .issue(command, Some(arguments.clone()), None, deadline)
            .await?;
        *locked(&self.intent) = Some(LaunchIntent {
            command: command.to_string(),
            arguments,
        });
        self.shared
            .advance(&[SessionState::Initialized], SessionState::Configuring);
        drop(permit);

        info!(seq, command, "waiting for configurationDone before launch response");
        Ok(DeferredResponse {
            command: command.to_string(),
            seq,
            rx,
            shared: Arc::clone(&self.shared),
        })
    }

    async fn acquire_gate(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.gate)
            .acquire_owned()
            .await
            .map_err(|_| DapError::closed("request gate closed"))
    }

    async fn exchange(
        &self,
        command: &str,
        arguments: Option<Value>,
        deadline: Instant,
        gated: bool,
    ) -> Result<Response> {
        let permit = if gated {
            let permit = self.acquire_gate().await?;
            // The state may have moved while this call was queued.
            self.check(command)?;
            Some(permit)
        } else {
            None
        };

        let (seq, rx) = self.issue(command, arguments, permit, deadline).await?;
        let _guard = PendingGuard {
            demux: &self.shared.demux,
            seq,
        };
        rx.await
            .map_err(|_| DapError::closed(format!("'{command}' was abandoned by the session")))?
    }

    /// Register the pending call, then write the request.
    async fn issue(
        &self,
        command: &str,
        arguments: Option<Value>,
        permit: Option<OwnedSemaphorePermit>,
        deadline: Instant,
    ) -> Result<(u64, oneshot::Receiver<Result<Response>>)> {
        let mut guard = self.connection.lock().await;
        let Some(connection) = guard.as_mut() else {
            return Err(DapError::closed("not connected to a debug adapter"));
        };

        let seq = self.seq.next();
        let message = ProtocolMessage::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });

        let (tx, rx) = oneshot::channel();
        self.shared
            .demux
            .register(PendingCall::new(seq, command, deadline, tx, permit))?;

        if let Err(e) = codec::write_frame(&mut connection.writer, &message).await {
            self.shared.demux.cancel(seq);
            warn!(seq, command, error = %e, "failed to write DAP request");
            return Err(e);
        }
        debug!(seq, command, peer = %connection.peer, "DAP request sent");
        Ok((seq, rx))
    }

    pub(crate) fn complete_initialize(&self, capabilities: Capabilities) {
        *locked(&self.capabilities) = Some(capabilities);
        self.shared
            .advance(&[SessionState::Connected], SessionState::Initialized);
    }

    /// Undo a launch/attach whose configuration did not complete, so it
    /// can be issued again. Returns whether the state was reset.
    pub(crate) fn abandon_configuration(&self, from: &[SessionState]) -> bool {
        let reset = self.shared.advance(from, SessionState::Initialized);
        if reset {
            *locked(&self.intent) = None;
        }
        reset
    }

    pub(crate) fn complete_configuration(&self) {
        self.shared
            .advance(&[SessionState::Configuring], SessionState::Running);
    }

    /// Marker taken before a resume command, see [`Session::resumed`].
    pub(crate) fn stop_marker(&self) -> u64 {
        self.shared.lock().stops
    }

    /// Running again, unless a stop already arrived since `marker`.
    pub(crate) fn resumed(&self, marker: u64) {
        let mut lifecycle = self.shared.lock();
        if lifecycle.stops == marker && lifecycle.state == SessionState::Paused {
            transition(&mut lifecycle, SessionState::Running);
        }
    }

    pub(crate) fn paused(&self) {
        self.shared
            .advance(&[SessionState::Running], SessionState::Paused);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daptest::MockDapServer;
    use serde_json::json;
    use std::time::Duration;

    async fn connected(server: &MockDapServer) -> Arc<Session> {
        let session = Arc::new(Session::new(DapConfig::default()));
        session
            .connect("127.0.0.1", server.port())
            .await
            .expect("connect to mock adapter");
        session
    }

    async fn wait_for_state(session: &Session, state: SessionState) {
        for _ in 0..200 {
            if session.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session stayed {} instead of {}", session.state(), state);
    }

    #[test]
    fn test_legality_table() {
        use SessionState::*;
        assert!(Disconnected.permits("connect"));
        assert!(!Connected.permits("connect"));
        assert!(Connected.permits("initialize"));
        assert!(Initialized.permits("launch"));
        assert!(Configuring.permits("setBreakpoints"));
        assert!(!Configuring.permits("threads"));
        assert!(Configuring.permits("configurationDone"));
        assert!(!Running.permits("configurationDone"));
        assert!(Paused.permits("next"));
        assert!(!Running.permits("stepIn"));
        assert!(Terminated.permits("disconnect"));
        assert!(!Terminated.permits("continue"));
        for command in ["initialize", "launch", "threads", "evaluate", "disconnect", "pause"] {
            assert!(!Disconnected.permits(command), "{command} allowed while disconnected");
        }
    }

    #[tokio::test]
    async fn test_initialize_right_after_connected_finds_the_connection() {
        let mut server = MockDapServer::start().await.expect("mock adapter");
        let session = Arc::new(Session::new(DapConfig::default()));

        let racer = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                while session.state() != SessionState::Connected {
                    tokio::task::yield_now().await;
                }
                session
                    .request("initialize", None, Duration::from_secs(2))
                    .await
            })
        };
        session
            .connect("127.0.0.1", server.port())
            .await
            .expect("connect to mock adapter");

        let initialize = server.expect_request("initialize").await;
        server.respond(&initialize, json!({})).await;
        racer
            .await
            .expect("racer task")
            .expect("initialize must not see a missing connection");
    }

    #[tokio::test]
    async fn test_illegal_command_writes_nothing() {
        let mut server = MockDapServer::start().await.expect("mock adapter");
        let session = connected(&server).await;

        for command in ["threads", "launch", "configurationDone", "next", "evaluate"] {
            let err = session
                .request(command, None, Duration::from_secs(1))
                .await
                .expect_err("command is illegal while connected");
            assert!(matches!(err, DapError::State { .. }), "{command}: {err}");
        }
        assert!(server.try_next_request(Duration::from_millis(100)).await.is_none());
        assert_eq!(server.frames_received(), 0);
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_bounded_and_session_stays_usable() {
        let mut server = MockDapServer::start().await.expect("mock adapter");
        let session = connected(&server).await;

        let started = std::time::Instant::now();
        let err = session
            .request("initialize", None, Duration::from_millis(50))
            .await
            .expect_err("silent adapter must time out");
        let elapsed = started.elapsed();
        assert!(matches!(err, DapError::Timeout { ref command, .. } if command == "initialize"), "{err}");
        assert!(elapsed < Duration::from_millis(150), "took {elapsed:?}");
        assert_eq!(session.in_flight(), 0);

        let first = server.expect_request("initialize").await;

        let retry = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .request("initialize", None, Duration::from_secs(2))
                    .await
            })
        };
        let second = server.expect_request("initialize").await;
        // The late answer to the timed-out call must be discarded.
        server.respond(&first, json!({"late": true})).await;
        server.respond(&second, json!({"late": false})).await;

        let response = retry
            .await
            .expect("retry task")
            .expect("retry should succeed");
        assert_eq!(response.request_seq, second.seq);
        assert_eq!(response.body, Some(json!({"late": false})));
    }

    #[tokio::test]
    async fn test_second_request_waits_for_first() {
        let mut server = MockDapServer::start().await.expect("mock adapter");
        let session = connected(&server).await;
        session.shared.set_state(SessionState::Paused);

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request("threads", None, Duration::from_secs(2)).await })
        };
        let threads = server.expect_request("threads").await;

        let second = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .request("stackTrace", Some(json!({"threadId": 1})), Duration::from_secs(2))
                    .await
            })
        };
        assert!(
            server.try_next_request(Duration::from_millis(100)).await.is_none(),
            "second request was written while the first was in flight"
        );

        server.respond(&threads, json!({"threads": []})).await;
        let stack = server.expect_request("stackTrace").await;
        assert!(stack.seq > threads.seq);
        server.respond(&stack, json!({"stackFrames": []})).await;

        assert!(first.await.expect("first task").is_ok());
        assert!(second.await.expect("second task").is_ok());
    }

    #[tokio::test]
    async fn test_events_before_response_do_not_change_result() {
        let mut server = MockDapServer::start().await.expect("mock adapter");
        let session = connected(&server).await;
        session.shared.set_state(SessionState::Running);

        let call = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request("threads", None, Duration::from_secs(2)).await })
        };
        let request = server.expect_request("threads").await;
        for i in 0..25 {
            server
                .send_event("output", json!({"category": "stdout", "output": format!("line {i}\n")}))
                .await;
        }
        server
            .respond(&request, json!({"threads": [{"id": 1, "name": "Main"}]}))
            .await;

        let response = call.await.expect("task").expect("threads should succeed");
        assert_eq!(response.body, Some(json!({"threads": [{"id": 1, "name": "Main"}]})));
        assert_eq!(session.events().recent(0).len(), 25);
    }

    #[tokio::test]
    async fn test_remote_error_is_surfaced() {
        let mut server = MockDapServer::start().await.expect("mock adapter");
        let session = connected(&server).await;
        session.shared.set_state(SessionState::Paused);

        let call = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .request("evaluate", Some(json!({"expression": "nope"})), Duration::from_secs(2))
                    .await
            })
        };
        let request = server.expect_request("evaluate").await;
        server.respond_error(&request, "Invalid expression").await;

        match call.await.expect("task") {
            Err(DapError::Remote { command, message, .. }) => {
                assert_eq!(command, "evaluate");
                assert_eq!(message, "Invalid expression");
            }
            other => panic!("Expected Remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_calls_immediately() {
        let mut server = MockDapServer::start().await.expect("mock adapter");
        let session = connected(&server).await;
        session.shared.set_state(SessionState::Running);

        let stuck = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request("pause", None, Duration::from_secs(30)).await })
        };
        server.expect_request("pause").await;

        let closing = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.disconnect(None).await })
        };
        let err = tokio::time::timeout(Duration::from_secs(1), stuck)
            .await
            .expect("pending call must fail promptly")
            .expect("task")
            .expect_err("pending call is cancelled");
        assert!(matches!(err, DapError::ConnectionClosed(_)), "{err}");

        let disconnect = server.expect_request("disconnect").await;
        server.respond(&disconnect, json!({})).await;
        closing
            .await
            .expect("task")
            .expect("disconnect acknowledged");
        assert_eq!(session.state(), SessionState::Disconnected);

        let err = session
            .request("threads", None, Duration::from_secs(1))
            .await
            .expect_err("session is disconnected");
        assert!(matches!(err, DapError::State { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_connection_loss_fails_pending_and_resets_state() {
        let mut server = MockDapServer::start().await.expect("mock adapter");
        let session = connected(&server).await;
        session.shared.set_state(SessionState::Paused);

        let call = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request("variables", None, Duration::from_secs(30)).await })
        };
        server.expect_request("variables").await;
        server.close().await;

        let err = call.await.expect("task").expect_err("connection dropped");
        assert!(matches!(err, DapError::ConnectionClosed(_)), "{err}");
        wait_for_state(&session, SessionState::Disconnected).await;
    }

    #[tokio::test]
    async fn test_framing_error_closes_connection() {
        let server = MockDapServer::start().await.expect("mock adapter");
        let session = connected(&server).await;
        server.send_raw(b"this is not a header\r\n\r\n").await;
        wait_for_state(&session, SessionState::Disconnected).await;
    }

    #[tokio::test]
    async fn test_stop_events_drive_running_and_paused() {
        let server = MockDapServer::start().await.expect("mock adapter");
        let session = connected(&server).await;
        session.shared.set_state(SessionState::Running);

        server
            .send_event("stopped", json!({"reason": "breakpoint", "threadId": 1}))
            .await;
        wait_for_state(&session, SessionState::Paused).await;

        server.send_event("continued", json!({"threadId": 1})).await;
        wait_for_state(&session, SessionState::Running).await;

        server.send_event("terminated", json!({})).await;
        wait_for_state(&session, SessionState::Terminated).await;
        assert!(session.check("disconnect").is_ok());
        assert!(session.check("continue").is_err());
    }

    #[tokio::test]
    async fn test_resume_does_not_override_newer_stop() {
        let server = MockDapServer::start().await.expect("mock adapter");
        let session = connected(&server).await;
        session.shared.set_state(SessionState::Paused);

        let marker = session.stop_marker();
        server.send_event("stopped", json!({"reason": "step"})).await;
        wait_for_state(&session, SessionState::Paused).await;
        for _ in 0..200 {
            if session.stop_marker() > marker {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        session.resumed(marker);
        assert_eq!(session.state(), SessionState::Paused);

        session.resumed(session.stop_marker());
        assert_eq!(session.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_connect_refused_is_reported() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe port");
            listener.local_addr().expect("local addr").port()
        };
        let session = Session::new(DapConfig::default());
        let err = session
            .connect("127.0.0.1", port)
            .await
            .expect_err("nothing listens on the probe port");
        assert!(matches!(err, DapError::Connect { .. }), "{err}");
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
