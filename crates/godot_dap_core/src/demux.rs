//! Routes decoded frames to pending callers or to the event log.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use serde_json::Value;
use tokio::{
    io::{AsyncRead, BufReader},
    sync::{oneshot, OwnedSemaphorePermit},
    time::Instant,
};
use tracing::{debug, warn};

use crate::{
    codec::{self, Frame},
    events::EventLog,
    types::{Event, ProtocolMessage, Response},
    DapError, Result,
};

/// Commands whose responses may be outstanding at the same time. Godot
/// answers `launch`/`attach` only after `configurationDone`, and is known to
/// reuse the wrong `request_seq` for them.
pub(crate) const HANDSHAKE_COMMANDS: [&str; 3] = ["launch", "attach", "configurationDone"];

pub(crate) type Delivery = oneshot::Sender<Result<Response>>;

pub(crate) struct PendingCall {
    pub seq: u64,
    pub command: String,
    pub deadline: Instant,
    slot: Delivery,
    /// Holds the single-flight gate until the call is resolved or dropped.
    _permit: Option<OwnedSemaphorePermit>,
}

impl PendingCall {
    pub fn new(
        seq: u64,
        command: impl Into<String>,
        deadline: Instant,
        slot: Delivery,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            seq,
            command: command.into(),
            deadline,
            slot,
            _permit: permit,
        }
    }

    fn deliver(self, result: Result<Response>) {
        if self.slot.send(result).is_err() {
            debug!(seq = self.seq, command = %self.command, "caller gave up before delivery");
        }
    }
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<u64, PendingCall>,
    /// Set once the connection is gone; further registrations fail.
    closed: Option<String>,
}

impl PendingTable {
    fn take_match(&mut self, response: &Response) -> Option<PendingCall> {
        if let Some(call) = self.calls.get(&response.request_seq) {
            if response.command.is_empty() || call.command == response.command {
                return self.calls.remove(&response.request_seq);
            }
        }

        if HANDSHAKE_COMMANDS.contains(&response.command.as_str()) {
            let seq = self
                .calls
                .values()
                .filter(|call| call.command == response.command)
                .map(|call| call.seq)
                .min()?;
            return self.calls.remove(&seq);
        }

        None
    }
}

/// Pending-call table plus event sink, shared by callers and the reader task.
pub(crate) struct Demultiplexer {
    pending: Mutex<PendingTable>,
    events: EventLog,
}

impl Demultiplexer {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(PendingTable::default()),
            events: EventLog::new(),
        }
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Prepare for a fresh connection.
    pub fn reopen(&self) {
        let mut table = self.table();
        table.closed = None;
        table.calls.clear();
        drop(table);
        self.events.reset();
    }

    pub fn register(&self, call: PendingCall) -> Result<()> {
        let mut table = self.table();
        if let Some(reason) = &table.closed {
            return Err(DapError::closed(reason.clone()));
        }
        table.calls.insert(call.seq, call);
        Ok(())
    }

    /// Drop a call without delivering anything (timeout or caller went away).
    pub fn cancel(&self, seq: u64) -> bool {
        self.table().calls.remove(&seq).is_some()
    }

    pub fn in_flight(&self) -> usize {
        self.table().calls.len()
    }

    /// Fail every pending call with `ConnectionClosed`. When `close` is set,
    /// later registrations are refused too.
    pub fn fail_all(&self, reason: &str, close: bool) {
        let drained: Vec<PendingCall> = {
            let mut table = self.table();
            if close {
                table.closed = Some(reason.to_string());
            }
            table.calls.drain().map(|(_, call)| call).collect()
        };
        for call in drained {
            call.deliver(Err(DapError::closed(reason.to_string())));
        }
    }

    /// Handle one decoded message. Returns the event, if it was one, so the
    /// session can apply lifecycle transitions before it is recorded.
    fn classify(&self, value: Value) -> Option<Event> {
        let message = match serde_json::from_value::<ProtocolMessage>(value) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "discarding unrecognized DAP frame");
                return None;
            }
        };

        match message {
            ProtocolMessage::Response(response) => {
                let matched = self.table().take_match(&response);
                match matched {
                    Some(call) => {
                        debug!(
                            seq = call.seq,
                            command = %call.command,
                            success = response.success,
                            overdue = Instant::now() > call.deadline,
                            "DAP response delivered"
                        );
                        call.deliver(Ok(response));
                    }
                    None => warn!(
                        request_seq = response.request_seq,
                        command = %response.command,
                        "discarding DAP response with no pending request"
                    ),
                }
                None
            }
            ProtocolMessage::Event(event) => Some(event),
            ProtocolMessage::Request(request) => {
                warn!(command = %request.command, "ignoring reverse DAP request");
                None
            }
        }
    }
}

/// Read frames until the connection fails, then return the fatal error.
/// `on_event` runs for every event before it reaches the event log.
pub(crate) async fn run<R, F>(reader: R, demux: &Demultiplexer, on_event: F) -> DapError
where
    R: AsyncRead + Unpin,
    F: Fn(&Event),
{
    let mut reader = BufReader::new(reader);
    loop {
        match codec::read_frame(&mut reader).await {
            Ok(Frame::Message(value)) => {
                if let Some(event) = demux.classify(value) {
                    debug!(event = %event.event, "DAP event");
                    on_event(&event);
                    demux.events.record(event);
                }
            }
            Ok(Frame::Malformed { length, error }) => {
                warn!(length, error = %error, "discarding DAP frame with invalid JSON body");
            }
            Err(e) => return e,
        }
    }
}
