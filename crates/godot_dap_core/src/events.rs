//! Session-level sink for unsolicited DAP events.

use std::{
    collections::VecDeque,
    fmt,
    sync::Mutex,
    time::Duration,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{types::Event, DapError, Result};

pub const MAX_RECORDED_EVENTS: usize = 1024;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why the debuggee stopped. Adapters invent new reasons, so anything
/// unrecognized is carried as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StopReason {
    Breakpoint,
    Step,
    Pause,
    Exception,
    Entry,
    Other(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Breakpoint => "breakpoint",
            Self::Step => "step",
            Self::Pause => "pause",
            Self::Exception => "exception",
            Self::Entry => "entry",
            Self::Other(reason) => reason,
        }
    }
}

impl From<&str> for StopReason {
    fn from(reason: &str) -> Self {
        match reason {
            "breakpoint" => Self::Breakpoint,
            "step" => Self::Step,
            "pause" => Self::Pause,
            "exception" => Self::Exception,
            "entry" => Self::Entry,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StopReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StopReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let reason = String::deserialize(deserializer)?;
        Ok(Self::from(reason.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoppedInfo {
    pub reason: StopReason,
    pub thread_id: Option<i64>,
    pub description: Option<String>,
    pub text: Option<String>,
    pub all_threads_stopped: bool,
    pub hit_breakpoint_ids: Vec<i64>,
    /// Value of the stop counter once this stop was recorded.
    pub stop_index: u64,
}

impl StoppedInfo {
    fn from_event(event: &Event, stop_index: u64) -> Self {
        let body = event.body.as_ref();
        let text_field = |key: &str| {
            body.and_then(|b| b.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Self {
            reason: StopReason::from(text_field("reason").as_deref().unwrap_or("unknown")),
            thread_id: body.and_then(|b| b.get("threadId")).and_then(Value::as_i64),
            description: text_field("description"),
            text: text_field("text"),
            all_threads_stopped: body
                .and_then(|b| b.get("allThreadsStopped"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            hit_breakpoint_ids: body
                .and_then(|b| b.get("hitBreakpointIds"))
                .and_then(Value::as_array)
                .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
                .unwrap_or_default(),
            stop_index,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    /// Arrival index, starting at 1 for each connection.
    pub index: u64,
    pub event: String,
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct EventLogInner {
    recent: VecDeque<RecordedEvent>,
    next_index: u64,
    last_stop: Option<StoppedInfo>,
    stop_count: u64,
    initialized: bool,
}

/// Append-only record of events plus the derived "last stop" state.
#[derive(Debug)]
pub struct EventLog {
    inner: Mutex<EventLogInner>,
    notify: broadcast::Sender<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(EventLogInner::default()),
            notify,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EventLogInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an event in arrival order and wake any waiters.
    pub fn record(&self, event: Event) {
        {
            let mut inner = self.lock();
            inner.next_index += 1;
            let index = inner.next_index;

            match event.event.as_str() {
                "stopped" => {
                    inner.stop_count += 1;
                    let stop = StoppedInfo::from_event(&event, inner.stop_count);
                    inner.last_stop = Some(stop);
                }
                "initialized" => inner.initialized = true,
                _ => {}
            }

            if inner.recent.len() == MAX_RECORDED_EVENTS {
                inner.recent.pop_front();
            }
            inner.recent.push_back(RecordedEvent {
                index,
                event: event.event.clone(),
                body: event.body.clone(),
            });
        }

        // No receivers is the common case.
        let _ = self.notify.send(event);
    }

    /// Forget everything from a previous connection.
    pub fn reset(&self) {
        *self.lock() = EventLogInner::default();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.notify.subscribe()
    }

    /// Events with an index greater than `since`, oldest first.
    pub fn recent(&self, since: u64) -> Vec<RecordedEvent> {
        self.lock()
            .recent
            .iter()
            .filter(|event| event.index > since)
            .cloned()
            .collect()
    }

    pub fn last_stop(&self) -> Option<StoppedInfo> {
        self.lock().last_stop.clone()
    }

    pub fn stop_count(&self) -> u64 {
        self.lock().stop_count
    }

    pub fn initialized_seen(&self) -> bool {
        self.lock().initialized
    }

    /// Wait until a stop newer than `after` (a previous [`EventLog::stop_count`])
    /// has been recorded.
    pub async fn wait_for_stop(&self, after: u64, timeout: Duration) -> Result<StoppedInfo> {
        let mut events = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let inner = self.lock();
                if inner.stop_count > after {
                    if let Some(stop) = &inner.last_stop {
                        return Ok(stop.clone());
                    }
                }
            }

            match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) => return Err(DapError::timeout("stopped event", timeout)),
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(DapError::closed("event log dropped"))
                }
            }
        }
    }

    /// Returns `false` if the `initialized` event did not arrive in time.
    pub async fn wait_for_initialized(&self, timeout: Duration) -> bool {
        let mut events = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        while !self.initialized_seen() {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) | Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return self.initialized_seen()
                }
                Ok(_) => {}
            }
        }
        true
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
