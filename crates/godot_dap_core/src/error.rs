use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum DapError {
    /// Malformed or missing `Content-Length` header. Fatal for the connection.
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The adapter answered with `success: false`.
    #[error("DAP request '{command}' failed: {message}")]
    Remote {
        command: String,
        message: String,
        body: Option<Value>,
    },

    #[error("DAP request '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Cannot send '{command}' while session is {state} (allowed in: {allowed})")]
    State {
        command: String,
        state: SessionState,
        allowed: String,
    },

    #[error("DAP request '{command}' is not supported by the debug adapter: {reason}")]
    Unsupported { command: String, reason: String },

    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid launch configuration: {0}")]
    InvalidLaunch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DapError {
    pub fn remote(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            command: command.into(),
            message: message.into(),
            body: None,
        }
    }

    pub fn timeout(command: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            command: command.into(),
            timeout,
        }
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed(reason.into())
    }

    /// Errors after which the connection can no longer carry requests.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Framing(_) | Self::ConnectionClosed(_) | Self::Io(_)
        )
    }

    /// Short machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Framing(_) => "framing",
            Self::Protocol(_) => "protocol",
            Self::Remote { .. } => "remote",
            Self::Timeout { .. } => "timeout",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::State { .. } => "state",
            Self::Unsupported { .. } => "unsupported",
            Self::Connect { .. } => "connect",
            Self::InvalidLaunch(_) => "invalid_launch",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}
