//! Problem / context / remediation messages for tool failures.

use std::fmt;

use godot_dap_core::{DapError, SessionState};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    /// Bad or missing arguments; maps to JSON-RPC invalid params.
    #[error("{0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(Problem),
}

impl ToolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }
}

impl From<Problem> for ToolError {
    fn from(problem: Problem) -> Self {
        Self::Failed(problem)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remediation: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Error class from the core, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl Problem {
    pub fn new(problem: impl Into<String>) -> Self {
        Self {
            problem: problem.into(),
            context: None,
            remediation: Vec::new(),
            cause: None,
            kind: None,
        }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn suggest(mut self, step: impl Into<String>) -> Self {
        self.remediation.push(step.into());
        self
    }

    pub fn cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Wrap a core error, adding hints that fit its class.
    pub fn from_dap(problem: impl Into<String>, error: &DapError) -> Self {
        let mut out = Self::new(problem).cause(error);
        out.kind = Some(error.kind());
        match error {
            DapError::State { state, .. } => out = with_state_hints(out, *state),
            DapError::Timeout { command, .. } => {
                out = out
                    .context(format!("command={command}"))
                    .suggest("The game may be frozen or busy; try godot_pause, then retry")
                    .suggest("Check that the Godot editor is still responsive");
            }
            DapError::ConnectionClosed(_) | DapError::Framing(_) | DapError::Io(_) => {
                out = out
                    .suggest("The connection to Godot was lost; call godot_connect again")
                    .suggest("Ensure the Godot editor is still running");
            }
            DapError::Unsupported { .. } => {
                out = out.suggest("Use godot_step_over or godot_continue instead");
            }
            DapError::Remote { command, .. } => {
                out = out.context(format!("command={command}"));
            }
            _ => {}
        }
        out
    }
}

fn with_state_hints(problem: Problem, state: SessionState) -> Problem {
    let problem = problem.context(format!("Current state: {state}"));
    match state {
        SessionState::Disconnected => problem.suggest("Call godot_connect() to establish a connection"),
        SessionState::Connected | SessionState::Initialized => problem
            .suggest("Call godot_launch_main_scene() (or another launch tool) to start the game"),
        SessionState::Running => problem
            .suggest("Pause the game with godot_pause or wait for a breakpoint (godot_wait_for_stop)"),
        SessionState::Terminated => problem
            .suggest("The game has exited; call godot_disconnect, then godot_connect and launch again"),
        SessionState::Configuring | SessionState::Paused => problem,
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.problem)?;
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        if !self.remediation.is_empty() {
            f.write_str("\n\nSuggestions:")?;
            for (i, step) in self.remediation.iter().enumerate() {
                write!(f, "\n{}. {step}", i + 1)?;
            }
        }
        if let Some(cause) = &self.cause {
            write!(f, "\n\nError details: {cause}")?;
        }
        Ok(())
    }
}

pub fn not_connected() -> Problem {
    Problem::new("Not connected to Godot DAP server")
        .suggest("Call godot_connect() to establish a connection")
        .suggest("Ensure Godot editor is running")
}
