//! Godot DAP Core
//!
//! An async client for the Debug Adapter Protocol as spoken by the Godot editor
//! (TCP, `Content-Length` framed JSON, default port 6006). Provides the wire codec,
//! a response/event demultiplexer, a session state machine that enforces the
//! launch/configurationDone handshake, and a typed command surface.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod godot;
pub mod seq;
pub mod session;
pub mod types;

mod demux;

#[cfg(any(test, feature = "test-util"))]
pub mod daptest;

// Re-export commonly used types
pub use client::{BreakpointRequest, DapClient, FileBreakpoints, LaunchOutcome};
pub use config::DapConfig;
pub use error::DapError;
pub use events::{EventLog, RecordedEvent, StopReason, StoppedInfo};
pub use godot::{GodotLaunchConfig, LaunchPlatform, SceneTarget};
pub use session::{DeferredResponse, Session, SessionState};

/// Result type alias using DapError
pub type Result<T> = std::result::Result<T, DapError>;
