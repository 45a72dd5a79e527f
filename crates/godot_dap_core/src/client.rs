use std::{path::{Path, PathBuf}, sync::Arc, time::Duration};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    events::{RecordedEvent, StoppedInfo},
    session::{DeferredResponse, Session, SessionState},
    types::{
        Breakpoint, Capabilities, ContinueResponseBody, EvaluateArguments, EvaluateResponseBody,
        InitializeArguments, Response, Scope, ScopesArguments, ScopesResponseBody,
        SetBreakpointsArguments, SetBreakpointsResponseBody, Source, SourceBreakpoint,
        StackTraceArguments, StackTraceResponseBody, Thread, ThreadArguments,
        ThreadsResponseBody, Variable, VariablesArguments, VariablesResponseBody,
    },
    DapConfig, DapError, Result,
};

/// Breakpoints to install for one file during the configuration phase.
#[derive(Debug, Clone)]
pub struct BreakpointRequest {
    pub file: String,
    pub lines: Vec<i64>,
}

impl BreakpointRequest {
    pub fn new(file: impl Into<String>, lines: Vec<i64>) -> Self {
        Self {
            file: file.into(),
            lines,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileBreakpoints {
    pub file: String,
    pub breakpoints: Vec<Breakpoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchOutcome {
    pub command: String,
    pub breakpoints: Vec<FileBreakpoints>,
    pub body: Option<Value>,
}

fn arguments<T: Serialize>(value: T) -> Result<Option<Value>> {
    Ok(Some(serde_json::to_value(value)?))
}

fn unverified(lines: &[i64], error: &DapError) -> Vec<Breakpoint> {
    lines
        .iter()
        .map(|&line| Breakpoint {
            id: None,
            verified: false,
            line: Some(line),
            message: Some(error.to_string()),
            source: None,
        })
        .collect()
}

fn thread(thread_id: i64) -> Result<Option<Value>> {
    arguments(ThreadArguments { thread_id })
}

/// Typed DAP commands over a shared [`Session`].
#[derive(Clone)]
pub struct DapClient {
    session: Arc<Session>,
}

impl DapClient {
    pub fn new(config: DapConfig) -> Self {
        Self {
            session: Arc::new(Session::new(config)),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &DapConfig {
        self.session.config()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn project_root(&self) -> Option<PathBuf> {
        self.session.project_root()
    }

    pub fn set_project_root(&self, root: Option<&Path>) {
        self.session.set_project_root(root);
    }

    async fn call(&self, command: &str, args: Option<Value>) -> Result<Response> {
        self.session
            .request(command, args, self.config().command_timeout)
            .await
    }

    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.session.connect(host, port).await
    }

    /// Negotiate capabilities, then give the adapter a moment to send
    /// `initialized`. A missing event is logged, not fatal.
    pub async fn initialize(&self) -> Result<Capabilities> {
        let response = self
            .call("initialize", arguments(InitializeArguments::godot())?)
            .await?;
        let capabilities: Capabilities = response.body_or_default()?;
        self.session.complete_initialize(capabilities.clone());

        let wait = self.config().initialized_event_timeout;
        if !self.session.events().wait_for_initialized(wait).await {
            warn!(?wait, "no 'initialized' event from debug adapter; continuing");
        }
        Ok(capabilities)
    }

    pub async fn launch(&self, args: Value) -> Result<DeferredResponse> {
        self.session.begin_deferred("launch", args).await
    }

    pub async fn attach(&self, args: Value) -> Result<DeferredResponse> {
        self.session.begin_deferred("attach", args).await
    }

    /// Replace every breakpoint in `file` with `lines`. An empty slice clears them.
    pub async fn set_breakpoints(&self, file: &str, lines: &[i64]) -> Result<Vec<Breakpoint>> {
        let args = SetBreakpointsArguments {
            source: Source::from_path(file),
            breakpoints: lines.iter().copied().map(SourceBreakpoint::at_line).collect(),
            lines: lines.to_vec(),
        };
        let response = self.call("setBreakpoints", arguments(args)?).await?;
        Ok(response
            .body_or_default::<SetBreakpointsResponseBody>()?
            .breakpoints)
    }

    pub async fn configuration_done(&self) -> Result<()> {
        self.call("configurationDone", None).await?;
        self.session.complete_configuration();
        Ok(())
    }

    async fn resume(&self, command: &str, thread_id: i64, timeout: Duration) -> Result<Response> {
        let marker = self.session.stop_marker();
        let response = self
            .session
            .request(command, thread(thread_id)?, timeout)
            .await?;
        self.session.resumed(marker);
        Ok(response)
    }

    pub async fn continue_thread(&self, thread_id: i64) -> Result<ContinueResponseBody> {
        self.resume("continue", thread_id, self.config().command_timeout)
            .await?
            .body_or_default()
    }

    pub async fn next(&self, thread_id: i64) -> Result<()> {
        self.resume("next", thread_id, self.config().command_timeout)
            .await
            .map(|_| ())
    }

    pub async fn step_in(&self, thread_id: i64) -> Result<()> {
        self.resume("stepIn", thread_id, self.config().command_timeout)
            .await
            .map(|_| ())
    }

    /// Godot's adapter never answers `stepOut`. A missing answer within the
    /// short step-out deadline is reported as [`DapError::Unsupported`].
    pub async fn step_out(&self, thread_id: i64) -> Result<()> {
        let timeout = self.config().step_out_timeout;
        match self.resume("stepOut", thread_id, timeout).await {
            Ok(_) => Ok(()),
            Err(DapError::Timeout { .. }) => Err(DapError::Unsupported {
                command: "stepOut".to_string(),
                reason: format!(
                    "no response within {timeout:?}; the Godot debug adapter does not implement stepOut, use next or continue"
                ),
            }),
            Err(e) => Err(e),
        }
    }

    pub async fn pause(&self, thread_id: i64) -> Result<()> {
        self.call("pause", thread(thread_id)?).await?;
        self.session.paused();
        Ok(())
    }

    pub async fn threads(&self) -> Result<Vec<Thread>> {
        let response = self.call("threads", None).await?;
        Ok(response.body_or_default::<ThreadsResponseBody>()?.threads)
    }

    pub async fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: i64,
        levels: i64,
    ) -> Result<StackTraceResponseBody> {
        let args = StackTraceArguments {
            thread_id,
            start_frame,
            levels,
        };
        self.call("stackTrace", arguments(args)?)
            .await?
            .body_or_default()
    }

    pub async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        let response = self
            .call("scopes", arguments(ScopesArguments { frame_id })?)
            .await?;
        Ok(response.body_or_default::<ScopesResponseBody>()?.scopes)
    }

    pub async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>> {
        let response = self
            .call(
                "variables",
                arguments(VariablesArguments {
                    variables_reference,
                })?,
            )
            .await?;
        Ok(response.body_or_default::<VariablesResponseBody>()?.variables)
    }

    pub async fn evaluate(
        &self,
        expression: &str,
        frame_id: i64,
        context: &str,
    ) -> Result<EvaluateResponseBody> {
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: context.to_string(),
        };
        self.call("evaluate", arguments(args)?).await?.body_as()
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect(None).await
    }

    /// `launch`, then breakpoints, then `configurationDone`, then the
    /// deferred `launch` response.
    pub async fn launch_and_configure(
        &self,
        args: Value,
        breakpoints: &[BreakpointRequest],
    ) -> Result<LaunchOutcome> {
        self.handshake("launch", args, breakpoints).await
    }

    pub async fn attach_and_configure(
        &self,
        args: Value,
        breakpoints: &[BreakpointRequest],
    ) -> Result<LaunchOutcome> {
        self.handshake("attach", args, breakpoints).await
    }

    async fn handshake(
        &self,
        command: &str,
        args: Value,
        breakpoints: &[BreakpointRequest],
    ) -> Result<LaunchOutcome> {
        let deferred = self.session.begin_deferred(command, args).await?;

        let mut installed = Vec::with_capacity(breakpoints.len());
        for request in breakpoints {
            let breakpoints = match self.set_breakpoints(&request.file, &request.lines).await {
                Ok(breakpoints) => breakpoints,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(file = %request.file, error = %e, "breakpoints rejected during configuration");
                    unverified(&request.lines, &e)
                }
            };
            installed.push(FileBreakpoints {
                file: request.file.clone(),
                breakpoints,
            });
        }

        if let Err(e) = self.configuration_done().await {
            drop(deferred);
            if self.session.abandon_configuration(&[SessionState::Configuring]) {
                warn!(command, error = %e, "configuration failed, session is back to initialized");
            }
            return Err(e);
        }
        let response = match deferred.wait(self.config().command_timeout).await {
            Ok(response) => response,
            Err(e @ DapError::Remote { .. }) => {
                // The adapter refused to start the debuggee.
                self.session
                    .abandon_configuration(&[SessionState::Configuring, SessionState::Running]);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        info!(command, breakpoint_files = installed.len(), "debuggee started");

        Ok(LaunchOutcome {
            command: command.to_string(),
            breakpoints: installed,
            body: response.body,
        })
    }

    pub fn last_stop(&self) -> Option<StoppedInfo> {
        self.session.events().last_stop()
    }

    pub fn stop_count(&self) -> u64 {
        self.session.events().stop_count()
    }

    pub async fn wait_for_stop(&self, after: u64, timeout: Duration) -> Result<StoppedInfo> {
        self.session.events().wait_for_stop(after, timeout).await
    }

    pub fn recent_events(&self, since: u64) -> Vec<RecordedEvent> {
        self.session.events().recent(since)
    }
}

impl Default for DapClient {
    fn default() -> Self {
        Self::new(DapConfig::default())
    }
}
