//! Resume, step, pause and wait-for-stop.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use godot_dap_core::{SessionState, StoppedInfo};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    default_thread_id,
    errors::{Problem, ToolError},
    input_schema_for, parse_arguments, DebugContext, Tool, ToolRegistry,
};

const DEFAULT_WAIT_MS: u64 = 30_000;
const MAX_WAIT_MS: u64 = 300_000;

#[derive(Debug, Deserialize, JsonSchema)]
struct ThreadParams {
    /// Thread to act on (default: 1, Godot's main thread).
    #[serde(default = "default_thread_id")]
    thread_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct WaitForStopParams {
    /// How long to wait, in milliseconds (default: 30000).
    #[serde(default)]
    timeout_ms: Option<u64>,
    /// Only report a stop newer than this `stop_count` (as returned by the
    /// resume and step tools). Omit to return the current stop if paused.
    #[serde(default)]
    after: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Continue,
    StepOver,
    StepInto,
    StepOut,
    Pause,
}

impl Action {
    const ALL: [Action; 5] = [
        Action::Continue,
        Action::StepOver,
        Action::StepInto,
        Action::StepOut,
        Action::Pause,
    ];
}

pub struct ExecutionTool {
    context: Arc<DebugContext>,
    action: Action,
}

#[async_trait]
impl Tool for ExecutionTool {
    fn name(&self) -> &'static str {
        match self.action {
            Action::Continue => "godot_continue",
            Action::StepOver => "godot_step_over",
            Action::StepInto => "godot_step_into",
            Action::StepOut => "godot_step_out",
            Action::Pause => "godot_pause",
        }
    }

    fn description(&self) -> &'static str {
        match self.action {
            Action::Continue => {
                "Resume execution until the next breakpoint. Returns a stop_count to pass \
                 to godot_wait_for_stop."
            }
            Action::StepOver => "Execute the current line, stepping over function calls. Requires a paused game.",
            Action::StepInto => "Step into the function called on the current line. Requires a paused game.",
            Action::StepOut => {
                "Step out of the current function. Godot's debug adapter does not implement this; \
                 the call fails after a short wait. Use godot_step_over or godot_continue instead."
            }
            Action::Pause => "Pause the running game so its state can be inspected.",
        }
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<ThreadParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: ThreadParams = parse_arguments(arguments)?;
        let client = self.context.require_connected()?;
        let thread_id = params.thread_id;
        let stop_count = client.stop_count();

        let result = match self.action {
            Action::Continue => {
                let body = client
                    .continue_thread(thread_id)
                    .await
                    .map_err(|e| Problem::from_dap("Failed to continue execution", &e))?;
                json!({
                    "status": "continued",
                    "message": "Execution resumed",
                    "all_threads_continued": body.all_threads_continued,
                })
            }
            Action::StepOver => {
                client
                    .next(thread_id)
                    .await
                    .map_err(|e| Problem::from_dap("Failed to step over", &e))?;
                json!({"status": "stepped_over", "message": "Stepped over current line"})
            }
            Action::StepInto => {
                client
                    .step_in(thread_id)
                    .await
                    .map_err(|e| Problem::from_dap("Failed to step into", &e))?;
                json!({"status": "stepped_in", "message": "Stepped into function"})
            }
            Action::StepOut => {
                client
                    .step_out(thread_id)
                    .await
                    .map_err(|e| Problem::from_dap("Failed to step out", &e))?;
                json!({"status": "stepped_out", "message": "Stepped out of function"})
            }
            Action::Pause => {
                client.pause(thread_id).await.map_err(|e| {
                    Problem::from_dap("Failed to pause execution", &e)
                        .suggest("If already paused, use godot_get_stack_trace to inspect state")
                })?;
                json!({
                    "status": "paused",
                    "message": "Execution paused. Use godot_get_stack_trace to inspect current state, then godot_continue to resume.",
                })
            }
        };

        Ok(with_progress(result, thread_id, stop_count, client.state()))
    }
}

fn with_progress(mut result: Value, thread_id: i64, stop_count: u64, state: SessionState) -> Value {
    result["thread_id"] = json!(thread_id);
    result["stop_count"] = json!(stop_count);
    result["state"] = json!(state);
    result
}

fn stop_report(stop: &StoppedInfo, state: SessionState) -> Value {
    json!({
        "status": "stopped",
        "reason": stop.reason,
        "thread_id": stop.thread_id,
        "description": stop.description,
        "text": stop.text,
        "all_threads_stopped": stop.all_threads_stopped,
        "hit_breakpoint_ids": stop.hit_breakpoint_ids,
        "stop_count": stop.stop_index,
        "state": state,
    })
}

pub struct WaitForStopTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for WaitForStopTool {
    fn name(&self) -> &'static str {
        "godot_wait_for_stop"
    }

    fn description(&self) -> &'static str {
        "Wait until the game stops (breakpoint, step, pause or exception) and report where. \
         Other tools keep working while this waits."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<WaitForStopParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: WaitForStopParams = parse_arguments(arguments)?;
        let client = self.context.require_connected()?;
        let timeout = Duration::from_millis(
            params.timeout_ms.unwrap_or(DEFAULT_WAIT_MS).min(MAX_WAIT_MS),
        );

        let after = match params.after {
            Some(after) => after,
            None => {
                if client.state() == SessionState::Paused {
                    if let Some(stop) = client.last_stop() {
                        return Ok(stop_report(&stop, client.state()));
                    }
                }
                client.stop_count()
            }
        };

        let stop = client.wait_for_stop(after, timeout).await.map_err(|e| {
            Problem::from_dap("Game did not stop", &e)
                .context(format!("waited {}ms", timeout.as_millis()))
                .suggest("Check that a breakpoint is set on a line that runs")
                .suggest("Use godot_pause to stop the game immediately")
        })?;
        Ok(stop_report(&stop, client.state()))
    }
}

pub fn register(registry: &mut ToolRegistry, context: &Arc<DebugContext>) {
    for action in Action::ALL {
        registry.register(ExecutionTool {
            context: Arc::clone(context),
            action,
        });
    }
    registry.register(WaitForStopTool {
        context: Arc::clone(context),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing;

    fn tool(context: &Arc<DebugContext>, action: Action) -> ExecutionTool {
        ExecutionTool {
            context: Arc::clone(context),
            action,
        }
    }

    #[tokio::test]
    async fn step_while_running_is_a_state_error() {
        let (context, mut adapter) = testing::running_context().await;
        let err = tool(&context, Action::StepOver)
            .call(json!({}))
            .await
            .expect_err("next needs a paused game");
        let ToolError::Failed(problem) = err else {
            panic!("expected a tool failure");
        };
        assert_eq!(problem.kind, Some("state"));
        assert!(problem.remediation.iter().any(|s| s.contains("godot_pause")));
        assert!(adapter
            .try_next_request(Duration::from_millis(100))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn continue_then_wait_for_the_next_stop() {
        let (context, mut adapter) = testing::paused_context().await;
        let resume = tool(&context, Action::Continue);
        let call = tokio::spawn(async move { resume.call(json!({"thread_id": 1})).await });

        let request = adapter.expect_request("continue").await;
        assert_eq!(
            request.arguments.as_ref().expect("arguments")["threadId"],
            json!(1)
        );
        adapter
            .respond(&request, json!({"allThreadsContinued": true}))
            .await;
        let result = call.await.expect("tool task").expect("continue succeeds");
        assert_eq!(result["status"], json!("continued"));
        assert_eq!(result["state"], json!("running"));
        let marker = result["stop_count"].as_u64().expect("stop_count");

        let wait = WaitForStopTool {
            context: Arc::clone(&context),
        };
        let waiting = tokio::spawn(async move {
            wait.call(json!({"after": marker, "timeout_ms": 2000})).await
        });
        adapter
            .send_event(
                "stopped",
                json!({"reason": "breakpoint", "threadId": 1, "hitBreakpointIds": [4]}),
            )
            .await;
        let stop = waiting.await.expect("wait task").expect("stop reported");
        assert_eq!(stop["reason"], json!("breakpoint"));
        assert_eq!(stop["hit_breakpoint_ids"], json!([4]));
        assert_eq!(stop["state"], json!("paused"));
    }

    #[tokio::test]
    async fn wait_returns_current_stop_when_paused() {
        let (context, _adapter) = testing::paused_context().await;
        let wait = WaitForStopTool { context };
        let stop = wait.call(json!({"timeout_ms": 10})).await.expect("already paused");
        assert_eq!(stop["status"], json!("stopped"));
        assert_eq!(stop["thread_id"], json!(1));
    }

    #[tokio::test]
    async fn wait_times_out_with_a_problem() {
        let (context, _adapter) = testing::running_context().await;
        let wait = WaitForStopTool { context };
        let err = wait
            .call(json!({"timeout_ms": 50}))
            .await
            .expect_err("nothing stops");
        let ToolError::Failed(problem) = err else {
            panic!("expected a tool failure");
        };
        assert_eq!(problem.kind, Some("timeout"));
    }

    #[tokio::test]
    async fn pause_moves_the_session_to_paused() {
        let (context, mut adapter) = testing::running_context().await;
        let pause = tool(&context, Action::Pause);
        let call = tokio::spawn(async move { pause.call(Value::Null).await });
        let request = adapter.expect_request("pause").await;
        adapter.respond(&request, json!({})).await;

        let result = call.await.expect("tool task").expect("pause succeeds");
        assert_eq!(result["status"], json!("paused"));
        assert_eq!(result["state"], json!("paused"));
    }
}
