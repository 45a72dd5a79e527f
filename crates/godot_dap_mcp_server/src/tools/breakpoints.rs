use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use godot_dap_core::{DapClient, SessionState};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    errors::{Problem, ToolError},
    input_schema_for, parse_arguments,
    path::resolve_godot_path,
    DebugContext, Tool, ToolRegistry,
};

#[derive(Debug, Deserialize, JsonSchema)]
struct SetBreakpointParams {
    /// Absolute path or res:// path of a GDScript file.
    file: String,
    /// 1-based line number.
    line: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ClearBreakpointParams {
    file: String,
    /// Line to clear. Omit to clear every breakpoint in the file.
    #[serde(default)]
    line: Option<i64>,
}

/// Before launch the adapter cannot take breakpoints yet; they are kept
/// and installed during the launch handshake.
fn deferred_until_launch(client: &DapClient) -> bool {
    matches!(
        client.state(),
        SessionState::Connected | SessionState::Initialized
    )
}

fn positive_line(line: i64) -> Result<i64, ToolError> {
    if line < 1 {
        return Err(ToolError::invalid(format!(
            "line must be a positive integer (got {line})"
        )));
    }
    Ok(line)
}

pub struct SetBreakpointTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for SetBreakpointTool {
    fn name(&self) -> &'static str {
        "godot_set_breakpoint"
    }

    fn description(&self) -> &'static str {
        "Set a breakpoint in a GDScript file. The file may be absolute or res:// \
         (res:// needs 'project' in godot_connect). Other breakpoints in the same file are kept. \
         Godot may move the breakpoint to the next executable line; the verified line is returned."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<SetBreakpointParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: SetBreakpointParams = parse_arguments(arguments)?;
        let client = self.context.require_connected()?;
        let line = positive_line(params.line)?;
        let path = resolve_godot_path(&params.file, client.project_root().as_deref())?;

        let existed = self.context.breakpoint_lines(&path).contains(&line);
        let lines = self.context.add_breakpoint(&path, line);

        if deferred_until_launch(client) {
            return Ok(json!({
                "status": "pending",
                "message": format!(
                    "Breakpoint recorded at {}:{line}; it is installed when a scene is launched",
                    params.file
                ),
                "file": params.file,
                "requested_line": line,
            }));
        }

        let breakpoints = match client.set_breakpoints(&path.to_string_lossy(), &lines).await {
            Ok(breakpoints) => breakpoints,
            Err(e) => {
                if !existed {
                    self.context.remove_breakpoint(&path, Some(line));
                }
                return Err(Problem::from_dap("Failed to set breakpoint", &e)
                    .context(format!("{}:{line}", params.file))
                    .into());
            }
        };

        let index = lines.iter().position(|l| *l == line).unwrap_or_default();
        let Some(breakpoint) = breakpoints.get(index) else {
            return Err(Problem::new("No breakpoints were set")
                .context(format!("{}:{line}", params.file))
                .suggest("Check that the file exists and the line is inside the script")
                .into());
        };
        let actual_line = breakpoint.line.unwrap_or(line);

        if !breakpoint.verified {
            return Ok(json!({
                "status": "unverified",
                "message": "Breakpoint set but not verified by Godot",
                "file": params.file,
                "requested_line": line,
                "actual_line": actual_line,
                "reason": breakpoint
                    .message
                    .clone()
                    .unwrap_or_else(|| "File may not be loaded or line may not be executable".to_string()),
            }));
        }

        let mut result = json!({
            "status": "verified",
            "message": format!("Breakpoint set at {}:{actual_line}", params.file),
            "file": params.file,
            "requested_line": line,
            "actual_line": actual_line,
            "id": breakpoint.id,
        });
        if actual_line != line {
            result["adjusted"] = json!(true);
            result["message"] = json!(format!(
                "Breakpoint set at {}:{actual_line} (adjusted from line {line})",
                params.file
            ));
        }
        Ok(result)
    }
}

pub struct ClearBreakpointTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for ClearBreakpointTool {
    fn name(&self) -> &'static str {
        "godot_clear_breakpoint"
    }

    fn description(&self) -> &'static str {
        "Clear one breakpoint (when 'line' is given) or every breakpoint in a GDScript file."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<ClearBreakpointParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: ClearBreakpointParams = parse_arguments(arguments)?;
        let client = self.context.require_connected()?;
        let line = params.line.map(positive_line).transpose()?;
        let path = resolve_godot_path(&params.file, client.project_root().as_deref())?;

        let remaining = self.context.remove_breakpoint(&path, line);
        if !deferred_until_launch(client) {
            install(client, &path, &remaining)
                .await
                .map_err(|e| e.context(params.file.clone()))?;
        }

        let message = match line {
            Some(line) => format!("Breakpoint cleared at {}:{line}", params.file),
            None => format!("All breakpoints cleared in {}", params.file),
        };
        Ok(json!({
            "status": "cleared",
            "message": message,
            "file": params.file,
            "remaining_lines": remaining,
        }))
    }
}

async fn install(client: &DapClient, path: &Path, lines: &[i64]) -> Result<(), Problem> {
    client
        .set_breakpoints(&path.to_string_lossy(), lines)
        .await
        .map(|_| ())
        .map_err(|e| Problem::from_dap("Failed to clear breakpoints", &e))
}

pub fn register(registry: &mut ToolRegistry, context: &Arc<DebugContext>) {
    registry.register(SetBreakpointTool {
        context: Arc::clone(context),
    });
    registry.register(ClearBreakpointTool {
        context: Arc::clone(context),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing;
    use std::path::PathBuf;

    #[tokio::test]
    async fn breakpoint_before_launch_is_pending() {
        let (context, mut adapter) = testing::connected_context().await;
        let tool = SetBreakpointTool {
            context: Arc::clone(&context),
        };
        let result = tool
            .call(json!({"file": "/game/player.gd", "line": 12}))
            .await
            .expect("recorded");
        assert_eq!(result["status"], json!("pending"));
        assert_eq!(
            context.breakpoint_lines(&PathBuf::from("/game/player.gd")),
            vec![12]
        );
        assert!(adapter
            .try_next_request(std::time::Duration::from_millis(100))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn setting_a_second_line_resends_the_whole_file() {
        let (context, mut adapter) = testing::running_context().await;
        context.add_breakpoint(&PathBuf::from("/game/player.gd"), 5);
        let tool = SetBreakpointTool {
            context: Arc::clone(&context),
        };

        let call = tokio::spawn(async move {
            tool.call(json!({"file": "/game/player.gd", "line": 20})).await
        });
        let request = adapter.expect_request("setBreakpoints").await;
        let arguments = request.arguments.clone().expect("arguments");
        assert_eq!(arguments["lines"], json!([5, 20]));
        assert_eq!(arguments["source"]["path"], json!("/game/player.gd"));
        adapter
            .respond(
                &request,
                json!({"breakpoints": [
                    {"verified": true, "line": 5, "id": 1},
                    {"verified": true, "line": 22, "id": 2}
                ]}),
            )
            .await;

        let result = call.await.expect("tool task").expect("breakpoint set");
        assert_eq!(result["status"], json!("verified"));
        assert_eq!(result["actual_line"], json!(22));
        assert_eq!(result["adjusted"], json!(true));
        assert_eq!(result["id"], json!(2));
    }

    #[tokio::test]
    async fn failed_set_forgets_the_new_line() {
        let (context, mut adapter) = testing::running_context().await;
        let tool = SetBreakpointTool {
            context: Arc::clone(&context),
        };
        let call = tokio::spawn(async move {
            tool.call(json!({"file": "/game/player.gd", "line": 3})).await
        });
        let request = adapter.expect_request("setBreakpoints").await;
        adapter.respond_error(&request, "no such file").await;

        let err = call.await.expect("tool task").expect_err("adapter refused");
        assert!(matches!(err, ToolError::Failed(_)));
        assert!(context
            .breakpoint_lines(&PathBuf::from("/game/player.gd"))
            .is_empty());
    }

    #[tokio::test]
    async fn clearing_one_line_keeps_the_others() {
        let (context, mut adapter) = testing::running_context().await;
        let file = PathBuf::from("/game/enemy.gd");
        context.add_breakpoint(&file, 8);
        context.add_breakpoint(&file, 30);
        let tool = ClearBreakpointTool {
            context: Arc::clone(&context),
        };

        let call = tokio::spawn(async move {
            tool.call(json!({"file": "/game/enemy.gd", "line": 8})).await
        });
        let request = adapter.expect_request("setBreakpoints").await;
        assert_eq!(
            request.arguments.as_ref().expect("arguments")["lines"],
            json!([30])
        );
        adapter
            .respond(&request, json!({"breakpoints": [{"verified": true, "line": 30}]}))
            .await;

        let result = call.await.expect("tool task").expect("cleared");
        assert_eq!(result["remaining_lines"], json!([30]));
    }

    #[tokio::test]
    async fn relative_paths_are_rejected() {
        let (context, _adapter) = testing::connected_context().await;
        let tool = SetBreakpointTool { context };
        let err = tool
            .call(json!({"file": "player.gd", "line": 1}))
            .await
            .expect_err("relative path");
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn zero_line_is_rejected() {
        let (context, _adapter) = testing::connected_context().await;
        let tool = SetBreakpointTool { context };
        let err = tool
            .call(json!({"file": "/game/player.gd", "line": 0}))
            .await
            .expect_err("line 0");
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }
}
