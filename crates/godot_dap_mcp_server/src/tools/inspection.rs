use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    default_thread_id,
    errors::{Problem, ToolError},
    formatting::{format_godot_value, format_variable},
    input_schema_for, parse_arguments, DebugContext, Tool, ToolRegistry,
};

fn default_max_frames() -> i64 {
    20
}

fn default_context() -> String {
    "repl".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NoParams {}

#[derive(Debug, Deserialize, JsonSchema)]
struct StackTraceParams {
    #[serde(default = "default_thread_id")]
    thread_id: i64,
    /// Maximum number of frames to return (default: 20).
    #[serde(default = "default_max_frames")]
    max_frames: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ScopesParams {
    /// Frame id from godot_get_stack_trace.
    frame_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct VariablesParams {
    /// variables_reference from godot_get_scopes or an expandable variable.
    variables_reference: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EvaluateParams {
    /// GDScript expression, e.g. "position.x + 10".
    expression: String,
    /// Frame to evaluate in (default: 0, the top frame).
    #[serde(default)]
    frame_id: i64,
    /// "repl" (default), "watch" or "hover".
    #[serde(default = "default_context")]
    context: String,
}

pub struct ThreadsTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for ThreadsTool {
    fn name(&self) -> &'static str {
        "godot_get_threads"
    }

    fn description(&self) -> &'static str {
        "List the game's threads. Godot usually reports a single main thread with id 1."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<NoParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let _: NoParams = parse_arguments(arguments)?;
        let client = self.context.require_connected()?;
        let threads = client
            .threads()
            .await
            .map_err(|e| Problem::from_dap("Failed to get threads", &e))?;

        let listed: Vec<Value> = threads
            .iter()
            .map(|t| json!({"id": t.id, "name": t.name}))
            .collect();
        Ok(json!({
            "status": "success",
            "count": listed.len(),
            "threads": listed,
        }))
    }
}

pub struct StackTraceTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for StackTraceTool {
    fn name(&self) -> &'static str {
        "godot_get_stack_trace"
    }

    fn description(&self) -> &'static str {
        "Get the call stack of a paused thread. Frame ids feed godot_get_scopes and godot_evaluate."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<StackTraceParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: StackTraceParams = parse_arguments(arguments)?;
        if params.max_frames < 1 {
            return Err(ToolError::invalid("max_frames must be at least 1"));
        }
        let client = self.context.require_connected()?;
        let trace = client
            .stack_trace(params.thread_id, 0, params.max_frames)
            .await
            .map_err(|e| Problem::from_dap("Failed to get stack trace", &e))?;

        let frames: Vec<Value> = trace
            .stack_frames
            .iter()
            .map(|frame| {
                let mut entry = json!({
                    "id": frame.id,
                    "name": frame.name,
                    "line": frame.line,
                    "column": frame.column,
                });
                if let Some(source) = &frame.source {
                    entry["source"] = json!({"name": source.name, "path": source.path});
                }
                entry
            })
            .collect();
        Ok(json!({
            "status": "success",
            "frames": frames,
            "total_frames": trace.total_frames.unwrap_or(frames.len() as i64),
        }))
    }
}

pub struct ScopesTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for ScopesTool {
    fn name(&self) -> &'static str {
        "godot_get_scopes"
    }

    fn description(&self) -> &'static str {
        "Get the variable scopes (Locals, Members, Globals) of a stack frame."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<ScopesParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: ScopesParams = parse_arguments(arguments)?;
        let client = self.context.require_connected()?;
        let scopes = client
            .scopes(params.frame_id)
            .await
            .map_err(|e| Problem::from_dap("Failed to get scopes", &e))?;

        let listed: Vec<Value> = scopes
            .iter()
            .map(|scope| {
                let mut entry = json!({
                    "name": scope.name,
                    "variables_reference": scope.variables_reference,
                    "expensive": scope.expensive,
                });
                if let Some(hint) = scope.presentation_hint.as_deref().filter(|h| !h.is_empty()) {
                    entry["hint"] = json!(hint);
                }
                entry
            })
            .collect();
        Ok(json!({
            "status": "success",
            "count": listed.len(),
            "scopes": listed,
        }))
    }
}

pub struct VariablesTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for VariablesTool {
    fn name(&self) -> &'static str {
        "godot_get_variables"
    }

    fn description(&self) -> &'static str {
        "Get the variables behind a variables_reference. Godot types (Vector2, Color, Rect2, \
         Transform2D, arrays, dictionaries, nodes) get a readable 'formatted' field; \
         expandable values carry their own variables_reference."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<VariablesParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: VariablesParams = parse_arguments(arguments)?;
        let client = self.context.require_connected()?;
        let variables = client
            .variables(params.variables_reference)
            .await
            .map_err(|e| Problem::from_dap("Failed to get variables", &e))?;

        let listed: Vec<Value> = variables.iter().map(format_variable).collect();
        Ok(json!({
            "status": "success",
            "count": listed.len(),
            "variables": listed,
        }))
    }
}

pub struct EvaluateTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for EvaluateTool {
    fn name(&self) -> &'static str {
        "godot_evaluate"
    }

    fn description(&self) -> &'static str {
        "Evaluate a GDScript expression in a paused frame, e.g. \"player.health\" or \
         \"get_node('Enemy').position\". Assignments are statements and cannot be evaluated."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<EvaluateParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: EvaluateParams = parse_arguments(arguments)?;
        if params.expression.trim().is_empty() {
            return Err(ToolError::invalid("expression must be a non-empty string"));
        }
        let client = self.context.require_connected()?;
        let evaluated = client
            .evaluate(&params.expression, params.frame_id, &params.context)
            .await
            .map_err(|e| {
                Problem::from_dap("Failed to evaluate expression", &e)
                    .context(format!("expression={}", params.expression))
            })?;

        let type_name = evaluated.type_name.unwrap_or_default();
        let mut result = json!({
            "status": "success",
            "result": evaluated.result,
            "type": type_name,
        });
        if let Some(formatted) = format_godot_value(&type_name, &evaluated.result) {
            result["formatted"] = json!(formatted);
        }
        if evaluated.variables_reference > 0 {
            result["expandable"] = json!(true);
            result["variables_reference"] = json!(evaluated.variables_reference);
        }
        Ok(result)
    }
}

pub fn register(registry: &mut ToolRegistry, context: &Arc<DebugContext>) {
    registry.register(ThreadsTool {
        context: Arc::clone(context),
    });
    registry.register(StackTraceTool {
        context: Arc::clone(context),
    });
    registry.register(ScopesTool {
        context: Arc::clone(context),
    });
    registry.register(VariablesTool {
        context: Arc::clone(context),
    });
    registry.register(EvaluateTool {
        context: Arc::clone(context),
    });
}
