use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{errors::ToolError, input_schema_for, parse_arguments, Tool, ToolRegistry};

#[derive(Debug, Deserialize, JsonSchema)]
struct PingParams {
    /// Message to echo back (default: "pong").
    #[serde(default)]
    message: Option<String>,
}

pub struct PingTool;

#[async_trait]
impl Tool for PingTool {
    fn name(&self) -> &'static str {
        "godot_ping"
    }

    fn description(&self) -> &'static str {
        "Echo a message back to verify the MCP server is running and responsive. \
         Returns 'Echo: pong' when no message is given."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<PingParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: PingParams = parse_arguments(arguments)?;
        let message = params.message.unwrap_or_else(|| "pong".to_string());
        Ok(json!(format!("Echo: {message}")))
    }
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(PingTool);
}
