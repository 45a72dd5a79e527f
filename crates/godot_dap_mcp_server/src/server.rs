//! MCP method table on top of the tool registry.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    protocol::{
        RpcError, RpcRequest, RpcResponse, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
        MCP_PROTOCOL_VERSION, TOOL_EXECUTION_ERROR,
    },
    router::RequestHandler,
    tools::{errors::ToolError, ToolRegistry},
};

const SERVER_NAME: &str = "godot-dap-mcp-server";

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: Option<String>,
    #[serde(default)]
    arguments: Value,
}

pub struct McpServer {
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    async fn call_tool(&self, params: Value) -> Result<Value, RpcError> {
        let params: CallToolParams = serde_json::from_value(params)
            .map_err(|e| RpcError::new(INVALID_PARAMS, format!("Invalid params: {e}")))?;
        let Some(name) = params.name.filter(|n| !n.is_empty()) else {
            return Err(RpcError::new(INVALID_PARAMS, "Missing tool name"));
        };
        let Some(tool) = self.tools.get(&name) else {
            return Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("Tool not found: {name}"),
            ));
        };

        let started = Instant::now();
        let outcome = tool.call(params.arguments).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                info!(tool = %name, elapsed_ms, "tool call succeeded");
                let text = match value {
                    Value::String(text) => text,
                    other => serde_json::to_string_pretty(&other).map_err(|e| {
                        RpcError::new(INTERNAL_ERROR, format!("Failed to serialize result: {e}"))
                    })?,
                };
                Ok(json!({ "content": [{ "type": "text", "text": text }] }))
            }
            Err(ToolError::InvalidParams(message)) => {
                warn!(tool = %name, %message, "invalid tool arguments");
                Err(RpcError::new(INVALID_PARAMS, message))
            }
            Err(ToolError::Failed(problem)) => {
                warn!(tool = %name, elapsed_ms, problem = %problem.problem, "tool call failed");
                let data = serde_json::to_value(&problem).map_err(|e| {
                    RpcError::new(INTERNAL_ERROR, format!("Failed to serialize error: {e}"))
                })?;
                Err(RpcError::new(TOOL_EXECUTION_ERROR, problem.to_string()).with_data(data))
            }
        }
    }
}

#[async_trait]
impl RequestHandler for McpServer {
    async fn handle(&self, request: RpcRequest) -> Option<RpcResponse> {
        let Some(id) = request.id else {
            match request.method.as_str() {
                "notifications/initialized" => info!("client initialized"),
                method => debug!(%method, "ignoring notification"),
            }
            return None;
        };

        let result = match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools.list() })),
            "tools/call" => self.call_tool(request.params).await,
            method => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            )),
        };

        Some(match result {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => RpcResponse::error(id, error),
        })
    }
}
