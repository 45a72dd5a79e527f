//! JSON-RPC 2.0 envelopes for the line-delimited front end.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// Tool ran and failed.
pub const TOOL_EXECUTION_ERROR: i64 = -32000;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent for notifications. An explicit `null` is still a request.
    #[serde(default, deserialize_with = "present")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Parse one input line. On failure, returns the reply to send, if any.
pub fn parse_request(line: &str) -> Result<RpcRequest, Option<RpcResponse>> {
    let value: Value = serde_json::from_str(line).map_err(|e| {
        Some(RpcResponse::error(
            Value::Null,
            RpcError::new(PARSE_ERROR, format!("Parse error: {e}")),
        ))
    })?;

    let id = value.get("id").cloned();
    let request: RpcRequest = serde_json::from_value(value).map_err(|e| {
        Some(RpcResponse::error(
            id.clone().unwrap_or(Value::Null),
            RpcError::new(INVALID_REQUEST, format!("Invalid request: {e}")),
        ))
    })?;

    if request.jsonrpc != JSONRPC_VERSION {
        let error = RpcError::new(
            INVALID_REQUEST,
            format!("Invalid request: jsonrpc must be \"2.0\", got {:?}", request.jsonrpc),
        );
        return Err(id.map(|id| RpcResponse::error(id, error)));
    }
    Ok(request)
}
