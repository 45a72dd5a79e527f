use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{DapError, Result};

/// Top-level DAP envelope, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    Request(Request),
    Response(Response),
    Event(Event),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub seq: u64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub seq: u64,
    pub request_seq: u64,
    pub success: bool,
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub seq: u64,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    /// Decode the body into `T`. A missing body decodes as `null`, which
    /// suits bodies whose fields are all optional.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone().unwrap_or(Value::Null)).map_err(|e| {
            DapError::Protocol(format!(
                "malformed body in '{}' response: {e}",
                self.command
            ))
        })
    }

    /// Like [`Response::body_as`], but a missing body yields `T::default()`.
    pub fn body_or_default<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match &self.body {
            None | Some(Value::Null) => Ok(T::default()),
            Some(_) => self.body_as(),
        }
    }

    /// Turn `success: false` into [`DapError::Remote`].
    pub fn into_result(self) -> Result<Response> {
        if self.success {
            return Ok(self);
        }
        Err(DapError::Remote {
            message: self
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "debug adapter reported failure".to_string()),
            command: self.command,
            body: self.body,
        })
    }
}

impl Event {
    pub fn body_field(&self, key: &str) -> Option<&Value> {
        self.body.as_ref().and_then(|body| body.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serializes_with_type_tag() {
        let message = ProtocolMessage::Request(Request {
            seq: 3,
            command: "threads".to_string(),
            arguments: None,
        });
        let value = serde_json::to_value(&message).expect("serialize request");
        assert_eq!(
            value,
            json!({"type": "request", "seq": 3, "command": "threads"})
        );
    }

    #[test]
    fn test_response_and_event_deserialize() {
        let response: ProtocolMessage = serde_json::from_value(json!({
            "type": "response",
            "seq": 10,
            "request_seq": 4,
            "success": true,
            "command": "threads",
            "body": {"threads": [{"id": 1, "name": "Main"}]}
        }))
        .expect("response should parse");
        assert!(matches!(
            response,
            ProtocolMessage::Response(Response { request_seq: 4, success: true, .. })
        ));

        let event: ProtocolMessage = serde_json::from_value(json!({
            "type": "event",
            "event": "stopped",
            "body": {"reason": "breakpoint", "threadId": 1}
        }))
        .expect("event without seq should parse");
        match event {
            ProtocolMessage::Event(event) => {
                assert_eq!(event.event, "stopped");
                assert_eq!(event.body_field("threadId"), Some(&json!(1)));
            }
            other => panic!("Expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_response_becomes_remote_error() {
        let response = Response {
            seq: 1,
            request_seq: 1,
            success: false,
            command: "evaluate".to_string(),
            message: Some("Invalid expression".to_string()),
            body: None,
        };
        match response.into_result() {
            Err(DapError::Remote { command, message, .. }) => {
                assert_eq!(command, "evaluate");
                assert_eq!(message, "Invalid expression");
            }
            other => panic!("Expected Remote error, got {other:?}"),
        }
    }
}
