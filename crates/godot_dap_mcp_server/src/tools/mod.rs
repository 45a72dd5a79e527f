//! Debugging tools exposed over `tools/list` and `tools/call`.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use godot_dap_core::{BreakpointRequest, DapClient, SessionState};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

pub mod advanced;
pub mod breakpoints;
pub mod connection;
pub mod errors;
pub mod execution;
pub mod formatting;
pub mod inspection;
pub mod launch;
pub mod path;
pub mod ping;

use errors::{not_connected, ToolError};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Entries for `tools/list`, sorted by name.
    pub fn list(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "inputSchema": tool.input_schema(),
                })
            })
            .collect()
    }
}

pub fn register_all(registry: &mut ToolRegistry, context: Arc<DebugContext>) {
    ping::register(registry);
    connection::register(registry, &context);
    launch::register(registry, &context);
    breakpoints::register(registry, &context);
    execution::register(registry, &context);
    inspection::register(registry, &context);
    advanced::register(registry, &context);
}

/// State shared by every tool: the one debug session and the breakpoint
/// lines requested per file.
pub struct DebugContext {
    client: DapClient,
    breakpoints: Mutex<HashMap<PathBuf, BTreeSet<i64>>>,
}

impl DebugContext {
    pub fn new(client: DapClient) -> Self {
        Self {
            client,
            breakpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &DapClient {
        &self.client
    }

    pub fn require_connected(&self) -> Result<&DapClient, ToolError> {
        match self.client.state() {
            SessionState::Disconnected => Err(not_connected().into()),
            _ => Ok(&self.client),
        }
    }

    fn breakpoint_table(&self) -> MutexGuard<'_, HashMap<PathBuf, BTreeSet<i64>>> {
        self.breakpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add `line` to the file's set and return the full set.
    pub fn add_breakpoint(&self, file: &Path, line: i64) -> Vec<i64> {
        let mut table = self.breakpoint_table();
        let lines = table.entry(file.to_path_buf()).or_default();
        lines.insert(line);
        lines.iter().copied().collect()
    }

    /// Remove one line, or every line when `line` is `None`. Returns what is left.
    pub fn remove_breakpoint(&self, file: &Path, line: Option<i64>) -> Vec<i64> {
        let mut table = self.breakpoint_table();
        let remaining = match (line, table.get_mut(file)) {
            (Some(line), Some(lines)) => {
                lines.remove(&line);
                lines.iter().copied().collect()
            }
            _ => Vec::new(),
        };
        if remaining.is_empty() {
            table.remove(file);
        }
        remaining
    }

    pub fn breakpoint_lines(&self, file: &Path) -> Vec<i64> {
        self.breakpoint_table()
            .get(file)
            .map(|lines| lines.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every non-empty file set, in a stable order, ready for the
    /// configuration phase of a launch.
    pub fn breakpoint_requests(&self) -> Vec<BreakpointRequest> {
        let table = self.breakpoint_table();
        let mut requests: Vec<BreakpointRequest> = table
            .iter()
            .filter(|(_, lines)| !lines.is_empty())
            .map(|(file, lines)| {
                BreakpointRequest::new(file.to_string_lossy(), lines.iter().copied().collect())
            })
            .collect();
        requests.sort_by(|a, b| a.file.cmp(&b.file));
        requests
    }
}

/// Arguments of a `tools/call`; a missing object reads as `{}`.
pub fn parse_arguments<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = match arguments {
        Value::Null => json!({}),
        other => other,
    };
    serde_json::from_value(arguments)
        .map_err(|e| ToolError::invalid(format!("invalid arguments: {e}")))
}

/// Input schema for `T` as published in `tools/list`. Some MCP clients
/// reject a bare `true` sub-schema, so those are rewritten to `{}`.
pub fn input_schema_for<T: JsonSchema>() -> Value {
    let mut schema = schemars::schema_for!(T).to_value();
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    replace_bare_true(&mut schema);
    schema
}

fn replace_bare_true(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let holds_schemas = matches!(key.as_str(), "properties" | "$defs" | "definitions");
                if holds_schemas {
                    if let Value::Object(schemas) = child {
                        for schema in schemas.values_mut() {
                            if schema == &Value::Bool(true) {
                                *schema = json!({});
                            }
                        }
                    }
                } else if matches!(key.as_str(), "items" | "additionalProperties")
                    && child == &Value::Bool(true)
                {
                    *child = json!({});
                }
                replace_bare_true(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(replace_bare_true),
        _ => {}
    }
}

/// Any JSON value, published with an explicit `{}` schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(serde_json::Map<String, Value>),
    Null,
}

impl JsonSchema for AnyValue {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "AnyValue".into()
    }

    fn json_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({})
    }

    fn inline_schema() -> bool {
        true
    }
}

impl From<AnyValue> for Value {
    fn from(value: AnyValue) -> Self {
        match value {
            AnyValue::Bool(b) => Value::Bool(b),
            AnyValue::Number(n) => Value::Number(n),
            AnyValue::String(s) => Value::String(s),
            AnyValue::Array(items) => Value::Array(items),
            AnyValue::Object(map) => Value::Object(map),
            AnyValue::Null => Value::Null,
        }
    }
}

pub(crate) fn default_thread_id() -> i64 {
    1
}
