use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::{
    errors::{Problem, ToolError},
    input_schema_for, parse_arguments, AnyValue, DebugContext, Tool, ToolRegistry,
};

#[derive(Debug, Deserialize, JsonSchema)]
struct SetVariableParams {
    variables_reference: i64,
    name: String,
    /// New value; any JSON type.
    value: AnyValue,
}

pub struct SetVariableTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for SetVariableTool {
    fn name(&self) -> &'static str {
        "godot_set_variable"
    }

    fn description(&self) -> &'static str {
        "Change a variable in a paused frame. Currently unavailable: Godot advertises \
         supportsSetVariable but its debug adapter does not implement the request. \
         The call always fails with an explanation."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<SetVariableParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: SetVariableParams = parse_arguments(arguments)?;
        self.context.require_connected()?;

        let value = Value::from(params.value);
        Err(Problem::new("godot_set_variable is currently unavailable")
            .context(format!(
                "{} = {value} (variables_reference={})",
                params.name, params.variables_reference
            ))
            .suggest(
                "Godot advertises 'supportsSetVariable', but its debug adapter has no setVariable handler",
            )
            .suggest(
                "godot_evaluate cannot assign either: GDScript assignments are statements, not expressions",
            )
            .suggest("Inspect values with godot_get_variables or godot_evaluate instead")
            .into())
    }
}

pub fn register(registry: &mut ToolRegistry, context: &Arc<DebugContext>) {
    registry.register(SetVariableTool {
        context: Arc::clone(context),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing;
    use serde_json::json;

    #[test]
    fn value_schema_is_an_empty_object_not_true() {
        let schema = input_schema_for::<SetVariableParams>();
        let value = &schema["properties"]["value"];
        assert!(value.is_object(), "value schema: {value}");
        assert!(value.get("type").is_none(), "value accepts any type: {value}");
        let required = schema["required"].as_array().expect("required list");
        assert!(required.contains(&json!("value")));
    }

    #[tokio::test]
    async fn always_fails_with_an_explanation() {
        let (context, mut adapter) = testing::paused_context().await;
        let tool = SetVariableTool { context };
        let err = tool
            .call(json!({"variables_reference": 3, "name": "health", "value": {"hp": 10}}))
            .await
            .expect_err("setVariable is unavailable");
        let ToolError::Failed(problem) = err else {
            panic!("expected a tool failure");
        };
        assert!(problem.problem.contains("unavailable"));
        assert!(problem
            .remediation
            .iter()
            .any(|s| s.contains("godot_evaluate")));
        assert!(adapter
            .try_next_request(std::time::Duration::from_millis(100))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn disconnected_reports_not_connected_first() {
        let tool = SetVariableTool {
            context: testing::context(),
        };
        let err = tool
            .call(json!({"variables_reference": 3, "name": "x", "value": 1}))
            .await
            .expect_err("not connected");
        assert!(matches!(err, ToolError::Failed(ref p) if p.problem.starts_with("Not connected")));
    }
}
