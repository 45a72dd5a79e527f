use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use godot_dap_core::SessionState;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{
    errors::{Problem, ToolError},
    input_schema_for, parse_arguments, DebugContext, Tool, ToolRegistry,
};

#[derive(Debug, Deserialize, JsonSchema)]
struct ConnectParams {
    /// DAP server port (default: 6006, or GODOT_DAP_PORT).
    #[serde(default)]
    port: Option<u16>,
    /// DAP server host (default: 127.0.0.1, or GODOT_DAP_HOST).
    #[serde(default)]
    host: Option<String>,
    /// Absolute path to the project root; enables res:// path resolution.
    #[serde(default)]
    project: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NoParams {}

pub struct ConnectTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for ConnectTool {
    fn name(&self) -> &'static str {
        "godot_connect"
    }

    fn description(&self) -> &'static str {
        "Connect to the Godot editor's Debug Adapter Protocol server and initialize the session. \
         The editor must be running with the debug adapter enabled \
         (Editor Settings > Network > Debug Adapter, default port 6006). \
         Pass 'project' to enable res:// paths in later calls."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<ConnectParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: ConnectParams = parse_arguments(arguments)?;
        let client = self.context.client();

        let state = client.state();
        if state != SessionState::Disconnected {
            return Ok(json!({
                "status": "already_connected",
                "message": "Already connected to Godot DAP server",
                "state": state,
            }));
        }

        let project = params
            .project
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        if let Some(project) = &project {
            if !project.is_absolute() {
                return Err(ToolError::invalid(format!(
                    "project must be an absolute path (got: {})",
                    project.display()
                )));
            }
        }

        let host = params.host.unwrap_or_else(|| client.config().host.clone());
        let port = params.port.unwrap_or(client.config().port);
        let address = format!("{host}:{port}");

        client.connect(&host, port).await.map_err(|e| {
            Problem::from_dap("Failed to connect to Godot DAP server", &e)
                .context(address.clone())
                .suggest("Launch the Godot editor")
                .suggest("Enable DAP in Editor > Editor Settings > Network > Debug Adapter")
                .suggest(format!("Check the port setting (default: 6006, tried: {port})"))
        })?;

        if let Err(e) = client.initialize().await {
            if let Err(close) = client.disconnect().await {
                warn!(error = %close, "cleanup after failed initialize");
            }
            return Err(Problem::from_dap("Failed to initialize DAP session", &e)
                .context(address)
                .into());
        }

        if project.is_some() {
            client.set_project_root(project.as_deref());
        }
        info!(%address, "connected to Godot");

        Ok(json!({
            "status": "connected",
            "message": format!("Connected to Godot DAP server at {address}. Ready to launch."),
            "state": client.state(),
        }))
    }
}

pub struct DisconnectTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for DisconnectTool {
    fn name(&self) -> &'static str {
        "godot_disconnect"
    }

    fn description(&self) -> &'static str {
        "Close the debug session and the connection to Godot. \
         Call godot_connect again before any further debugging."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<NoParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let _: NoParams = parse_arguments(arguments)?;
        let client = self.context.client();
        if client.state() == SessionState::Disconnected {
            return Ok(json!({
                "status": "not_connected",
                "message": "Not currently connected to Godot DAP server",
            }));
        }

        match client.disconnect().await {
            Ok(()) => Ok(json!({
                "status": "disconnected",
                "message": "Disconnected from Godot DAP server",
            })),
            // The socket is closed either way; only the acknowledgement is missing.
            Err(e) if client.state() == SessionState::Disconnected => Ok(json!({
                "status": "disconnected",
                "message": "Disconnected from Godot DAP server",
                "warning": e.to_string(),
            })),
            Err(e) => Err(Problem::from_dap("Failed to disconnect", &e).into()),
        }
    }
}

pub struct SessionStateTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for SessionStateTool {
    fn name(&self) -> &'static str {
        "godot_get_session_state"
    }

    fn description(&self) -> &'static str {
        "Report the debug session state (disconnected, connected, initialized, configuring, \
         running, paused, terminated), the last stop and the adapter capabilities."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<NoParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let _: NoParams = parse_arguments(arguments)?;
        let client = self.context.client();
        let session = client.session();
        let state = client.state();

        Ok(json!({
            "state": state,
            "connected": state != SessionState::Disconnected,
            "project_root": client.project_root(),
            "last_stop": client.last_stop(),
            "stop_count": client.stop_count(),
            "in_flight": session.in_flight(),
            "launch": session.launch_intent(),
            "capabilities": session.capabilities(),
        }))
    }
}

pub fn register(registry: &mut ToolRegistry, context: &Arc<DebugContext>) {
    registry.register(ConnectTool {
        context: Arc::clone(context),
    });
    registry.register(DisconnectTool {
        context: Arc::clone(context),
    });
    registry.register(SessionStateTool {
        context: Arc::clone(context),
    });
}
