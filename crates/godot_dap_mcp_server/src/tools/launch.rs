//! Scene launch and attach, each running the full configuration handshake.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use godot_dap_core::{
    FileBreakpoints, GodotLaunchConfig, LaunchOutcome, LaunchPlatform, SceneTarget,
};
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
struct InitialBreakpoint {
    /// Absolute path or res:// path of a GDScript file.
    file: String,
    lines: Vec<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LaunchParams {
    /// Absolute path to the project directory (must contain project.godot).
    project: String,
    /// Run without debugging.
    #[serde(default)]
    no_debug: bool,
    #[serde(default)]
    profiling: bool,
    /// Show collision shapes.
    #[serde(default)]
    debug_collisions: bool,
    #[serde(default)]
    debug_paths: bool,
    /// Show navigation meshes.
    #[serde(default)]
    debug_navigation: bool,
    /// "host" (default), "android" or "web".
    #[serde(default)]
    platform: Option<String>,
    /// Extra command line options passed to the game.
    #[serde(default)]
    additional_options: Option<String>,
    /// Breakpoints installed before the game starts running.
    #[serde(default)]
    breakpoints: Vec<InitialBreakpoint>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SceneLaunchParams {
    /// Scene to run, e.g. res://scenes/level1.tscn.
    scene: String,
    #[serde(flatten)]
    launch: LaunchParams,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AttachParams {
    #[serde(default)]
    breakpoints: Vec<InitialBreakpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaunchKind {
    Main,
    Current,
    Scene,
}

pub struct LaunchTool {
    context: Arc<DebugContext>,
    kind: LaunchKind,
}

#[async_trait]
impl Tool for LaunchTool {
    fn name(&self) -> &'static str {
        match self.kind {
            LaunchKind::Main => "godot_launch_main_scene",
            LaunchKind::Current => "godot_launch_current_scene",
            LaunchKind::Scene => "godot_launch_scene",
        }
    }

    fn description(&self) -> &'static str {
        match self.kind {
            LaunchKind::Main => {
                "Launch the project's main scene (run/main_scene in project.godot) under the debugger. \
                 Requires godot_connect. Breakpoints set earlier and any passed in 'breakpoints' \
                 are installed before the game starts."
            }
            LaunchKind::Current => {
                "Launch the scene currently open in the Godot editor under the debugger. \
                 Requires godot_connect."
            }
            LaunchKind::Scene => {
                "Launch a specific scene (e.g. res://scenes/level1.tscn) under the debugger. \
                 Requires godot_connect."
            }
        }
    }

    fn input_schema(&self) -> Value {
        match self.kind {
            LaunchKind::Scene => input_schema_for::<SceneLaunchParams>(),
            _ => input_schema_for::<LaunchParams>(),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let (scene, params) = match self.kind {
            LaunchKind::Main => (SceneTarget::Main, parse_arguments::<LaunchParams>(arguments)?),
            LaunchKind::Current => {
                (SceneTarget::Current, parse_arguments::<LaunchParams>(arguments)?)
            }
            LaunchKind::Scene => {
                let params: SceneLaunchParams = parse_arguments(arguments)?;
                (SceneTarget::Custom(params.scene), params.launch)
            }
        };
        launch(&self.context, scene, params).await
    }
}

fn parse_platform(platform: Option<&str>) -> Result<LaunchPlatform, ToolError> {
    match platform.unwrap_or("host") {
        "host" => Ok(LaunchPlatform::Host),
        "android" => Ok(LaunchPlatform::Android),
        "web" => Ok(LaunchPlatform::Web),
        other => Err(ToolError::invalid(format!(
            "platform must be one of host, android, web (got: {other})"
        ))),
    }
}

/// Fold `breakpoints` into the per-file sets kept by the context.
fn remember_breakpoints(
    context: &DebugContext,
    breakpoints: &[InitialBreakpoint],
) -> Result<(), ToolError> {
    let root = context.client().project_root();
    for breakpoint in breakpoints {
        let file = resolve_godot_path(&breakpoint.file, root.as_deref())?;
        for &line in &breakpoint.lines {
            if line < 1 {
                return Err(ToolError::invalid(format!(
                    "breakpoint line must be a positive integer (got {line} in {})",
                    breakpoint.file
                )));
            }
            context.add_breakpoint(&file, line);
        }
    }
    Ok(())
}

fn installed_breakpoints(files: &[FileBreakpoints]) -> Value {
    files
        .iter()
        .map(|file| {
            json!({
                "file": file.file,
                "breakpoints": file.breakpoints.iter().map(|bp| json!({
                    "id": bp.id,
                    "line": bp.line,
                    "verified": bp.verified,
                    "message": bp.message,
                })).collect::<Vec<_>>(),
            })
        })
        .collect()
}

async fn launch(
    context: &DebugContext,
    scene: SceneTarget,
    params: LaunchParams,
) -> Result<Value, ToolError> {
    let client = context.require_connected()?;

    let project = PathBuf::from(&params.project);
    let mut config = GodotLaunchConfig::new(&project, scene.clone());
    config.platform = parse_platform(params.platform.as_deref())?;
    config.no_debug = params.no_debug;
    config.profiling = params.profiling;
    config.debug_collisions = params.debug_collisions;
    config.debug_paths = params.debug_paths;
    config.debug_navigation = params.debug_navigation;
    config.additional_options = params.additional_options;
    config
        .validate()
        .map_err(|e| ToolError::invalid(e.to_string()))?;

    if client.project_root().is_none() {
        client.set_project_root(Some(project.as_path()));
    }
    remember_breakpoints(context, &params.breakpoints)?;
    let requests = context.breakpoint_requests();

    let scene_label = match &scene {
        SceneTarget::Main => "main".to_string(),
        SceneTarget::Current => "current".to_string(),
        SceneTarget::Custom(path) => path.clone(),
    };

    let LaunchOutcome { breakpoints, .. } = client
        .launch_and_configure(config.to_launch_arguments(), &requests)
        .await
        .map_err(|e| {
            Problem::from_dap(format!("Failed to launch {scene_label} scene"), &e)
                .suggest("Check that the project opened in the Godot editor matches 'project'")
        })?;

    let message = match &scene {
        SceneTarget::Main => "Main scene launched successfully".to_string(),
        SceneTarget::Current => "Current scene launched successfully".to_string(),
        SceneTarget::Custom(path) => format!("Scene {path} launched successfully"),
    };
    Ok(json!({
        "status": "launched",
        "message": message,
        "project": params.project,
        "scene": scene_label,
        "state": client.state(),
        "breakpoints": installed_breakpoints(&breakpoints),
    }))
}

pub struct AttachTool {
    context: Arc<DebugContext>,
}

#[async_trait]
impl Tool for AttachTool {
    fn name(&self) -> &'static str {
        "godot_attach"
    }

    fn description(&self) -> &'static str {
        "Attach to a game that is already running with --remote-debug, \
         installing breakpoints before it resumes. Requires godot_connect."
    }

    fn input_schema(&self) -> Value {
        input_schema_for::<AttachParams>()
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let params: AttachParams = parse_arguments(arguments)?;
        let client = self.context.require_connected()?;
        remember_breakpoints(&self.context, &params.breakpoints)?;
        let requests = self.context.breakpoint_requests();

        let outcome = client
            .attach_and_configure(json!({}), &requests)
            .await
            .map_err(|e| {
                Problem::from_dap("Failed to attach to running game", &e)
                    .context("command=attach")
                    .suggest("Ensure the game is running")
                    .suggest("Ensure the game was started with --remote-debug")
                    .suggest("Check that the game is connecting to the correct port (default 6007)")
            })?;

        Ok(json!({
            "status": "attached",
            "message": "Successfully attached to running game",
            "state": client.state(),
            "breakpoints": installed_breakpoints(&outcome.breakpoints),
        }))
    }
}

pub fn register(registry: &mut ToolRegistry, context: &Arc<DebugContext>) {
    for kind in [LaunchKind::Main, LaunchKind::Current, LaunchKind::Scene] {
        registry.register(LaunchTool {
            context: Arc::clone(context),
            kind,
        });
    }
    registry.register(AttachTool {
        context: Arc::clone(context),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing;
    use godot_dap_core::SessionState;

    #[test]
    fn scene_schema_requires_scene_and_project() {
        let schema = input_schema_for::<SceneLaunchParams>();
        let required = schema["required"].as_array().expect("required list");
        assert!(required.contains(&json!("scene")));
        assert!(required.contains(&json!("project")));
    }

    #[tokio::test]
    async fn launch_requires_a_connection() {
        let tool = LaunchTool {
            context: testing::context(),
            kind: LaunchKind::Main,
        };
        let err = tool
            .call(json!({"project": "/games/demo"}))
            .await
            .expect_err("not connected");
        let ToolError::Failed(problem) = err else {
            panic!("expected a tool failure");
        };
        assert_eq!(problem.problem, "Not connected to Godot DAP server");
    }

    #[tokio::test]
    async fn launch_rejects_a_directory_without_project_file() {
        let (context, mut adapter) = testing::connected_context().await;
        let dir = tempfile::tempdir().expect("create temp dir");
        let tool = LaunchTool {
            context,
            kind: LaunchKind::Main,
        };
        let err = tool
            .call(json!({"project": dir.path()}))
            .await
            .expect_err("no project.godot");
        assert!(matches!(err, ToolError::InvalidParams(ref m) if m.contains("project.godot")));
        assert!(adapter
            .try_next_request(std::time::Duration::from_millis(100))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn launch_installs_remembered_breakpoints_before_configuration_done() {
        let (context, mut adapter) = testing::connected_context().await;
        let project = testing::project_dir();
        let script = project.path().join("player.gd");
        context.add_breakpoint(&script, 10);

        let tool = LaunchTool {
            context: Arc::clone(&context),
            kind: LaunchKind::Scene,
        };
        let args = json!({
            "project": project.path(),
            "scene": "res://level.tscn",
            "breakpoints": [{"file": "res://enemy.gd", "lines": [3]}],
        });
        let call = tokio::spawn(async move { tool.call(args).await });

        let launch = adapter.expect_request("launch").await;
        let arguments = launch.arguments.clone().expect("launch arguments");
        assert_eq!(arguments["scene"], json!("res://level.tscn"));
        assert_eq!(arguments["platform"], json!("host"));

        for _ in 0..2 {
            let request = adapter.expect_request("setBreakpoints").await;
            let lines = request.arguments.as_ref().expect("arguments")["lines"].clone();
            let line = lines[0].as_i64().expect("one line");
            adapter
                .respond(&request, json!({"breakpoints": [{"verified": true, "line": line}]}))
                .await;
        }
        let done = adapter.expect_request("configurationDone").await;
        adapter.respond(&done, json!({})).await;
        adapter.respond(&launch, json!({})).await;

        let result = call.await.expect("tool task").expect("launch succeeds");
        assert_eq!(result["status"], json!("launched"));
        assert_eq!(result["scene"], json!("res://level.tscn"));
        assert_eq!(result["breakpoints"].as_array().map(Vec::len), Some(2));
        assert_eq!(context.client().state(), SessionState::Running);
        assert_eq!(
            context.client().project_root().as_deref(),
            Some(project.path())
        );
    }

    #[test]
    fn unknown_platform_is_invalid() {
        assert!(matches!(parse_platform(Some("switch")), Err(ToolError::InvalidParams(_))));
        assert_eq!(parse_platform(None).expect("default"), LaunchPlatform::Host);
    }
}
