//! Godot-specific `launch` arguments.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{DapError, Result};

/// Which scene the editor should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneTarget {
    /// The main scene from `project.godot`.
    Main,
    /// The scene currently open in the editor.
    Current,
    /// A scene file, e.g. `res://scenes/level1.tscn`.
    Custom(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchPlatform {
    #[default]
    Host,
    Android,
    Web,
}

impl LaunchPlatform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Android => "android",
            Self::Web => "web",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GodotLaunchConfig {
    /// Project directory; must contain `project.godot`.
    pub project: PathBuf,
    pub scene: SceneTarget,
    pub platform: LaunchPlatform,
    pub no_debug: bool,
    pub profiling: bool,
    pub debug_collisions: bool,
    pub debug_paths: bool,
    pub debug_navigation: bool,
    pub additional_options: Option<String>,
}

impl GodotLaunchConfig {
    pub fn new(project: impl Into<PathBuf>, scene: SceneTarget) -> Self {
        Self {
            project: project.into(),
            scene,
            platform: LaunchPlatform::Host,
            no_debug: false,
            profiling: false,
            debug_collisions: false,
            debug_paths: false,
            debug_navigation: false,
            additional_options: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.project.as_os_str().is_empty() {
            return Err(DapError::InvalidLaunch("project path is required".to_string()));
        }

        let project_file = self.project.join("project.godot");
        match std::fs::metadata(&project_file) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DapError::InvalidLaunch(format!(
                    "project.godot not found in {}",
                    self.project.display()
                )));
            }
            Err(e) => {
                return Err(DapError::InvalidLaunch(format!(
                    "failed to check {}: {e}",
                    project_file.display()
                )));
            }
        }

        if matches!(&self.scene, SceneTarget::Custom(path) if path.trim().is_empty()) {
            return Err(DapError::InvalidLaunch(
                "scene path is required when launching a specific scene".to_string(),
            ));
        }
        Ok(())
    }

    /// Arguments for the DAP `launch` request as understood by the Godot editor.
    pub fn to_launch_arguments(&self) -> Value {
        let scene = match &self.scene {
            SceneTarget::Main => "main",
            SceneTarget::Current => "current",
            SceneTarget::Custom(path) => path.as_str(),
        };

        let mut args = json!({
            "project": self.project.to_string_lossy(),
            "scene": scene,
            "platform": self.platform.as_str(),
            "noDebug": self.no_debug,
            "profiling": self.profiling,
            "debug_collisions": self.debug_collisions,
            "debug_paths": self.debug_paths,
            "debug_navigation": self.debug_navigation,
        });
        if let Some(options) = self.additional_options.as_deref().filter(|o| !o.is_empty()) {
            args["additional_options"] = json!(options);
        }
        args
    }
}
