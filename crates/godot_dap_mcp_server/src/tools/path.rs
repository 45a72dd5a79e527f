//! `res://` path resolution against the project root.

use std::path::{Path, PathBuf};

use super::errors::ToolError;

const RES_PREFIX: &str = "res://";

pub fn resolve_godot_path(path: &str, project_root: Option<&Path>) -> Result<PathBuf, ToolError> {
    if path.is_empty() {
        return Err(ToolError::invalid("path cannot be empty"));
    }

    if let Some(relative) = path.strip_prefix(RES_PREFIX) {
        let Some(root) = project_root else {
            return Err(ToolError::invalid(format!(
                "cannot resolve res:// path '{path}': project root not set. \
                 Provide 'project' in godot_connect or use an absolute path"
            )));
        };
        return Ok(root.join(relative));
    }

    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return Ok(candidate.to_path_buf());
    }

    Err(ToolError::invalid(format!(
        "path must be absolute or start with res:// (got: {path})"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn res_paths_join_the_project_root() {
        let root = Path::new("/games/demo");
        let resolved = resolve_godot_path("res://scripts/player.gd", Some(root))
            .expect("res path resolves");
        assert_eq!(resolved, PathBuf::from("/games/demo/scripts/player.gd"));
    }

    #[test]
    fn res_paths_need_a_project_root() {
        let err = resolve_godot_path("res://player.gd", None).expect_err("no root");
        assert!(err.to_string().contains("project root not set"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn absolute_paths_pass_through_and_relative_paths_fail() {
        assert_eq!(
            resolve_godot_path("/tmp/player.gd", None).expect("absolute"),
            PathBuf::from("/tmp/player.gd")
        );
        assert!(resolve_godot_path("scripts/player.gd", None).is_err());
        assert!(resolve_godot_path("", None).is_err());
    }
}
