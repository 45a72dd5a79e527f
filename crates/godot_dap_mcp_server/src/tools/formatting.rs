//! Readable renderings of Godot variant values as reported by the adapter.

use std::sync::OnceLock;

use godot_dap_core::types::Variable;
use regex::Regex;
use serde_json::{json, Map, Value};

fn rect2_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[P:\s*\(([^,]+),\s*([^)]+)\),\s*S:\s*\(([^,]+),\s*([^)]+)\)\]")
            .expect("Rect2 pattern is valid")
    })
}

fn aabb_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\[P:\s*\(([^,]+),\s*([^,]+),\s*([^)]+)\),\s*S:\s*\(([^,]+),\s*([^,]+),\s*([^)]+)\)\]",
        )
        .expect("AABB pattern is valid")
    })
}

fn transform2d_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[X:\s*\(([^)]+)\),\s*Y:\s*\(([^)]+)\),\s*O:\s*\(([^)]+)\)\]")
            .expect("Transform2D pattern is valid")
    })
}

fn object_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<([^#>]+)#(\d+)>").expect("object pattern is valid"))
}

/// Variable as returned to the agent, with a `formatted` hint for Godot types.
pub fn format_variable(variable: &Variable) -> Value {
    let mut out = Map::new();
    out.insert("name".to_string(), json!(variable.name));
    out.insert("value".to_string(), json!(variable.value));
    out.insert(
        "type".to_string(),
        json!(variable.type_name.as_deref().unwrap_or_default()),
    );

    if let Some(type_name) = variable.type_name.as_deref() {
        if let Some(formatted) = format_godot_value(type_name, &variable.value) {
            out.insert("formatted".to_string(), json!(formatted));
        }
    }
    if variable.variables_reference > 0 {
        out.insert("expandable".to_string(), json!(true));
        out.insert(
            "variables_reference".to_string(),
            json!(variable.variables_reference),
        );
    }
    if let Some(evaluate_name) = variable.evaluate_name.as_deref().filter(|n| !n.is_empty()) {
        out.insert("evaluate_name".to_string(), json!(evaluate_name));
    }
    Value::Object(out)
}

pub fn format_godot_value(type_name: &str, value: &str) -> Option<String> {
    match type_name {
        "Vector2" | "Vector2i" => {
            let [x, y] = components::<2>(value)?;
            Some(format!("Vector2(x={x}, y={y})"))
        }
        "Vector3" | "Vector3i" => {
            let [x, y, z] = components::<3>(value)?;
            Some(format!("Vector3(x={x}, y={y}, z={z})"))
        }
        "Vector4" | "Vector4i" => {
            let [x, y, z, w] = components::<4>(value)?;
            Some(format!("Vector4(x={x}, y={y}, z={z}, w={w})"))
        }
        "Color" => {
            let [r, g, b, a] = components::<4>(value)?;
            Some(format!("Color(r={r}, g={g}, b={b}, a={a})"))
        }
        "Plane" => {
            let [x, y, z, d] = components::<4>(value)?;
            Some(format!("Plane(normal=({x}, {y}, {z}), d={d})"))
        }
        "Quaternion" => {
            let [x, y, z, w] = components::<4>(value)?;
            Some(format!("Quat(x={x}, y={y}, z={z}, w={w})"))
        }
        "Rect2" | "Rect2i" => {
            let c = rect2_pattern().captures(value)?;
            Some(format!(
                "Rect2(pos=({}, {}), size=({}, {}))",
                c[1].trim(),
                c[2].trim(),
                c[3].trim(),
                c[4].trim()
            ))
        }
        "AABB" => {
            let c = aabb_pattern().captures(value)?;
            Some(format!(
                "AABB(pos=({}, {}, {}), size=({}, {}, {}))",
                c[1].trim(),
                c[2].trim(),
                c[3].trim(),
                c[4].trim(),
                c[5].trim(),
                c[6].trim()
            ))
        }
        "Transform2D" => {
            let c = transform2d_pattern().captures(value)?;
            Some(format!(
                "Transform2D(x={}, y={}, origin={})",
                c[1].trim(),
                c[2].trim(),
                c[3].trim()
            ))
        }
        "Transform3D" => (value.contains("[X:") && value.contains("O:"))
            .then(|| "Transform3D(...)".to_string()),
        "Basis" => (value.contains("[X:") && value.contains("Y:") && value.contains("Z:"))
            .then(|| "Basis(...)".to_string()),
        "Array" => format_array(value),
        "Dictionary" => format_dictionary(value),
        other if is_node_type(other) => Some(format_node(other, value)),
        _ => None,
    }
}

/// `"(a, b, c)"` split into exactly `N` trimmed parts.
fn components<const N: usize>(value: &str) -> Option<[&str; N]> {
    let inner = value.trim().strip_prefix('(')?.strip_suffix(')')?;
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    parts.try_into().ok()
}

fn format_array(value: &str) -> Option<String> {
    let inner = value.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return Some("Array(empty)".to_string());
    }
    let elements: Vec<&str> = inner.split(',').map(str::trim).collect();
    if elements.len() <= 3 {
        return Some(format!("Array({}): {value}", elements.len()));
    }
    Some(format!(
        "Array({}): [{}, ...]",
        elements.len(),
        elements[..3].join(", ")
    ))
}

fn format_dictionary(value: &str) -> Option<String> {
    let inner = value.strip_prefix('{')?.strip_suffix('}')?.trim();
    if inner.is_empty() {
        return Some("Dictionary(empty)".to_string());
    }
    let keys = inner.matches(':').count();
    if keys == 0 {
        return Some("Dictionary(...)".to_string());
    }
    if inner.len() <= 50 {
        Some(format!("Dictionary({keys}): {value}"))
    } else {
        Some(format!("Dictionary({keys} keys)"))
    }
}

fn format_node(type_name: &str, value: &str) -> String {
    if value == "<null>" || value == "null" {
        return format!("{type_name}(null)");
    }
    match object_pattern().captures(value) {
        Some(c) => format!("{} (ID:{})", &c[1], &c[2]),
        None => format!("{type_name}: {value}"),
    }
}

fn is_node_type(type_name: &str) -> bool {
    const NODE_TYPES: &[&str] = &[
        "Node", "Node2D", "Node3D", "Control", "CanvasItem", "Sprite2D", "Sprite3D",
        "Camera2D", "Camera3D", "Label", "Button", "Panel", "CollisionShape2D",
        "CollisionShape3D",
    ];
    NODE_TYPES.contains(&type_name)
        || ["Node", "Body", "Area", "Control"]
            .iter()
            .any(|marker| type_name.contains(marker))
}
