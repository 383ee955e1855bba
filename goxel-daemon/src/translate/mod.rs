//! Tool-call dialect translator.
//!
//! A stateless, allocation-frugal static lookup table maps an external
//! tool name onto an internal canonical method, with a per-entry
//! transform describing how `arguments` become `params`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

use crate::error::DaemonError;
use crate::protocol::{Id, Params, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transform {
    /// `arguments` become `params` (by-name) verbatim.
    Direct,
    /// `{position:{x,y,z}, color:{r,g,b,a}}` -> `{x,y,z,rgba:[r,g,b,a]}`.
    FlattenPositionColor,
}

struct ToolEntry {
    tool: &'static str,
    method: &'static str,
    transform: Transform,
}

/// Static `tool -> canonical method` table covering the full set of
/// `goxel.*` engine methods.
static TOOL_TABLE: &[ToolEntry] = &[
    ToolEntry { tool: "goxel_create_project", method: "goxel.create_project", transform: Transform::Direct },
    ToolEntry { tool: "goxel_load_project", method: "goxel.load_project", transform: Transform::Direct },
    ToolEntry { tool: "goxel_save_project", method: "goxel.save_project", transform: Transform::Direct },
    ToolEntry { tool: "goxel_add_voxel", method: "goxel.add_voxel", transform: Transform::FlattenPositionColor },
    ToolEntry { tool: "goxel_add_voxels", method: "goxel.add_voxel", transform: Transform::FlattenPositionColor },
    ToolEntry { tool: "goxel_remove_voxel", method: "goxel.remove_voxel", transform: Transform::Direct },
    ToolEntry { tool: "goxel_get_voxel", method: "goxel.get_voxel", transform: Transform::Direct },
    ToolEntry { tool: "goxel_list_layers", method: "goxel.list_layers", transform: Transform::Direct },
    ToolEntry { tool: "goxel_create_layer", method: "goxel.create_layer", transform: Transform::Direct },
    ToolEntry { tool: "goxel_export_model", method: "goxel.export_model", transform: Transform::Direct },
    ToolEntry { tool: "goxel_render_scene", method: "goxel.render_scene", transform: Transform::Direct },
    ToolEntry { tool: "goxel_get_status", method: "goxel.get_status", transform: Transform::Direct },
];

fn lookup(tool: &str) -> Option<&'static ToolEntry> {
    TOOL_TABLE.iter().find(|e| e.tool == tool)
}

#[derive(Default)]
pub struct TranslatorStats {
    translations: AtomicU64,
    translation_errors: AtomicU64,
    direct: AtomicU64,
    mapped: AtomicU64,
    total_nanos: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct TranslatorStatsSnapshot {
    pub translations: u64,
    pub translation_errors: u64,
    pub direct: u64,
    pub mapped: u64,
    pub average_call_nanos: f64,
}

impl TranslatorStats {
    fn record(&self, transform: Transform, elapsed_nanos: u64) {
        self.translations.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(elapsed_nanos, Ordering::Relaxed);
        match transform {
            Transform::Direct => self.direct.fetch_add(1, Ordering::Relaxed),
            Transform::FlattenPositionColor => self.mapped.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn record_error(&self) {
        self.translation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TranslatorStatsSnapshot {
        let translations = self.translations.load(Ordering::Relaxed);
        let average_call_nanos = if translations == 0 {
            0.0
        } else {
            self.total_nanos.load(Ordering::Relaxed) as f64 / translations as f64
        };
        TranslatorStatsSnapshot {
            translations,
            translation_errors: self.translation_errors.load(Ordering::Relaxed),
            direct: self.direct.load(Ordering::Relaxed),
            mapped: self.mapped.load(Ordering::Relaxed),
            average_call_nanos,
        }
    }
}

/// Translates tool-call dialect requests into canonical ones and rewraps
/// dispatcher responses back into tool-call conventions.
#[derive(Default)]
pub struct ToolCallTranslator {
    pub stats: TranslatorStats,
    next_synthetic_id: AtomicU64,
}

impl ToolCallTranslator {
    pub fn new() -> Self {
        ToolCallTranslator::default()
    }

    /// Translates `{"tool": ..., "arguments": ...}` into a canonical
    /// [`Request`] with a synthesized id.
    pub fn translate_request(&self, raw: &Value) -> Result<Request, DaemonError> {
        let started = std::time::Instant::now();
        let obj = raw
            .as_object()
            .ok_or_else(|| DaemonError::InvalidRequest("tool call must be a JSON object".into()))?;

        let tool = obj
            .get("tool")
            .and_then(Value::as_str)
            .ok_or_else(|| DaemonError::InvalidRequest("missing \"tool\"".into()))?;

        let entry = match lookup(tool) {
            Some(e) => e,
            None => {
                self.stats.record_error();
                return Err(DaemonError::TranslationInvalidTool(tool.to_string()));
            }
        };

        let arguments = obj.get("arguments");

        let params = match entry.transform {
            Transform::Direct => match arguments {
                None | Some(Value::Null) => Params::None,
                Some(Value::Object(map)) => Params::ByName(map.clone()),
                Some(_) => {
                    self.stats.record_error();
                    return Err(DaemonError::TranslationParams(
                        "arguments must be an object".into(),
                    ));
                }
            },
            Transform::FlattenPositionColor => {
                let map = arguments
                    .and_then(Value::as_object)
                    .ok_or_else(|| {
                        self.stats.record_error();
                        DaemonError::TranslationParams("arguments must be an object".into())
                    })?;
                Params::ByName(flatten_position_color(map)?)
            }
        };

        let id = Id::Integer(self.next_synthetic_id.fetch_add(1, Ordering::Relaxed) as i64);

        self.stats.record(entry.transform, started.elapsed().as_nanos() as u64);

        Ok(Request {
            method: entry.method.to_string(),
            params,
            id: Some(id),
        })
    }

    /// Rewraps a dispatcher result into tool-call response conventions.
    pub fn translate_success(result: Value) -> Value {
        serde_json::json!({ "success": true, "content": result })
    }

    pub fn translate_failure(error: &DaemonError) -> Value {
        serde_json::json!({
            "success": false,
            "error_code": error.rpc_code(),
            "error_message": error.to_string(),
        })
    }
}

/// `{position:{x,y,z}, color:{r,g,b,a}}` -> `{x,y,z,rgba:[r,g,b,a]}`.
/// Other top-level keys (e.g. `layer`) pass through unchanged.
fn flatten_position_color(map: &Map<String, Value>) -> Result<Map<String, Value>, DaemonError> {
    let mut out = Map::new();

    if let Some(position) = map.get("position") {
        let p = position
            .as_object()
            .ok_or_else(|| DaemonError::TranslationParams("\"position\" must be an object".into()))?;
        for key in ["x", "y", "z"] {
            let v = p
                .get(key)
                .ok_or_else(|| DaemonError::TranslationParams(format!("\"position.{key}\" is required")))?;
            out.insert(key.to_string(), v.clone());
        }
    }

    if let Some(color) = map.get("color") {
        let c = color
            .as_object()
            .ok_or_else(|| DaemonError::TranslationParams("\"color\" must be an object".into()))?;
        let mut rgba = Vec::with_capacity(4);
        for key in ["r", "g", "b", "a"] {
            let v = c
                .get(key)
                .ok_or_else(|| DaemonError::TranslationParams(format!("\"color.{key}\" is required")))?;
            rgba.push(v.clone());
        }
        out.insert("rgba".to_string(), Value::Array(rgba));
    }

    for (key, value) in map {
        if key != "position" && key != "color" {
            out.insert(key.clone(), value.clone());
        }
    }

    Ok(out)
}
