//! Method dispatcher: a process-wide `FQN -> handler` registry bound to
//! a single [`VoxelEngine`] instance. Built once at startup as a
//! concurrent routing table keyed by exact `namespace.operation` names,
//! then read-only for the rest of the process.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::engine::{Rgba, VoxelEngine};
use crate::error::DaemonError;
use crate::protocol::Params;
use crate::render::{self, RenderManager};

mod params;
use params::ParamReader;

pub type Handler = Arc<dyn Fn(&Params) -> Result<Value, DaemonError> + Send + Sync>;

/// Unprefixed method names are rejected with `-32601`, never silently
/// routed to a `goxel.`-prefixed handler.
const REQUIRED_PREFIX: &str = "goxel.";

pub struct Dispatcher {
    registry: DashMap<&'static str, Handler>,
    builtin_names: Vec<&'static str>,
}

impl Dispatcher {
    pub fn new(engine: Arc<dyn VoxelEngine>, render_manager: Arc<RenderManager>) -> Self {
        let registry: DashMap<&'static str, Handler> = DashMap::new();

        registry.insert(
            "ping",
            Arc::new(|_: &Params| Ok(Value::String("pong".to_string()))) as Handler,
        );

        registry.insert(
            "version",
            Arc::new(move |_: &Params| {
                let build = if cfg!(debug_assertions) { "debug" } else { "release" };
                Ok(serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "build": build,
                }))
            }) as Handler,
        );

        register_engine_methods(&registry, engine, render_manager);

        let mut builtin_names: Vec<&'static str> = vec!["ping", "version", "method_list"];
        for entry in registry.iter() {
            if !builtin_names.contains(entry.key()) {
                builtin_names.push(entry.key());
            }
        }

        let dispatcher = Dispatcher { registry, builtin_names };
        dispatcher.install_method_list();
        dispatcher
    }

    fn install_method_list(&self) {
        let names = self.builtin_names.clone();
        self.registry.insert(
            "method_list",
            Arc::new(move |_: &Params| Ok(serde_json::json!({ "methods": names }))) as Handler,
        );
    }

    /// Unknown method -> `MethodNotFound`; handler invocation is
    /// synchronous on the calling thread; handlers never retain the
    /// request past return (they're given only a borrowed `&Params`).
    pub fn dispatch(&self, method: &str, params: &Params) -> Result<Value, DaemonError> {
        if method != "ping" && method != "version" && method != "method_list" && !method.starts_with(REQUIRED_PREFIX) {
            return Err(DaemonError::MethodNotFound(method.to_string()));
        }
        let handler = self
            .registry
            .get(method)
            .ok_or_else(|| DaemonError::MethodNotFound(method.to_string()))?;
        handler(params)
    }

    #[cfg(test)]
    pub(crate) fn register_for_test(&self, name: &'static str, handler: Handler) {
        self.registry.insert(name, handler);
    }
}

fn register_engine_methods(
    registry: &DashMap<&'static str, Handler>,
    engine: Arc<dyn VoxelEngine>,
    render_manager: Arc<RenderManager>,
) {
    {
        let engine = engine.clone();
        registry.insert(
            "goxel.create_project",
            Arc::new(move |p: &Params| {
                let mut r = ParamReader::new(p);
                let name = r.required_str("name")?;
                let width = r.optional_u32("width")?.unwrap_or(64);
                let height = r.optional_u32("height")?.unwrap_or(64);
                let depth = r.optional_u32("depth")?.unwrap_or(64);
                engine.create_project(&name, width, height, depth)?;
                Ok(serde_json::json!({
                    "success": true, "name": name, "width": width, "height": height, "depth": depth
                }))
            }) as Handler,
        );
    }

    {
        let engine = engine.clone();
        registry.insert(
            "goxel.load_project",
            Arc::new(move |p: &Params| {
                let mut r = ParamReader::new(p);
                let path = r.required_str("path")?;
                engine.load_project(&path)?;
                Ok(serde_json::json!({ "success": true, "path": path }))
            }) as Handler,
        );
    }

    {
        let engine = engine.clone();
        registry.insert(
            "goxel.save_project",
            Arc::new(move |p: &Params| {
                let mut r = ParamReader::new(p);
                let path = r.required_str("path")?;
                engine.save_project(&path)?;
                Ok(serde_json::json!({ "success": true, "path": path }))
            }) as Handler,
        );
    }

    {
        let engine = engine.clone();
        registry.insert(
            "goxel.add_voxel",
            Arc::new(move |p: &Params| {
                let mut r = ParamReader::new(p);
                let x = r.required_i32("x")?;
                let y = r.required_i32("y")?;
                let z = r.required_i32("z")?;
                let color = Rgba {
                    r: r.required_u8("r")?,
                    g: r.required_u8("g")?,
                    b: r.required_u8("b")?,
                    a: r.optional_u8("a")?.unwrap_or(255),
                };
                let layer = r.optional_str("layer")?;
                engine.add_voxel(x, y, z, color, layer.as_deref())?;
                Ok(serde_json::json!({ "success": true, "x": x, "y": y, "z": z }))
            }) as Handler,
        );
    }

    {
        let engine = engine.clone();
        registry.insert(
            "goxel.remove_voxel",
            Arc::new(move |p: &Params| {
                let mut r = ParamReader::new(p);
                let x = r.required_i32("x")?;
                let y = r.required_i32("y")?;
                let z = r.required_i32("z")?;
                let layer = r.optional_str("layer")?;
                engine.remove_voxel(x, y, z, layer.as_deref())?;
                Ok(serde_json::json!({ "success": true, "x": x, "y": y, "z": z }))
            }) as Handler,
        );
    }

    {
        let engine = engine.clone();
        registry.insert(
            "goxel.get_voxel",
            Arc::new(move |p: &Params| {
                let mut r = ParamReader::new(p);
                let x = r.required_i32("x")?;
                let y = r.required_i32("y")?;
                let z = r.required_i32("z")?;
                match engine.get_voxel(x, y, z)? {
                    Some(color) => Ok(serde_json::json!({
                        "x": x, "y": y, "z": z,
                        "r": color.r, "g": color.g, "b": color.b, "a": color.a
                    })),
                    None => Err(DaemonError::EngineFailure {
                        kind: "voxel_not_found".to_string(),
                        message: format!("no voxel at ({x}, {y}, {z})"),
                    }),
                }
            }) as Handler,
        );
    }

    {
        let engine = engine.clone();
        registry.insert(
            "goxel.list_layers",
            Arc::new(move |_: &Params| {
                let layers = engine.list_layers()?;
                let items: Vec<Value> = layers
                    .iter()
                    .map(|l| {
                        serde_json::json!({
                            "index": l.index, "name": l.name, "visible": l.visible,
                            "r": l.color.0, "g": l.color.1, "b": l.color.2
                        })
                    })
                    .collect();
                Ok(serde_json::json!({ "count": items.len(), "layers": items }))
            }) as Handler,
        );
    }

    {
        let engine = engine.clone();
        registry.insert(
            "goxel.create_layer",
            Arc::new(move |p: &Params| {
                let mut r = ParamReader::new(p);
                let name = r.required_str("name")?;
                let color = Rgba {
                    r: r.optional_u8("r")?.unwrap_or(255),
                    g: r.optional_u8("g")?.unwrap_or(255),
                    b: r.optional_u8("b")?.unwrap_or(255),
                    a: 255,
                };
                let visible = r.optional_bool("visible")?.unwrap_or(true);
                let index = engine.create_layer(&name, color, visible)?;
                Ok(serde_json::json!({ "success": true, "name": name, "index": index }))
            }) as Handler,
        );
    }

    {
        let engine = engine.clone();
        let render_manager = render_manager.clone();
        registry.insert(
            "goxel.export_model",
            Arc::new(move |p: &Params| {
                let mut r = ParamReader::new(p);
                let path = r.required_str("path")?;
                let format = r.required_str("format")?;
                let path_buf = std::path::PathBuf::from(&path);
                if !render::validate_path(&path_buf, render_manager.root()) {
                    return Err(DaemonError::InvalidParams(
                        "\"path\" must live under the configured render root".into(),
                    ));
                }
                engine.export_model(&path, &format)?;
                render_manager.register(path_buf, None, format.clone(), 0, 0)?;
                Ok(serde_json::json!({ "success": true, "path": path }))
            }) as Handler,
        );
    }

    {
        let engine = engine.clone();
        let render_manager = render_manager.clone();
        registry.insert(
            "goxel.render_scene",
            Arc::new(move |p: &Params| {
                let mut r = ParamReader::new(p);
                let path = r.required_str("path")?;
                let width = r.required_u32("width")?;
                let height = r.required_u32("height")?;
                let _camera: Option<Map<String, Value>> = r.optional_object("camera")?;
                let path_buf = std::path::PathBuf::from(&path);
                if !render::validate_path(&path_buf, render_manager.root()) {
                    return Err(DaemonError::InvalidParams(
                        "\"path\" must live under the configured render root".into(),
                    ));
                }
                let format = path_buf
                    .extension()
                    .and_then(std::ffi::OsStr::to_str)
                    .unwrap_or("png")
                    .to_string();
                engine.render_scene(&path, width, height)?;
                render_manager.register(path_buf, None, format, width, height)?;
                Ok(serde_json::json!({ "success": true, "path": path }))
            }) as Handler,
        );
    }

    registry.insert(
        "goxel.get_status",
        Arc::new(move |_: &Params| {
            let status = engine.status();
            Ok(serde_json::json!({
                "version": status.version,
                "layer_count": status.layer_count,
                "width": status.width,
                "height": status.height,
                "depth": status.depth,
                "uptime_s": status.uptime_s,
            }))
        }) as Handler,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;

    fn render_manager_in_temp_dir() -> Arc<RenderManager> {
        let root = tempfile::tempdir().unwrap().into_path();
        Arc::new(RenderManager::new(root, 10_000_000, 3600))
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(InMemoryEngine::new()), render_manager_in_temp_dir())
    }

    #[test]
    fn ping_returns_pong() {
        let d = dispatcher();
        let result = d.dispatch("ping", &Params::None).unwrap();
        assert_eq!(result, "pong");
    }

    #[test]
    fn unknown_method_is_method_not_found() {
        let d = dispatcher();
        let err = d.dispatch("nonexistent", &Params::None).unwrap_err();
        assert!(matches!(err, DaemonError::MethodNotFound(_)));
    }

    #[test]
    fn unprefixed_engine_style_name_is_rejected() {
        let d = dispatcher();
        let err = d.dispatch("create_project", &Params::None).unwrap_err();
        assert!(matches!(err, DaemonError::MethodNotFound(_)));
    }

    #[test]
    fn create_project_with_named_params() {
        let d = dispatcher();
        let mut map = Map::new();
        map.insert("name".to_string(), Value::String("scene1".to_string()));
        let result = d.dispatch("goxel.create_project", &Params::ByName(map)).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["width"], 64);
    }

    #[test]
    fn create_project_with_positional_params() {
        let d = dispatcher();
        let params = Params::ByPosition(vec![Value::String("scene1".to_string())]);
        let result = d.dispatch("goxel.create_project", &params).unwrap();
        assert_eq!(result["name"], "scene1");
    }

    #[test]
    fn missing_required_param_is_invalid_params() {
        let d = dispatcher();
        let err = d
            .dispatch("goxel.create_project", &Params::ByName(Map::new()))
            .unwrap_err();
        assert!(matches!(err, DaemonError::InvalidParams(_)));
    }

    #[test]
    fn get_voxel_missing_is_engine_failure() {
        let d = dispatcher();
        let mut map = Map::new();
        map.insert("x".to_string(), Value::from(1));
        map.insert("y".to_string(), Value::from(1));
        map.insert("z".to_string(), Value::from(1));
        let err = d.dispatch("goxel.get_voxel", &Params::ByName(map)).unwrap_err();
        assert!(matches!(err, DaemonError::EngineFailure { .. }));
    }

    #[test]
    fn method_list_includes_builtins_and_engine_methods() {
        let d = dispatcher();
        let result = d.dispatch("method_list", &Params::None).unwrap();
        let methods = result["methods"].as_array().unwrap();
        let names: Vec<&str> = methods.iter().map(|v| v.as_str().unwrap()).collect();
        assert!(names.contains(&"ping"));
        assert!(names.contains(&"goxel.get_status"));
    }

    #[test]
    fn version_reports_version_and_build() {
        let d = dispatcher();
        let result = d.dispatch("version", &Params::None).unwrap();
        assert_eq!(result["version"], env!("CARGO_PKG_VERSION"));
        assert!(result["build"].is_string());
    }

    #[test]
    fn render_scene_registers_artifact_with_the_render_manager() {
        let render_manager = render_manager_in_temp_dir();
        let d = Dispatcher::new(Arc::new(InMemoryEngine::new()), render_manager.clone());
        let path = render_manager.allocate_path(Some("sess"), "png").unwrap();

        let mut map = Map::new();
        map.insert("path".to_string(), Value::String(path.to_string_lossy().into_owned()));
        map.insert("width".to_string(), Value::from(64));
        map.insert("height".to_string(), Value::from(64));
        let result = d.dispatch("goxel.render_scene", &Params::ByName(map)).unwrap();

        assert_eq!(result["success"], true);
        assert!(render_manager.get(&path).is_some());
    }

    #[test]
    fn export_model_registers_artifact_with_the_render_manager() {
        let render_manager = render_manager_in_temp_dir();
        let d = Dispatcher::new(Arc::new(InMemoryEngine::new()), render_manager.clone());
        let path = render_manager.allocate_path(Some("sess"), "obj").unwrap();

        let mut map = Map::new();
        map.insert("path".to_string(), Value::String(path.to_string_lossy().into_owned()));
        map.insert("format".to_string(), Value::String("obj".to_string()));
        let result = d.dispatch("goxel.export_model", &Params::ByName(map)).unwrap();

        assert_eq!(result["success"], true);
        assert!(render_manager.get(&path).is_some());
    }

    #[test]
    fn render_scene_rejects_a_path_outside_the_render_root() {
        let d = dispatcher();
        let mut map = Map::new();
        map.insert(
            "path".to_string(),
            Value::String("/tmp/definitely-not-the-render-root/out.png".to_string()),
        );
        map.insert("width".to_string(), Value::from(32));
        map.insert("height".to_string(), Value::from(32));
        let err = d.dispatch("goxel.render_scene", &Params::ByName(map)).unwrap_err();
        assert!(matches!(err, DaemonError::InvalidParams(_)));
    }

    #[test]
    fn export_model_rejects_a_traversal_attempt() {
        let render_manager = render_manager_in_temp_dir();
        let d = Dispatcher::new(Arc::new(InMemoryEngine::new()), render_manager.clone());
        let traversal = render_manager.root().join("../escaped.obj");

        let mut map = Map::new();
        map.insert("path".to_string(), Value::String(traversal.to_string_lossy().into_owned()));
        map.insert("format".to_string(), Value::String("obj".to_string()));
        let err = d.dispatch("goxel.export_model", &Params::ByName(map)).unwrap_err();
        assert!(matches!(err, DaemonError::InvalidParams(_)));
        assert!(!traversal.exists());
    }
}
