//! `VoxelEngine` capability: the seam between the daemon core and the
//! actual voxel editor engine. The core only ever sees this trait;
//! volume storage, undo, file formats, and rasterization are out of
//! scope here.
//!
//! A minimal trait over a stateful engine guarded by a single logical
//! mutex — handlers run with it held, so engine methods never need to
//! worry about concurrent mutation mid-call.

use parking_lot::Mutex;

use crate::error::DaemonError;

#[derive(Debug, Clone)]
pub struct LayerInfo {
    pub index: usize,
    pub name: String,
    pub visible: bool,
    pub color: (u8, u8, u8),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub version: &'static str,
    pub layer_count: usize,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub uptime_s: u64,
}

/// The capability the dispatcher binds its `goxel.*` entries to. One
/// method per row of the engine method table.
pub trait VoxelEngine: Send + Sync {
    fn create_project(&self, name: &str, width: u32, height: u32, depth: u32) -> Result<(), DaemonError>;
    fn load_project(&self, path: &str) -> Result<(), DaemonError>;
    fn save_project(&self, path: &str) -> Result<(), DaemonError>;
    fn add_voxel(&self, x: i32, y: i32, z: i32, color: Rgba, layer: Option<&str>) -> Result<(), DaemonError>;
    fn remove_voxel(&self, x: i32, y: i32, z: i32, layer: Option<&str>) -> Result<bool, DaemonError>;
    fn get_voxel(&self, x: i32, y: i32, z: i32) -> Result<Option<Rgba>, DaemonError>;
    fn list_layers(&self) -> Result<Vec<LayerInfo>, DaemonError>;
    fn create_layer(&self, name: &str, color: Rgba, visible: bool) -> Result<usize, DaemonError>;
    fn export_model(&self, path: &str, format: &str) -> Result<(), DaemonError>;
    fn render_scene(&self, path: &str, width: u32, height: u32) -> Result<(), DaemonError>;
    fn status(&self) -> EngineStatus;
}

struct Layer {
    name: String,
    color: Rgba,
    visible: bool,
}

struct State {
    project_name: String,
    width: u32,
    height: u32,
    depth: u32,
    voxels: std::collections::HashMap<(i32, i32, i32), (Rgba, Option<String>)>,
    layers: Vec<Layer>,
}

impl Default for State {
    fn default() -> Self {
        State {
            project_name: String::new(),
            width: 0,
            height: 0,
            depth: 0,
            voxels: std::collections::HashMap::new(),
            layers: vec![Layer {
                name: "default".to_string(),
                color: Rgba { r: 255, g: 255, b: 255, a: 255 },
                visible: true,
            }],
        }
    }
}

/// Reference in-process implementation: keeps layers and sparse voxels in
/// memory, behind one mutex. Sufficient for exercising the dispatch
/// contract and the render artifact manager end to end; it is not a
/// production voxel renderer (file formats and rasterization are out of
/// scope).
pub struct InMemoryEngine {
    state: Mutex<State>,
    started_at: std::time::Instant,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        InMemoryEngine {
            state: Mutex::new(State::default()),
            started_at: std::time::Instant::now(),
        }
    }
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VoxelEngine for InMemoryEngine {
    fn create_project(&self, name: &str, width: u32, height: u32, depth: u32) -> Result<(), DaemonError> {
        let mut state = self.state.lock();
        state.project_name = name.to_string();
        state.width = width;
        state.height = height;
        state.depth = depth;
        state.voxels.clear();
        Ok(())
    }

    fn load_project(&self, path: &str) -> Result<(), DaemonError> {
        if path.is_empty() {
            return Err(DaemonError::InvalidParams("\"path\" must not be empty".into()));
        }
        // Loading a real project file is out of scope; acknowledges the
        // request so higher layers can exercise the path.
        Ok(())
    }

    fn save_project(&self, path: &str) -> Result<(), DaemonError> {
        if path.is_empty() {
            return Err(DaemonError::InvalidParams("\"path\" must not be empty".into()));
        }
        Ok(())
    }

    fn add_voxel(&self, x: i32, y: i32, z: i32, color: Rgba, layer: Option<&str>) -> Result<(), DaemonError> {
        let mut state = self.state.lock();
        state
            .voxels
            .insert((x, y, z), (color, layer.map(str::to_string)));
        Ok(())
    }

    fn remove_voxel(&self, x: i32, y: i32, z: i32, _layer: Option<&str>) -> Result<bool, DaemonError> {
        let mut state = self.state.lock();
        Ok(state.voxels.remove(&(x, y, z)).is_some())
    }

    fn get_voxel(&self, x: i32, y: i32, z: i32) -> Result<Option<Rgba>, DaemonError> {
        let state = self.state.lock();
        Ok(state.voxels.get(&(x, y, z)).map(|(c, _)| *c))
    }

    fn list_layers(&self) -> Result<Vec<LayerInfo>, DaemonError> {
        let state = self.state.lock();
        Ok(state
            .layers
            .iter()
            .enumerate()
            .map(|(index, l)| LayerInfo {
                index,
                name: l.name.clone(),
                visible: l.visible,
                color: (l.color.r, l.color.g, l.color.b),
            })
            .collect())
    }

    fn create_layer(&self, name: &str, color: Rgba, visible: bool) -> Result<usize, DaemonError> {
        let mut state = self.state.lock();
        state.layers.push(Layer {
            name: name.to_string(),
            color,
            visible,
        });
        Ok(state.layers.len() - 1)
    }

    fn export_model(&self, path: &str, format: &str) -> Result<(), DaemonError> {
        if format.is_empty() {
            return Err(DaemonError::InvalidParams("\"format\" must not be empty".into()));
        }
        std::fs::write(path, b"").map_err(|e| DaemonError::EngineFailure {
            kind: "export_failed".to_string(),
            message: e.to_string(),
        })
    }

    fn render_scene(&self, path: &str, _width: u32, _height: u32) -> Result<(), DaemonError> {
        std::fs::write(path, b"").map_err(|e| DaemonError::EngineFailure {
            kind: "render_failed".to_string(),
            message: e.to_string(),
        })
    }

    fn status(&self) -> EngineStatus {
        let state = self.state.lock();
        EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            layer_count: state.layers.len(),
            width: state.width,
            height: state.height,
            depth: state.depth,
            uptime_s: self.started_at.elapsed().as_secs(),
        }
    }
}
