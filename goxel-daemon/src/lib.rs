//! Daemon backend for a voxel editor: a long-lived process accepting
//! local IPC connections and dispatching JSON-RPC/tool-call requests to
//! a voxel engine through a bounded priority worker pool.
//!
//! Module layout mirrors the component lettering used throughout the
//! design documentation (A wire codec, B value model, C dispatcher, D
//! tool-call translator, E protocol detector, F priority queue, G worker
//! pool, H socket server, I render artifact manager, J daemon lifecycle,
//! K configuration).

pub mod config;
pub mod detect;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod queue;
pub mod render;
pub mod server;
pub mod translate;
pub mod wire;
pub mod workers;

use std::sync::Arc;

use config::DaemonConfig;
use dispatch::Dispatcher;
use engine::VoxelEngine;
use lifecycle::Lifecycle;
use queue::PriorityQueue;
use render::RenderManager;
use translate::ToolCallTranslator;

/// Replaces what would otherwise be process-global state (method
/// registry, engine singleton, render index, lifecycle counters) with an
/// explicitly constructed value. Exactly one instance exists per
/// process, built once at startup and handed to every component that
/// needs it.
pub struct DaemonContext {
    pub config: DaemonConfig,
    pub queue: Arc<PriorityQueue>,
    pub dispatcher: Arc<Dispatcher>,
    pub translator: Arc<ToolCallTranslator>,
    pub render_manager: Arc<RenderManager>,
    pub lifecycle: Arc<Lifecycle>,
}

impl DaemonContext {
    pub fn new(config: DaemonConfig, engine: Arc<dyn VoxelEngine>) -> Self {
        let queue = Arc::new(PriorityQueue::new(config.queue_capacity));
        let render_manager = Arc::new(RenderManager::new(
            config.render_dir.clone(),
            config.render_budget_bytes,
            config.render_ttl_seconds,
        ));
        let dispatcher = Arc::new(Dispatcher::new(engine, render_manager.clone()));
        let translator = Arc::new(ToolCallTranslator::new());
        let lifecycle = Lifecycle::new();

        DaemonContext {
            config,
            queue,
            dispatcher,
            translator,
            render_manager,
            lifecycle,
        }
    }
}
