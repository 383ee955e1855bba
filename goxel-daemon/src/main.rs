//! Binary entry point: wires configuration, the voxel engine, the
//! dispatcher, the priority queue, the worker pool, the render manager,
//! daemon lifecycle, and the socket server together, then polls for
//! shutdown/reload signals until told to stop.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use goxel_daemon::config::{self, CliArgs, DaemonConfig};
use goxel_daemon::engine::InMemoryEngine;
use goxel_daemon::lifecycle::{self, DaemonState, PidFile};
use goxel_daemon::server::{Server, ServerConfig};
use goxel_daemon::workers::WorkerPool;
use goxel_daemon::DaemonContext;

fn main() {
    let args = CliArgs::parse();
    let logical_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let daemon_config = DaemonConfig::from_args(args, logical_cpus);

    init_tracing(&daemon_config.log_level);

    std::process::exit(run(daemon_config));
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(daemon_config: DaemonConfig) -> i32 {
    let pid_file = match PidFile::acquire(daemon_config.pid_file.clone()) {
        Ok(pf) => pf,
        Err(e) => {
            tracing::error!(error = %e, "failed to acquire pid file");
            return config::EXIT_ALREADY_RUNNING;
        }
    };

    lifecycle::install_signal_handlers();

    let engine = Arc::new(InMemoryEngine::new());
    let context = DaemonContext::new(daemon_config, engine);
    context.lifecycle.transition_to(DaemonState::Starting);

    let server_config = ServerConfig {
        socket_path: context.config.socket.clone(),
        pid_file: context.config.pid_file.clone(),
        max_connections: context.config.max_connections,
        idle_ms: context.config.idle_ms,
        max_frame_bytes: context.config.max_frame_bytes,
    };

    let server = Server::new(
        server_config,
        context.queue.clone(),
        context.dispatcher.clone(),
        context.translator.clone(),
        context.lifecycle.clone(),
    );

    let pool = WorkerPool::new(
        context.config.workers,
        context.queue.clone(),
        context.dispatcher.clone(),
        server.clone(),
    );
    pool.start();

    let accept_handle = match server.start() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind socket");
            pool.stop(context.config.shutdown_timeout_ms);
            drop(pid_file);
            return config::EXIT_BIND_FAILURE;
        }
    };

    context.lifecycle.transition_to(DaemonState::Running);
    tracing::info!(
        socket = %context.config.socket.display(),
        workers = context.config.workers,
        "goxel-daemon is running"
    );

    loop {
        std::thread::sleep(std::time::Duration::from_millis(200));

        if lifecycle::reload_requested() {
            tracing::info!("SIGHUP received; config reload is a no-op in this build");
        }

        if lifecycle::shutdown_requested() {
            tracing::info!("shutdown requested; draining");
            break;
        }
    }

    context.lifecycle.transition_to(DaemonState::Draining);
    server.stop_accepting();
    pool.stop(context.config.shutdown_timeout_ms);
    context.lifecycle.transition_to(DaemonState::Stopped);

    drop(pid_file);
    let _ = accept_handle; // accept thread exits once the listener is dropped by OS-level close

    config::EXIT_SUCCESS
}
