//! End-to-end scenarios over the real Unix-socket wire format.

use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use goxel_daemon::config::DaemonConfig;
use goxel_daemon::engine::InMemoryEngine;
use goxel_daemon::lifecycle::Lifecycle;
use goxel_daemon::queue::{Priority, PriorityQueue};
use goxel_daemon::server::{Server, ServerConfig};
use goxel_daemon::wire::{self, MessageType};
use goxel_daemon::workers::WorkerPool;
use goxel_daemon::DaemonContext;
use serde_json::{json, Value};
use tempfile::tempdir;

struct Harness {
    _dir: tempfile::TempDir,
    socket_path: std::path::PathBuf,
    context: DaemonContext,
    server: Arc<Server>,
    pool: WorkerPool,
}

impl Harness {
    fn start() -> Self {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("goxel-daemon.sock");
        let pid_file = dir.path().join("goxel-daemon.pid");
        let render_dir = dir.path().join("renders");

        let config = DaemonConfig {
            foreground: true,
            socket: socket_path.clone(),
            pid_file,
            workers: 2,
            queue_capacity: 64,
            render_dir,
            render_budget_bytes: 2048,
            render_ttl_seconds: 3600,
            log_level: "info".to_string(),
            shutdown_timeout_ms: 2000,
            idle_ms: 60_000,
            max_connections: 16,
            max_frame_bytes: wire::DEFAULT_MAX_PAYLOAD,
        };

        let engine = Arc::new(InMemoryEngine::new());
        let context = DaemonContext::new(config, engine);

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
        server.start().expect("bind should succeed in a fresh tempdir");

        // Give the accept thread a moment to start listening.
        std::thread::sleep(Duration::from_millis(50));

        Harness {
            _dir: dir,
            socket_path,
            context,
            server,
            pool,
        }
    }

    fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket_path).expect("connect to daemon socket")
    }

    fn send(&self, stream: &mut UnixStream, payload: &Value) {
        let bytes = serde_json::to_vec(payload).unwrap();
        wire::write_frame(&mut *stream, 1, MessageType::Request, &bytes, 0).unwrap();
    }

    fn recv(&self, stream: &mut UnixStream) -> Value {
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let frame = wire::read_frame(&mut *stream, wire::DEFAULT_MAX_PAYLOAD).unwrap();
        serde_json::from_slice(&frame.payload).unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.server.stop_accepting();
        self.pool.stop(500);
    }
}

#[test]
fn ping_round_trip() {
    let harness = Harness::start();
    let mut stream = harness.connect();
    harness.send(&mut stream, &json!({"jsonrpc": "2.0", "method": "ping", "id": 1}));
    let response = harness.recv(&mut stream);
    assert_eq!(response["result"], "pong");
    assert_eq!(response["id"], 1);
}

#[test]
fn unknown_method_is_method_not_found() {
    let harness = Harness::start();
    let mut stream = harness.connect();
    harness.send(&mut stream, &json!({"jsonrpc": "2.0", "method": "foo", "id": 2}));
    let response = harness.recv(&mut stream);
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(response["id"], 2);
}

#[test]
fn tool_call_create_project() {
    let harness = Harness::start();
    let mut stream = harness.connect();
    harness.send(
        &mut stream,
        &json!({
            "tool": "goxel_create_project",
            "arguments": {"name": "t", "width": 32, "height": 32, "depth": 32}
        }),
    );
    let response = harness.recv(&mut stream);
    assert_eq!(response["success"], true);
    assert_eq!(response["content"]["success"], true);
    assert_eq!(response["content"]["name"], "t");
    assert_eq!(response["content"]["width"], 32);
}

#[test]
fn unprefixed_method_is_rejected() {
    let harness = Harness::start();
    let mut stream = harness.connect();
    harness.send(
        &mut stream,
        &json!({"jsonrpc": "2.0", "method": "create_project", "params": {"name": "x"}, "id": 3}),
    );
    let response = harness.recv(&mut stream);
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(response["id"], 3);
}

#[test]
fn render_budget_eviction() {
    let harness = Harness::start();
    std::fs::create_dir_all(&harness.context.config.render_dir).unwrap();

    let mgr = &harness.context.render_manager;
    let mut paths = vec![];
    for i in 0..4 {
        let path = mgr.allocate_path(Some(&format!("s{i}")), "png").unwrap();
        std::fs::write(&path, vec![0u8; 1024]).unwrap();
        mgr.register(path.clone(), Some(format!("s{i}")), "png".into(), 8, 8).unwrap();
        paths.push(path);
        std::thread::sleep(Duration::from_millis(1100));
    }

    let stats = mgr.stats();
    assert!(stats.total_bytes <= 2048);
    assert!(mgr.get(&paths[0]).is_none());
    assert!(mgr.get(&paths[1]).is_none());
    assert!(mgr.get(&paths[3]).is_some());
}

#[test]
fn priority_overtakes_normal_backlog() {
    let queue = PriorityQueue::new(1000);
    for i in 0..100 {
        queue
            .enqueue(
                i,
                goxel_daemon::protocol::Request {
                    method: "ping".into(),
                    params: goxel_daemon::protocol::Params::None,
                    id: Some(goxel_daemon::protocol::Id::Integer(i as i64)),
                },
                Priority::Normal,
                0,
            )
            .unwrap();
    }
    queue
        .enqueue(
            999,
            goxel_daemon::protocol::Request {
                method: "ping".into(),
                params: goxel_daemon::protocol::Params::None,
                id: Some(goxel_daemon::protocol::Id::Integer(999)),
            },
            Priority::High,
            0,
        )
        .unwrap();

    let first = queue.dequeue_blocking().unwrap();
    assert_eq!(first.client_handle, 999);
    assert_eq!(first.priority, Priority::High);
}

#[test]
fn connection_drop_does_not_crash_the_daemon() {
    let harness = Harness::start();
    {
        let mut stream = harness.connect();
        harness.send(&mut stream, &json!({"jsonrpc": "2.0", "method": "ping", "id": 1}));
        // Drop the stream immediately without reading the response.
    }
    std::thread::sleep(Duration::from_millis(100));

    // The daemon should still be responsive to a fresh connection.
    let mut stream = harness.connect();
    harness.send(&mut stream, &json!({"jsonrpc": "2.0", "method": "ping", "id": 2}));
    let response = harness.recv(&mut stream);
    assert_eq!(response["result"], "pong");
}

#[test]
fn unparseable_json_gets_a_parse_error_with_null_id() {
    let harness = Harness::start();
    let mut stream = harness.connect();
    wire::write_frame(&mut stream, 1, MessageType::Request, b"{not json", 0).unwrap();
    let response = harness.recv(&mut stream);
    assert_eq!(response["error"]["code"], -32700);
    assert!(response["id"].is_null());
}
