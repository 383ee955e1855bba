//! Socket server: accepts Unix-domain connections, frames incoming
//! messages, routes them through detection/translation, and enqueues
//! them on the priority queue. Delivers responses back to their
//! originating connection, formatted per the dialect the request arrived
//! in.
//!
//! One accept thread, one reader + one writer thread per connection, an
//! `mpsc` channel serializing writes, and stale-socket cleanup before
//! bind — gated on the PID file so a live owner's socket is never
//! clobbered out from under it.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::detect::{self, Dialect};
use crate::dispatch::Dispatcher;
use crate::error::DaemonError;
use crate::lifecycle::Lifecycle;
use crate::protocol::{Id, Params, Request, Response};
use crate::queue::{CancelToken, Priority, PriorityQueue};
use crate::translate::ToolCallTranslator;
use crate::wire::{self, MessageType, WireError};
use crate::workers::ResponseSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseStyle {
    Canonical,
    ToolCall,
}

pub struct ConnectionRecord {
    pub id: u64,
    pub connected_at: Instant,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub messages_in: AtomicU64,
    pub messages_out: AtomicU64,
    pub pending_requests: AtomicU64,
    pub closed: AtomicBool,
    last_activity_unix: AtomicU64,
    writer_tx: mpsc::Sender<Vec<u8>>,
    /// Cancel tokens for every still-outstanding queued request on this
    /// connection, so a disconnect can flag them all cooperatively.
    pending_tokens: std::sync::Mutex<Vec<CancelToken>>,
}

impl ConnectionRecord {
    fn touch(&self) {
        self.last_activity_unix.store(now_unix(), Ordering::Relaxed);
    }

    fn idle_for_ms(&self) -> u64 {
        let last = self.last_activity_unix.load(Ordering::Relaxed);
        now_unix().saturating_sub(last) * 1000
    }

    fn track_token(&self, token: CancelToken) {
        self.pending_tokens.lock().unwrap().push(token);
    }

    /// Flags every outstanding request on this connection as cancelled.
    fn cancel_all_pending(&self) {
        for token in self.pending_tokens.lock().unwrap().drain(..) {
            token.cancel();
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub max_connections: usize,
    pub idle_ms: u64,
    pub max_frame_bytes: u32,
}

pub struct Server {
    config: ServerConfig,
    connections: DashMap<u64, Arc<ConnectionRecord>>,
    next_connection_id: AtomicU64,
    queue: Arc<PriorityQueue>,
    dispatcher: Arc<Dispatcher>,
    translator: Arc<ToolCallTranslator>,
    lifecycle: Arc<Lifecycle>,
    pending_styles: DashMap<(u64, Id), ResponseStyle>,
    connection_errors: AtomicU64,
    accepting: AtomicBool,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        queue: Arc<PriorityQueue>,
        dispatcher: Arc<Dispatcher>,
        translator: Arc<ToolCallTranslator>,
        lifecycle: Arc<Lifecycle>,
    ) -> Arc<Self> {
        Arc::new(Server {
            config,
            connections: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            queue,
            dispatcher,
            translator,
            lifecycle,
            pending_styles: DashMap::new(),
            connection_errors: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
        })
    }

    /// Removes a stale socket file left by a dead predecessor, then binds
    /// and starts the accept loop on a dedicated thread.
    pub fn start(self: &Arc<Self>) -> std::io::Result<std::thread::JoinHandle<()>> {
        self.cleanup_stale_socket();

        let listener = UnixListener::bind(&self.config.socket_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&self.config.socket_path)?.permissions();
            perms.set_mode(0o660);
            let _ = std::fs::set_permissions(&self.config.socket_path, perms);
        }

        let server = self.clone();
        Ok(std::thread::Builder::new()
            .name("goxel-accept".to_string())
            .spawn(move || server.accept_loop(listener))
            .expect("failed to spawn accept thread"))
    }

    fn cleanup_stale_socket(&self) {
        if !self.config.socket_path.exists() {
            return;
        }
        let owner_alive = std::fs::read_to_string(&self.config.pid_file)
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .map(crate::lifecycle::pid_is_alive)
            .unwrap_or(false);

        if owner_alive {
            warn!(path = %self.config.socket_path.display(), "socket path owned by a live process, not removing");
            return;
        }
        let _ = std::fs::remove_file(&self.config.socket_path);
    }

    fn accept_loop(self: Arc<Self>, listener: UnixListener) {
        for stream in listener.incoming() {
            if !self.accepting.load(Ordering::Acquire) {
                break;
            }
            let Ok(stream) = stream else { continue };

            if self.connections.len() >= self.config.max_connections {
                drop(stream);
                continue;
            }

            let server = self.clone();
            std::thread::spawn(move || server.handle_connection(stream));
        }
    }

    /// Stops accepting new connections as part of a graceful shutdown drain.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
        let _ = std::fs::remove_file(&self.config.socket_path);
    }

    fn handle_connection(self: Arc<Self>, stream: UnixStream) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<Vec<u8>>();

        let record = Arc::new(ConnectionRecord {
            id,
            connected_at: Instant::now(),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            messages_in: AtomicU64::new(0),
            messages_out: AtomicU64::new(0),
            pending_requests: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            last_activity_unix: AtomicU64::new(now_unix()),
            writer_tx: tx,
            pending_tokens: std::sync::Mutex::new(Vec::new()),
        });
        self.connections.insert(id, record.clone());
        self.lifecycle.connection_opened();

        let write_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => {
                self.connections.remove(&id);
                self.lifecycle.connection_closed();
                return;
            }
        };
        let writer_record = record.clone();
        let writer_handle = std::thread::spawn(move || writer_loop(write_stream, rx, writer_record));

        self.read_loop(stream, &record);

        record.closed.store(true, Ordering::Release);
        record.cancel_all_pending();
        drop(record.writer_tx.clone());
        self.connections.remove(&id);
        self.lifecycle.connection_closed();
        let _ = writer_handle.join();
    }

    fn read_loop(self: &Arc<Self>, mut stream: UnixStream, record: &Arc<ConnectionRecord>) {
        stream
            .set_read_timeout(Some(std::time::Duration::from_millis(500)))
            .ok();

        loop {
            if record.idle_for_ms() > self.config.idle_ms {
                debug!(connection = record.id, "closing idle connection");
                break;
            }

            match wire::read_frame(&mut stream, self.config.max_frame_bytes) {
                Ok(frame) => {
                    record.touch();
                    record
                        .bytes_in
                        .fetch_add((wire::HEADER_LEN + frame.payload.len()) as u64, Ordering::Relaxed);
                    record.messages_in.fetch_add(1, Ordering::Relaxed);
                    self.handle_frame(record, &frame.payload);
                }
                Err(WireError::OversizePayload { .. }) => {
                    self.send_raw_error(record, &DaemonError::InvalidRequest("frame exceeds maximum size".into()));
                    break;
                }
                Err(WireError::UnknownMessageType(v)) => {
                    self.send_raw_error(
                        record,
                        &DaemonError::InvalidRequest(format!("unknown msg_type {v}")),
                    );
                    break;
                }
                Err(WireError::Io { kind, .. }) => {
                    use std::io::ErrorKind;
                    match kind {
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => continue,
                        ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => break,
                        _ => {
                            self.connection_errors.fetch_add(1, Ordering::Relaxed);
                            break;
                        }
                    }
                }
                Err(WireError::NotUtf8) => break,
            }
        }
    }

    fn handle_frame(self: &Arc<Self>, record: &Arc<ConnectionRecord>, payload: &[u8]) {
        let text = match std::str::from_utf8(payload) {
            Ok(t) => t,
            Err(_) => {
                self.send_raw_error(record, &DaemonError::Parse("payload is not valid UTF-8".into()));
                return;
            }
        };

        let raw: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                self.send_raw_error(record, &DaemonError::Parse(e.to_string()));
                return;
            }
        };

        let detection = detect::detect(&raw);
        match detection.dialect {
            Dialect::CanonicalJsonRpc => match Request::from_canonical(&raw) {
                Ok(req) => self.enqueue(record, req, ResponseStyle::Canonical),
                Err(e) => self.send_raw_error(record, &e),
            },
            Dialect::LegacyFlat => match build_legacy_request(&raw) {
                Ok(req) => self.enqueue(record, req, ResponseStyle::Canonical),
                Err(e) => self.send_raw_error(record, &e),
            },
            Dialect::ToolCall => match self.translator.translate_request(&raw) {
                Ok(req) => self.enqueue(record, req, ResponseStyle::ToolCall),
                Err(e) => {
                    let body = ToolCallTranslator::translate_failure(&e);
                    self.send_value(record, body);
                }
            },
            Dialect::Unknown => {
                self.send_raw_error(record, &DaemonError::InvalidRequest("unrecognized payload shape".into()));
            }
        }
    }

    fn enqueue(self: &Arc<Self>, record: &Arc<ConnectionRecord>, req: Request, style: ResponseStyle) {
        self.lifecycle.record_request();
        let id = req.id.clone();
        let is_notification = req.is_notification();
        match self.queue.enqueue(record.id, req, Priority::Normal, 0) {
            Ok((_, token)) => {
                if !is_notification {
                    if let Some(id) = id {
                        self.pending_styles.insert((record.id, id), style);
                    }
                    record.pending_requests.fetch_add(1, Ordering::Relaxed);
                    record.track_token(token);
                }
            }
            Err(_) => {
                self.lifecycle.record_error();
                if !is_notification {
                    let response = Response::failure(id.unwrap_or(Id::Null), &DaemonError::ServerBusy);
                    self.write_response(record, &response);
                }
            }
        }
    }

    fn send_raw_error(&self, record: &Arc<ConnectionRecord>, error: &DaemonError) {
        let response = Response::unparseable(error);
        self.write_response(record, &response);
    }

    fn send_value(&self, record: &Arc<ConnectionRecord>, value: Value) {
        let bytes = serde_json::to_vec(&value).unwrap_or_default();
        self.send_bytes(record, bytes);
    }

    fn write_response(&self, record: &Arc<ConnectionRecord>, response: &Response) {
        let bytes = serde_json::to_vec(response).unwrap_or_default();
        self.send_bytes(record, bytes);
    }

    fn send_bytes(&self, record: &Arc<ConnectionRecord>, payload: Vec<u8>) {
        let framed = wire::encode(0, MessageType::Response, &payload, now_unix() as u32);
        if record.writer_tx.send(framed).is_ok() {
            record.messages_out.fetch_add(1, Ordering::Relaxed);
            record
                .bytes_out
                .fetch_add((wire::HEADER_LEN + payload.len()) as u64, Ordering::Relaxed);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_errors(&self) -> u64 {
        self.connection_errors.load(Ordering::Relaxed)
    }
}

impl ResponseSink for Server {
    fn deliver(&self, client_handle: u64, id: Id, result: Result<Value, DaemonError>) {
        if result.is_err() {
            self.lifecycle.record_error();
        }
        let Some(record) = self.connections.get(&client_handle).map(|r| r.value().clone()) else {
            debug!(client_handle, "discarding response for closed connection");
            return;
        };

        let style = self
            .pending_styles
            .remove(&(client_handle, id.clone()))
            .map(|(_, style)| style)
            .unwrap_or(ResponseStyle::Canonical);

        record.pending_requests.fetch_sub(1, Ordering::Relaxed);

        match style {
            ResponseStyle::Canonical => {
                let response = match result {
                    Ok(value) => Response::success(id, value),
                    Err(e) => Response::failure(id, &e),
                };
                self.write_response(&record, &response);
            }
            ResponseStyle::ToolCall => {
                let value = match result {
                    Ok(value) => ToolCallTranslator::translate_success(value),
                    Err(e) => ToolCallTranslator::translate_failure(&e),
                };
                self.send_value(&record, value);
            }
        }
    }
}

fn writer_loop(mut stream: UnixStream, rx: mpsc::Receiver<Vec<u8>>, record: Arc<ConnectionRecord>) {
    while let Ok(bytes) = rx.recv() {
        if record.closed.load(Ordering::Acquire) {
            break;
        }
        if stream.write_all(&bytes).is_err() {
            // EPIPE/ECONNRESET: the reader loop will notice and tear the
            // connection down; writes on a closed fd are discarded here.
            break;
        }
        let _ = stream.flush();
    }
}

/// Builds a [`Request`] from the legacy flat dialect: `{method, params}`
/// with no `jsonrpc` envelope. Read-only compatibility path — no new
/// client should be built against it.
fn build_legacy_request(raw: &Value) -> Result<Request, DaemonError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| DaemonError::InvalidRequest("legacy request must be a JSON object".into()))?;

    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| DaemonError::InvalidRequest("missing \"method\"".into()))?
        .to_string();

    let params = match obj.get("params") {
        None | Some(Value::Null) => Params::None,
        Some(Value::Array(items)) => Params::ByPosition(items.clone()),
        Some(Value::Object(map)) => Params::ByName(map.clone()),
        Some(_) => return Err(DaemonError::InvalidRequest("\"params\" must be an array, object, or absent".into())),
    };

    let id = match obj.get("id") {
        None => None,
        Some(Value::Null) => Some(Id::Null),
        Some(Value::Number(n)) if n.is_i64() => Some(Id::Integer(n.as_i64().unwrap())),
        Some(Value::String(s)) => Some(Id::String(s.clone())),
        Some(_) => return Err(DaemonError::InvalidRequest("\"id\" must be an integer, string, or null".into())),
    };

    Ok(Request { method, params, id })
}
