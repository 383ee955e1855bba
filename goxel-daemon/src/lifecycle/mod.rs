//! Daemon lifecycle: PID-file mutual exclusion, async-signal-safe signal
//! handling, and the `stopped -> starting -> running -> draining ->
//! stopped` state machine.
//!
//! `libc::kill`/`libc::signal` do the process-control work: liveness
//! probing for PID-file exclusion and installing the flag-flipping
//! signal handlers.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::DaemonError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Starting,
    Running,
    Draining,
    Error,
}

/// Checks whether `pid` names a live process via `kill(pid, 0)`, which
/// sends no signal but still performs the existence/permission check.
pub fn pid_is_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs no action beyond the existence check;
    // this is the documented idiom for liveness probing.
    let result = unsafe { libc::kill(pid, 0) };
    result == 0
}

/// Owns the PID file for the process lifetime; unlinked on drop.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Creates `path` with `O_CREAT|O_EXCL`. If it already exists and
    /// names a live process, fails with `already_running`. If it exists
    /// but is stale (no live owner), removes it and retries once.
    pub fn acquire(path: PathBuf) -> Result<Self, DaemonError> {
        match Self::try_create(&path) {
            Ok(()) => return Ok(PidFile { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(io_error("pid_file_create", e)),
        }

        let existing_pid = Self::read_pid(&path)?;
        if pid_is_alive(existing_pid) {
            return Err(DaemonError::EngineFailure {
                kind: "already_running".to_string(),
                message: format!("pid {existing_pid} is still alive, holding {}", path.display()),
            });
        }

        std::fs::remove_file(&path).map_err(|e| io_error("pid_file_remove_stale", e))?;
        Self::try_create(&path).map_err(|e| io_error("pid_file_create_retry", e))?;
        Ok(PidFile { path })
    }

    fn try_create(path: &Path) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(path)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()
    }

    fn read_pid(path: &Path) -> Result<i32, DaemonError> {
        let mut contents = String::new();
        std::fs::File::open(path)
            .and_then(|mut f| f.read_to_string(&mut contents))
            .map_err(|e| io_error("pid_file_read", e))?;
        contents
            .trim()
            .parse::<i32>()
            .map_err(|_| DaemonError::EngineFailure {
                kind: "pid_file_corrupt".to_string(),
                message: format!("{} does not contain a valid pid", path.display()),
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn io_error(op: &'static str, e: std::io::Error) -> DaemonError {
    DaemonError::EngineFailure {
        kind: op.to_string(),
        message: e.to_string(),
    }
}

static SIGTERM_FLAG: AtomicBool = AtomicBool::new(false);
static SIGINT_FLAG: AtomicBool = AtomicBool::new(false);
static SIGHUP_FLAG: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_sig: libc::c_int) {
    SIGTERM_FLAG.store(true, Ordering::SeqCst);
}

extern "C" fn on_interrupt_signal(_sig: libc::c_int) {
    SIGINT_FLAG.store(true, Ordering::SeqCst);
}

extern "C" fn on_hangup_signal(_sig: libc::c_int) {
    SIGHUP_FLAG.store(true, Ordering::SeqCst);
}

/// Installs async-signal-safe handlers that only flip atomic flags.
/// `SIGPIPE` is ignored outright so writes to a closed socket surface as
/// `EPIPE` instead of killing the process.
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, on_shutdown_signal as libc::sighandler_t);
        libc::signal(libc::SIGINT, on_interrupt_signal as libc::sighandler_t);
        libc::signal(libc::SIGHUP, on_hangup_signal as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

pub fn shutdown_requested() -> bool {
    SIGTERM_FLAG.swap(false, Ordering::SeqCst) || SIGINT_FLAG.swap(false, Ordering::SeqCst)
}

pub fn reload_requested() -> bool {
    SIGHUP_FLAG.swap(false, Ordering::SeqCst)
}

#[derive(Default)]
struct Counters {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    current_connections: AtomicU64,
    last_activity_timestamp: AtomicI64,
}

/// Tracks the daemon's published state and counters.
pub struct Lifecycle {
    state: parking_lot::Mutex<DaemonState>,
    started_at: Instant,
    counters: Counters,
}

impl Lifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Lifecycle {
            state: parking_lot::Mutex::new(DaemonState::Stopped),
            started_at: Instant::now(),
            counters: Counters::default(),
        })
    }

    pub fn transition_to(&self, state: DaemonState) {
        *self.state.lock() = state;
    }

    pub fn state(&self) -> DaemonState {
        *self.state.lock()
    }

    pub fn record_request(&self) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        self.touch_activity();
    }

    pub fn record_error(&self) {
        self.counters.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.counters.current_connections.fetch_add(1, Ordering::Relaxed);
        self.touch_activity();
    }

    pub fn connection_closed(&self) {
        self.counters.current_connections.fetch_sub(1, Ordering::Relaxed);
    }

    fn touch_activity(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.counters.last_activity_timestamp.store(now, Ordering::Relaxed);
    }

    pub fn stats(&self) -> LifecycleStats {
        LifecycleStats {
            state: self.state(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            total_errors: self.counters.total_errors.load(Ordering::Relaxed),
            current_connections: self.counters.current_connections.load(Ordering::Relaxed),
            last_activity_timestamp: self.counters.last_activity_timestamp.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LifecycleStats {
    pub state: DaemonState,
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub current_connections: u64,
    pub last_activity_timestamp: i64,
}
