//! Worker pool: a fixed-size pool of synchronous OS threads draining the
//! priority queue and invoking the method dispatcher.
//!
//! `WorkerPool::new` spawns N workers, each tracked through shared
//! `PoolStats` atomics. Backpressure is blocking `std::thread` workers
//! parked on a condvar-signalled queue rather than an async runtime —
//! there is no cooperative scheduler to yield to here.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::dispatch::Dispatcher;
use crate::error::DaemonError;
use crate::protocol::Id;
use crate::queue::{PriorityQueue, QueuedRequest};
use serde_json::Value;

/// Delivers a completed result back to the connection that submitted it,
/// keyed by the entry's `client_handle`. The socket server implements
/// this — it alone knows whether the originating request was canonical
/// JSON-RPC or tool-call dialect, and formats the wire payload
/// accordingly. Workers never touch connection internals directly.
pub trait ResponseSink: Send + Sync {
    fn deliver(&self, client_handle: u64, id: Id, result: Result<Value, DaemonError>);
}

#[derive(Default)]
pub struct PoolStats {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    total_processing_nanos: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub average_processing_nanos: f64,
}

impl PoolStats {
    fn record(&self, failed: bool, elapsed: Duration) {
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_processing_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let total = processed + failed;
        let average_processing_nanos = if total == 0 {
            0.0
        } else {
            self.total_processing_nanos.load(Ordering::Relaxed) as f64 / total as f64
        };
        PoolStatsSnapshot {
            processed,
            failed,
            average_processing_nanos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Initializing,
    Running,
    Stopping,
    Stopped,
}

/// Default worker count: logical CPU count, clamped to [2, 16].
pub fn default_worker_count(logical_cpus: usize) -> usize {
    logical_cpus.clamp(2, 16)
}

pub struct WorkerPool {
    queue: Arc<PriorityQueue>,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn ResponseSink>,
    pub stats: Arc<PoolStats>,
    state: Arc<parking_lot::Mutex<PoolState>>,
    handles: Arc<parking_lot::Mutex<Vec<std::thread::JoinHandle<()>>>>,
    /// Wall-clock point past which a worker discards rather than executes
    /// whatever it next dequeues. `None` while running; set by `stop`.
    deadline: Arc<parking_lot::Mutex<Option<Instant>>>,
    worker_count: usize,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        queue: Arc<PriorityQueue>,
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn ResponseSink>,
    ) -> Self {
        WorkerPool {
            queue,
            dispatcher,
            sink,
            stats: Arc::new(PoolStats::default()),
            state: Arc::new(parking_lot::Mutex::new(PoolState::Initializing)),
            handles: Arc::new(parking_lot::Mutex::new(Vec::new())),
            deadline: Arc::new(parking_lot::Mutex::new(None)),
            worker_count,
        }
    }

    pub fn state(&self) -> PoolState {
        *self.state.lock()
    }

    /// Spawns the fixed-size worker fleet.
    pub fn start(&self) {
        *self.state.lock() = PoolState::Running;
        let mut handles = self.handles.lock();
        for worker_id in 0..self.worker_count {
            handles.push(spawn_worker(
                worker_id,
                self.queue.clone(),
                self.dispatcher.clone(),
                self.sink.clone(),
                self.stats.clone(),
                self.state.clone(),
                self.deadline.clone(),
                self.handles.clone(),
            ));
        }
    }

    /// Signals the queue, waits up to `shutdown_timeout_ms` for workers to
    /// drain, then abandons whatever remains. Sets the shared deadline so
    /// workers still draining the backlog discard rather than execute
    /// anything not reached in time.
    pub fn stop(&self, shutdown_timeout_ms: u64) {
        *self.state.lock() = PoolState::Stopping;
        let join_deadline = Instant::now() + Duration::from_millis(shutdown_timeout_ms);
        *self.deadline.lock() = Some(join_deadline);
        self.queue.signal_stop();

        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let remaining = join_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                // Thread is detached; it will exit on its own once it next
                // checks the deadline. We don't block the shutdown path on it.
                drop(handle);
                continue;
            }
            let _ = handle.join();
        }
        *self.state.lock() = PoolState::Stopped;
    }
}

/// Spawns one worker thread. If the thread unwinds past `run_worker`
/// itself (a panic `catch_unwind` inside `process_entry` didn't catch),
/// it is respawned in place so long as the pool is still `Running` — a
/// panicking handler costs the in-flight request, never a worker slot.
fn spawn_worker(
    worker_id: usize,
    queue: Arc<PriorityQueue>,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn ResponseSink>,
    stats: Arc<PoolStats>,
    state: Arc<parking_lot::Mutex<PoolState>>,
    deadline: Arc<parking_lot::Mutex<Option<Instant>>>,
    handles: Arc<parking_lot::Mutex<Vec<std::thread::JoinHandle<()>>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("goxel-worker-{worker_id}"))
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_worker(queue.clone(), dispatcher.clone(), sink.clone(), stats.clone(), deadline.clone());
            }));
            if outcome.is_err() && *state.lock() == PoolState::Running {
                warn!(worker_id, "worker thread unwound outside request handling, respawning");
                let respawned =
                    spawn_worker(worker_id, queue, dispatcher, sink, stats, state, deadline, handles.clone());
                handles.lock().push(respawned);
            }
        })
        .expect("failed to spawn worker thread")
}

fn run_worker(
    queue: Arc<PriorityQueue>,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn ResponseSink>,
    stats: Arc<PoolStats>,
    deadline: Arc<parking_lot::Mutex<Option<Instant>>>,
) {
    loop {
        let entry = match queue.dequeue_blocking() {
            Some(entry) => entry,
            None => break, // queue stopped and drained
        };

        if let Some(d) = *deadline.lock() {
            if Instant::now() >= d {
                queue.mark_discarded();
                continue;
            }
        }

        process_entry(entry, &dispatcher, &sink, &stats, &queue);
    }
}

/// One worker iteration: account a cancelled entry and move on; return a
/// timeout without invoking the handler for an entry dequeued past its
/// deadline; otherwise dispatch, measure, and deliver. A panicking
/// handler is caught and turned into an `engine_failure` response rather
/// than taking the worker thread down with it.
fn process_entry(
    entry: QueuedRequest,
    dispatcher: &Dispatcher,
    sink: &Arc<dyn ResponseSink>,
    stats: &PoolStats,
    queue: &PriorityQueue,
) {
    if entry.is_cancelled() {
        queue.mark_discarded();
        return;
    }

    let client_handle = entry.client_handle;
    let is_notification = entry.payload.id.is_none();
    let id = entry.payload.id.clone().unwrap_or(Id::Null);

    if entry.has_timed_out() {
        if !is_notification {
            sink.deliver(client_handle, id, Err(DaemonError::Timeout));
        }
        queue.mark_discarded();
        return;
    }

    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        dispatcher.dispatch(&entry.payload.method, &entry.payload.params)
    }));
    let elapsed = started.elapsed();

    let result = match outcome {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(&payload);
            warn!(method = %entry.payload.method, %message, "handler panicked; isolating the failure to this request");
            Err(DaemonError::EngineFailure { kind: "worker_panic".to_string(), message })
        }
    };

    stats.record(result.is_err(), elapsed);
    queue.mark_completed();
    if !is_notification {
        sink.deliver(client_handle, id, result);
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked with a non-string payload".to_string()
    }
}
