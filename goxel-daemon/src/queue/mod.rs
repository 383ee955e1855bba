//! Bounded priority queue with three strict FIFO bands.
//!
//! Three priority levels, FIFO within a level, completion stats per
//! level, separate enqueue/dequeue paths behind a shared waiter signal.
//! Built on `std::thread`/`parking_lot::{Mutex, Condvar}` rather than
//! async channels, since workers here are synchronous OS threads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::protocol::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
}

impl Priority {
    fn band_index(self) -> usize {
        self as usize
    }
}

/// Opaque handle identifying who should receive the eventual response.
/// The queue never dereferences it; the socket server maps it back to a
/// connection's write channel via a `request_id` key into a central
/// table rather than a back-pointer, which keeps the queue decoupled
/// from connection lifetime.
pub type ClientHandle = u64;

/// A request held by the queue.
pub struct QueuedRequest {
    pub request_id: u32,
    pub client_handle: ClientHandle,
    pub payload: Request,
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub timeout_ms: u32,
    cancelled: Arc<AtomicBool>,
}

impl QueuedRequest {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn has_timed_out(&self) -> bool {
        self.timeout_ms != 0 && self.enqueued_at.elapsed() > Duration::from_millis(self.timeout_ms as u64)
    }
}

/// Lightweight token returned by `enqueue` so callers (the connection
/// layer, on disconnect) can flag cancellation without touching the queue
/// internals.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("queue is at capacity")]
pub struct QueueFullError;

#[derive(Default)]
pub struct QueueStats {
    pub enqueued: AtomicU64,
    pub dequeued: AtomicU64,
    pub completed: AtomicU64,
    pub discarded: AtomicU64,
    total_wait_ms: AtomicU64,
    wait_samples: AtomicU64,
}

impl QueueStats {
    pub fn record_wait(&self, wait_ms: u64) {
        self.total_wait_ms.fetch_add(wait_ms, Ordering::Relaxed);
        self.wait_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn average_wait_ms(&self) -> f64 {
        let samples = self.wait_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0.0;
        }
        self.total_wait_ms.load(Ordering::Relaxed) as f64 / samples as f64
    }

    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            average_wait_ms: self.average_wait_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueStatsSnapshot {
    pub enqueued: u64,
    pub dequeued: u64,
    pub completed: u64,
    pub discarded: u64,
    pub average_wait_ms: f64,
}

struct Bands {
    /// Index 0 = Low, 1 = Normal, 2 = High.
    bands: [VecDeque<QueuedRequest>; 3],
    stopping: bool,
}

impl Bands {
    fn len(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    /// Pops the head of the highest non-empty band.
    fn pop_highest(&mut self) -> Option<QueuedRequest> {
        for band in self.bands.iter_mut().rev() {
            if let Some(req) = band.pop_front() {
                return Some(req);
            }
        }
        None
    }
}

/// Bounded priority queue. Capacity `C` is enforced across all bands
/// combined.
pub struct PriorityQueue {
    capacity: usize,
    state: Mutex<Bands>,
    not_empty: Condvar,
    request_id_seq: AtomicU32,
    pub stats: QueueStats,
}

impl PriorityQueue {
    pub fn new(capacity: usize) -> Self {
        PriorityQueue {
            capacity,
            state: Mutex::new(Bands {
                bands: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                stopping: false,
            }),
            not_empty: Condvar::new(),
            request_id_seq: AtomicU32::new(1),
            stats: QueueStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues a request. Returns its assigned `request_id` and a
    /// [`CancelToken`] the caller can use to flag cooperative cancellation
    /// on client disconnect.
    pub fn enqueue(
        &self,
        client_handle: ClientHandle,
        payload: Request,
        priority: Priority,
        timeout_ms: u32,
    ) -> Result<(u32, CancelToken), QueueFullError> {
        let mut state = self.state.lock();
        if state.len() >= self.capacity {
            return Err(QueueFullError);
        }

        let request_id = self.request_id_seq.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = QueuedRequest {
            request_id,
            client_handle,
            payload,
            priority,
            enqueued_at: Instant::now(),
            timeout_ms,
            cancelled: cancelled.clone(),
        };
        state.bands[priority.band_index()].push_back(entry);
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        drop(state);
        self.not_empty.notify_one();

        Ok((request_id, CancelToken { flag: cancelled }))
    }

    /// Blocks until a request is available or the queue is told to stop
    /// (shutdown drain). Returns `None` once stopping and drained.
    pub fn dequeue_blocking(&self) -> Option<QueuedRequest> {
        let mut state = self.state.lock();
        loop {
            if let Some(req) = state.pop_highest() {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                return Some(req);
            }
            if state.stopping {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Signals all blocked workers to stop once the queue drains.
    pub fn signal_stop(&self) {
        self.state.lock().stopping = true;
        self.not_empty.notify_all();
    }

    pub fn mark_completed(&self) {
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_discarded(&self) {
        self.stats.discarded.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Params;

    fn req(method: &str) -> Request {
        Request {
            method: method.to_string(),
            params: Params::None,
            id: Some(crate::protocol::Id::Integer(1)),
        }
    }

    #[test]
    fn fifo_within_a_band() {
        let q = PriorityQueue::new(10);
        for i in 0..5 {
            q.enqueue(i, req("a"), Priority::Normal, 0).unwrap();
        }
        for i in 0..5 {
            let entry = q.dequeue_blocking().unwrap();
            assert_eq!(entry.client_handle, i);
        }
    }

    #[test]
    fn higher_band_always_preempts_lower() {
        let q = PriorityQueue::new(200);
        for i in 0..100 {
            q.enqueue(i, req("normal"), Priority::Normal, 0).unwrap();
        }
        q.enqueue(999, req("high"), Priority::High, 0).unwrap();

        let first = q.dequeue_blocking().unwrap();
        assert_eq!(first.client_handle, 999);
        assert_eq!(first.priority, Priority::High);
    }

    #[test]
    fn rejects_past_capacity() {
        let q = PriorityQueue::new(2);
        q.enqueue(1, req("a"), Priority::Low, 0).unwrap();
        q.enqueue(2, req("a"), Priority::Low, 0).unwrap();
        let err = q.enqueue(3, req("a"), Priority::Low, 0);
        assert!(err.is_err());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn cancel_token_flags_entry() {
        let q = PriorityQueue::new(10);
        let (_, token) = q.enqueue(1, req("a"), Priority::Normal, 0).unwrap();
        token.cancel();
        let entry = q.dequeue_blocking().unwrap();
        assert!(entry.is_cancelled());
    }

    #[test]
    fn dequeue_unblocks_on_stop_when_empty() {
        let q = Arc::new(PriorityQueue::new(10));
        let q2 = q.clone();
        let handle = std::thread::spawn(move || q2.dequeue_blocking());
        std::thread::sleep(Duration::from_millis(20));
        q.signal_stop();
        let result = handle.join().unwrap();
        assert!(result.is_none());
    }

    // Queue size never exceeds capacity, for any mix of enqueue outcomes.
    proptest::proptest! {
        #[test]
        fn queue_never_exceeds_capacity(n in 0usize..50, cap in 1usize..20) {
            let q = PriorityQueue::new(cap);
            let mut accepted = 0;
            for i in 0..n {
                if q.enqueue(i as u64, req("a"), Priority::Normal, 0).is_ok() {
                    accepted += 1;
                }
                prop_assert!(q.len() <= cap);
            }
            prop_assert_eq!(q.len(), accepted.min(cap));
        }
    }

    // Priority ordering holds for arbitrary interleavings of enqueue calls.
    proptest::proptest! {
        #[test]
        fn priority_ordering_holds(seq in proptest::collection::vec(0u8..3, 1..40)) {
            let q = PriorityQueue::new(1000);
            for (i, p) in seq.iter().enumerate() {
                let priority = match p {
                    0 => Priority::Low,
                    1 => Priority::Normal,
                    _ => Priority::High,
                };
                q.enqueue(i as u64, req("a"), priority, 0).unwrap();
            }

            let mut last_priority = Priority::High;
            let mut seen_in_band: Vec<u64> = vec![];
            while let Some(entry) = q.dequeue_blocking() {
                prop_assert!(entry.priority <= last_priority);
                if entry.priority == last_priority {
                    if let Some(&prev) = seen_in_band.last() {
                        prop_assert!(entry.client_handle > prev);
                    }
                } else {
                    seen_in_band.clear();
                }
                seen_in_band.push(entry.client_handle);
                last_priority = entry.priority;
                if q.is_empty() {
                    break;
                }
            }
        }
    }
}
