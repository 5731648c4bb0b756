//! Observability hooks for the queue.
//!
//! The queue reports through a [`QueueRecorder`] injected at construction:
//! typed slots instead of a name-keyed registry, so embedders wire the
//! recorder straight into whatever metrics backend they run. [`NoopRecorder`]
//! is the default; [`InMemoryRecorder`] keeps everything in process for
//! dashboards and tests.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Receiver for the queue's measurements.
///
/// All methods have empty default bodies so implementations only override
/// the slots they care about. Implementations must be cheap and non-blocking;
/// they are called from the hot paths of the consumer loop.
pub trait QueueRecorder: Send + Sync {
    /// Round-trip time of a `push`, including serialization.
    fn push_latency(&self, _elapsed: Duration) {}

    /// Time the consumer loop spent inside the blocking ready-list pop.
    fn idle_wait(&self, _elapsed: Duration) {}

    /// Time a claimed document waited for handler capacity.
    fn execute_wait(&self, _elapsed: Duration) {}

    /// Time spent returning a document to the ready list after the handler
    /// scheduler rejected it.
    fn restore_blocked(&self, _elapsed: Duration) {}

    /// Current length of the ready list. Sampled through a cache, at most
    /// once per [`GAUGE_WINDOW`].
    fn ready_len(&self, _len: u64) {}

    /// A payload or state record failed to encode or decode.
    fn serialization_error(&self) {}
}

/// Recorder that drops every measurement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl QueueRecorder for NoopRecorder {}

/// Recorder keeping counters and cumulative timings in process.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    push_count: AtomicU64,
    push_total_ms: AtomicU64,
    idle_count: AtomicU64,
    idle_total_ms: AtomicU64,
    execute_wait_count: AtomicU64,
    execute_wait_total_ms: AtomicU64,
    restore_blocked_count: AtomicU64,
    restore_blocked_total_ms: AtomicU64,
    ready_len: AtomicU64,
    serialization_errors: AtomicU64,
}

/// Point-in-time copy of an [`InMemoryRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSnapshot {
    pub push_count: u64,
    pub push_total_ms: u64,
    pub idle_count: u64,
    pub idle_total_ms: u64,
    pub execute_wait_count: u64,
    pub execute_wait_total_ms: u64,
    pub restore_blocked_count: u64,
    pub restore_blocked_total_ms: u64,
    pub ready_len: u64,
    pub serialization_errors: u64,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RecorderSnapshot {
        RecorderSnapshot {
            push_count: self.push_count.load(Ordering::Relaxed),
            push_total_ms: self.push_total_ms.load(Ordering::Relaxed),
            idle_count: self.idle_count.load(Ordering::Relaxed),
            idle_total_ms: self.idle_total_ms.load(Ordering::Relaxed),
            execute_wait_count: self.execute_wait_count.load(Ordering::Relaxed),
            execute_wait_total_ms: self.execute_wait_total_ms.load(Ordering::Relaxed),
            restore_blocked_count: self.restore_blocked_count.load(Ordering::Relaxed),
            restore_blocked_total_ms: self.restore_blocked_total_ms.load(Ordering::Relaxed),
            ready_len: self.ready_len.load(Ordering::Relaxed),
            serialization_errors: self.serialization_errors.load(Ordering::Relaxed),
        }
    }

    fn record(count: &AtomicU64, total_ms: &AtomicU64, elapsed: Duration) {
        count.fetch_add(1, Ordering::Relaxed);
        total_ms.fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }
}

impl QueueRecorder for InMemoryRecorder {
    fn push_latency(&self, elapsed: Duration) {
        Self::record(&self.push_count, &self.push_total_ms, elapsed);
    }

    fn idle_wait(&self, elapsed: Duration) {
        Self::record(&self.idle_count, &self.idle_total_ms, elapsed);
    }

    fn execute_wait(&self, elapsed: Duration) {
        Self::record(&self.execute_wait_count, &self.execute_wait_total_ms, elapsed);
    }

    fn restore_blocked(&self, elapsed: Duration) {
        Self::record(
            &self.restore_blocked_count,
            &self.restore_blocked_total_ms,
            elapsed,
        );
    }

    fn ready_len(&self, len: u64) {
        self.ready_len.store(len, Ordering::Relaxed);
    }

    fn serialization_error(&self) {
        self.serialization_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Sampling window of the ready-list length gauge.
pub const GAUGE_WINDOW: Duration = Duration::from_secs(15);

/// Rate limiter for a periodically sampled gauge.
///
/// Lock-free: concurrent claimants race on a compare-exchange and exactly
/// one wins per window.
#[derive(Debug)]
pub(crate) struct GaugeCache {
    window_ms: i64,
    last_sampled_ms: AtomicI64,
}

impl GaugeCache {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis() as i64,
            last_sampled_ms: AtomicI64::new(0),
        }
    }

    /// Returns true when the caller should take a fresh sample now.
    pub(crate) fn try_claim(&self, now_ms: i64) -> bool {
        let last = self.last_sampled_ms.load(Ordering::Relaxed);
        if now_ms - last < self.window_ms {
            return false;
        }
        self.last_sampled_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}
