use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::LogicalKey;

/// Logical operation kinds reported to [`MrvMetrics`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OpKind {
    /// Single-fragment increment.
    Add,
    /// Sweeping decrement.
    Subtract,
    /// Increment spread over the smallest fragments.
    DistributedAdd,
    /// Exact full-key set.
    Write,
    /// Total or threshold read.
    Read,
    /// Fragment count change.
    Resize,
}

/// Trait for tracking the outcome of MRV operations.
///
/// The store reports every completed operation as either committed or
/// aborted; an abort is an operation that lost a lock race and surfaced
/// [`crate::types::MrvError::Conflict`]. Domain failures such as an
/// insufficient value are reported as neither.
pub trait MrvMetrics: Send + Sync {
    /// Records an operation that applied its effect.
    fn op_committed(&self, key: &LogicalKey, op: OpKind);

    /// Records an operation that aborted on lock contention.
    fn op_aborted(&self, key: &LogicalKey, op: OpKind);

    /// Records a fragment count change of `key`.
    fn fragments_resized(&self, key: &LogicalKey, from: usize, to: usize);
}

/// A no-op implementation of [`MrvMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl MrvMetrics for NoopMetrics {
    fn op_committed(&self, _key: &LogicalKey, _op: OpKind) {}
    fn op_aborted(&self, _key: &LogicalKey, _op: OpKind) {}
    fn fragments_resized(&self, _key: &LogicalKey, _from: usize, _to: usize) {}
}

/// A thread-safe counter-based implementation of [`MrvMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Committed single-fragment and distributed adds.
    pub adds: AtomicU64,
    /// Committed subtracts.
    pub subtracts: AtomicU64,
    /// Committed writes.
    pub writes: AtomicU64,
    /// Committed reads.
    pub reads: AtomicU64,
    /// Operations aborted on contention.
    pub aborts: AtomicU64,
    /// Fragments added by resizing.
    pub fragments_grown: AtomicU64,
    /// Fragments removed by resizing.
    pub fragments_shrunk: AtomicU64,
}

impl CounterMetrics {
    /// Fraction of operations that aborted so far.
    pub fn abort_rate(&self) -> f64 {
        let aborts = self.aborts.load(Ordering::Relaxed);
        let commits = self.adds.load(Ordering::Relaxed)
            + self.subtracts.load(Ordering::Relaxed)
            + self.writes.load(Ordering::Relaxed)
            + self.reads.load(Ordering::Relaxed);
        if aborts + commits == 0 {
            0.0
        } else {
            aborts as f64 / (aborts + commits) as f64
        }
    }
}

impl MrvMetrics for CounterMetrics {
    fn op_committed(&self, _key: &LogicalKey, op: OpKind) {
        let counter = match op {
            OpKind::Add | OpKind::DistributedAdd => &self.adds,
            OpKind::Subtract => &self.subtracts,
            OpKind::Write => &self.writes,
            OpKind::Read => &self.reads,
            OpKind::Resize => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn op_aborted(&self, _key: &LogicalKey, _op: OpKind) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    fn fragments_resized(&self, _key: &LogicalKey, from: usize, to: usize) {
        if to > from {
            self.fragments_grown
                .fetch_add((to - from) as u64, Ordering::Relaxed);
        } else {
            self.fragments_shrunk
                .fetch_add((from - to) as u64, Ordering::Relaxed);
        }
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
pub fn default_metrics() -> Arc<dyn MrvMetrics> {
    Arc::new(NoopMetrics)
}
