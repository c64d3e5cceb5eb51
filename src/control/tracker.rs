use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::storage::{MrvMetrics, OpKind};
use crate::types::LogicalKey;

/// Source of per-key abort rates consumed by the controller.
pub trait AbortSignal: Send + Sync {
    /// Drains the current observation window of `key` and returns its abort
    /// rate, or `None` when the window saw no traffic.
    fn take_abort_rate(&self, key: &LogicalKey) -> Option<f64>;
}

#[derive(Default, Clone, Copy)]
struct Window {
    commits: u64,
    aborts: u64,
}

/// Per-key commit/abort counters.
///
/// Installed as the store's [`MrvMetrics`] it observes every update; an
/// external engine can feed it through [`TxStatusTracker::record`] instead.
/// Reads and resizes are not counted: only updates contend for fragments.
#[derive(Default)]
pub struct TxStatusTracker {
    windows: Mutex<FxHashMap<LogicalKey, Window>>,
    commits: AtomicU64,
    aborts: AtomicU64,
}

impl TxStatusTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one transaction outcome on `key`.
    pub fn record(&self, key: &LogicalKey, committed: bool) {
        let mut windows = self.windows.lock();
        let window = windows.entry(key.clone()).or_default();
        if committed {
            window.commits += 1;
            self.commits.fetch_add(1, Ordering::Relaxed);
        } else {
            window.aborts += 1;
            self.aborts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Cumulative `(commits, aborts)` across all keys since creation.
    pub fn totals(&self) -> (u64, u64) {
        (
            self.commits.load(Ordering::Relaxed),
            self.aborts.load(Ordering::Relaxed),
        )
    }
}

impl AbortSignal for TxStatusTracker {
    fn take_abort_rate(&self, key: &LogicalKey) -> Option<f64> {
        let window = self.windows.lock().remove(key)?;
        let seen = window.commits + window.aborts;
        if seen == 0 {
            return None;
        }
        Some(window.aborts as f64 / seen as f64)
    }
}

impl MrvMetrics for TxStatusTracker {
    fn op_committed(&self, key: &LogicalKey, op: OpKind) {
        if counts(op) {
            self.record(key, true);
        }
    }

    fn op_aborted(&self, key: &LogicalKey, op: OpKind) {
        if counts(op) {
            self.record(key, false);
        }
    }

    fn fragments_resized(&self, _key: &LogicalKey, _from: usize, _to: usize) {}
}

fn counts(op: OpKind) -> bool {
    !matches!(op, OpKind::Read | OpKind::Resize)
}
