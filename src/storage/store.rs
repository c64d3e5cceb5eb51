use std::sync::Arc;
use std::thread;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::seq::index;
use rand::Rng;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::primitives::concurrency::{FragmentCell, LockSet};
use crate::types::{Fragment, LogicalKey, MrvError, Result, Rk, Value};

use super::metrics::{default_metrics, MrvMetrics, OpKind};
use super::options::MrvOptions;

/// Summary of one key's fragment distribution.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentStats {
    /// Number of fragments.
    pub fragments: usize,
    /// Sum of fragment values.
    pub total: Value,
    /// Population standard deviation divided by the mean (mean 0 counts as 1).
    pub variation: f64,
    /// Fragments currently holding zero.
    pub zeros: usize,
}

/// Fragments of one key, sorted by ascending `rk`.
pub(crate) struct Layout {
    pub(crate) cells: Vec<FragmentCell>,
    live: bool,
}

impl Layout {
    /// Index of the first fragment with `rk >= hint`, wrapping to the smallest.
    pub(crate) fn start_index(&self, hint: Rk) -> usize {
        let idx = self.cells.partition_point(|cell| cell.rk() < hint);
        if idx == self.cells.len() {
            0
        } else {
            idx
        }
    }

    pub(crate) fn cell_refs(&self) -> Vec<&FragmentCell> {
        self.cells.iter().collect()
    }
}

pub(crate) struct KeyEntry {
    pub(crate) layout: RwLock<Layout>,
}

/// Multi-record value store: maps logical keys to their fragments.
///
/// Single-fragment operations hold the key's layout latch in shared mode and
/// lock only the fragments they touch. Resizing and deletion take the latch
/// exclusively, which is the only way the set of fragments changes.
pub struct MrvStore {
    pub(crate) opts: MrvOptions,
    pub(crate) metrics: Arc<dyn MrvMetrics>,
    keys: RwLock<FxHashMap<LogicalKey, Arc<KeyEntry>>>,
}

impl MrvStore {
    /// Opens an empty store with the given options.
    pub fn open(opts: MrvOptions) -> Result<Self> {
        opts.validate()?;
        let metrics = opts.metrics.clone().unwrap_or_else(default_metrics);
        Ok(Self {
            opts,
            metrics,
            keys: RwLock::new(FxHashMap::default()),
        })
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &MrvOptions {
        &self.opts
    }

    /// Creates the fragments of a new logical value.
    ///
    /// The fragment count is `initial_node_count` capped at `max_nodes`, reduced
    /// to `max(1, initial_value / min_amount_per_node)` when fragments would
    /// otherwise be expected to hold less than the configured minimum. Returns
    /// the number of fragments created.
    pub fn create<R: Rng + ?Sized>(
        &self,
        key: &LogicalKey,
        initial_value: Value,
        initial_node_count: usize,
        rng: &mut R,
    ) -> Result<usize> {
        if initial_value < 0 {
            return Err(MrvError::InvalidArgument("initial value must be non-negative"));
        }
        if initial_node_count == 0 {
            return Err(MrvError::InvalidArgument("initial node count must be at least 1"));
        }
        let count = self.initial_count(initial_value, initial_node_count);
        let cells = split_value(initial_value, count, self.opts.max_nodes, rng);
        let mut keys = self.keys.write();
        if keys.contains_key(key) {
            return Err(MrvError::KeyExists(key.clone()));
        }
        keys.insert(
            key.clone(),
            Arc::new(KeyEntry {
                layout: RwLock::new(Layout { cells, live: true }),
            }),
        );
        debug!(%key, initial_value, fragments = count, "mrv.store.create");
        Ok(count)
    }

    fn initial_count(&self, value: Value, requested: usize) -> usize {
        let mut count = requested.min(usize::from(self.opts.max_nodes));
        let min_amount = self.opts.min_amount_per_node;
        if min_amount > 0 && value < min_amount.saturating_mul(count as Value) {
            count = ((value / min_amount) as usize).max(1);
        }
        count
    }

    /// Removes every fragment of `key`.
    pub fn delete(&self, key: &LogicalKey) -> Result<()> {
        let entry = self.entry(key)?;
        let mut layout = self.write_layout(&entry, key)?;
        layout.live = false;
        layout.cells.clear();
        drop(layout);
        self.keys.write().remove(key);
        debug!(%key, "mrv.store.delete");
        Ok(())
    }

    /// Returns `true` when `key` has fragments.
    pub fn contains(&self, key: &LogicalKey) -> bool {
        self.keys.read().contains_key(key)
    }

    /// All logical keys currently stored, in ascending order.
    pub fn keys(&self) -> Vec<LogicalKey> {
        let mut keys: Vec<LogicalKey> = self.keys.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of the fragments of `key` in ascending `rk` order.
    ///
    /// Each value is read under its own row lock; concurrent mutations may be
    /// observed part-way.
    pub fn fragments_of(&self, key: &LogicalKey) -> Result<Vec<Fragment>> {
        let entry = self.entry(key)?;
        let layout = self.read_layout(&entry, key)?;
        Ok(layout
            .cells
            .iter()
            .map(|cell| Fragment {
                key: key.clone(),
                rk: cell.rk(),
                value: cell.load(),
            })
            .collect())
    }

    /// Current number of fragments of `key`.
    pub fn fragment_count(&self, key: &LogicalKey) -> Result<usize> {
        let entry = self.entry(key)?;
        let layout = self.read_layout(&entry, key)?;
        Ok(layout.cells.len())
    }

    /// Distribution summary of `key`.
    pub fn stats(&self, key: &LogicalKey) -> Result<FragmentStats> {
        let values: Vec<Value> = self
            .fragments_of(key)?
            .into_iter()
            .map(|fragment| fragment.value)
            .collect();
        let fragments = values.len();
        let total = checked_total(values.iter().copied())?;
        let mean = total as f64 / fragments as f64;
        let variance = values
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / fragments as f64;
        let divisor = if mean == 0.0 { 1.0 } else { mean };
        Ok(FragmentStats {
            fragments,
            total,
            variation: variance.sqrt() / divisor,
            zeros: values.iter().filter(|&&v| v == 0).count(),
        })
    }

    /// Grows `key` to `target` fragments and rebalances its value over them.
    pub fn grow<R: Rng + ?Sized>(
        &self,
        key: &LogicalKey,
        target: usize,
        rng: &mut R,
    ) -> Result<()> {
        self.check_target(target)?;
        let result = self.resize_with(key, target, |layout, current| {
            if target < current {
                return Err(MrvError::InvalidArgument(
                    "grow target is below the current fragment count",
                ));
            }
            let mut free: Vec<u16> = (0..self.opts.max_nodes).collect();
            free.retain(|slot| {
                layout
                    .cells
                    .binary_search_by_key(&Rk(*slot), FragmentCell::rk)
                    .is_err()
            });
            for pick in index::sample(rng, free.len(), target - current) {
                layout.cells.push(FragmentCell::new(Rk(free[pick]), 0));
            }
            layout.cells.sort_by_key(FragmentCell::rk);
            Ok(())
        });
        self.record(key, OpKind::Resize, result)
    }

    /// Shrinks `key` to `target` fragments and rebalances its value over them.
    pub fn shrink<R: Rng + ?Sized>(
        &self,
        key: &LogicalKey,
        target: usize,
        rng: &mut R,
    ) -> Result<()> {
        self.check_target(target)?;
        let result = self.resize_with(key, target, |layout, current| {
            if target > current {
                return Err(MrvError::InvalidArgument(
                    "shrink target is above the current fragment count",
                ));
            }
            let mut doomed: Vec<usize> = index::sample(rng, current, current - target).into_vec();
            doomed.sort_unstable_by(|a, b| b.cmp(a));
            for idx in doomed {
                layout.cells.remove(idx);
            }
            Ok(())
        });
        self.record(key, OpKind::Resize, result)
    }

    /// Grows or shrinks `key` to `target` fragments.
    pub fn resize<R: Rng + ?Sized>(
        &self,
        key: &LogicalKey,
        target: usize,
        rng: &mut R,
    ) -> Result<()> {
        let current = self.fragment_count(key)?;
        if target >= current {
            self.grow(key, target, rng)
        } else {
            self.shrink(key, target, rng)
        }
    }

    fn check_target(&self, target: usize) -> Result<()> {
        let (min, max) = (self.opts.min_nodes, usize::from(self.opts.max_nodes));
        if target < min || target > max {
            return Err(MrvError::InvalidFragmentCount {
                requested: target,
                min,
                max,
            });
        }
        Ok(())
    }

    /// Applies `change` to the fragment set under the exclusive latch, then
    /// rebalances the pre-change total over the new set through the write path.
    fn resize_with<F>(&self, key: &LogicalKey, target: usize, change: F) -> Result<()>
    where
        F: FnOnce(&mut Layout, usize) -> Result<()>,
    {
        let entry = self.entry(key)?;
        let mut layout = self.write_layout(&entry, key)?;
        let current = layout.cells.len();
        if current == target {
            return Ok(());
        }
        let total = checked_total(layout.cells.iter().map(FragmentCell::load))?;
        change(&mut *layout, current)?;
        let layout = RwLockWriteGuard::downgrade(layout);
        let mut set = LockSet::acquire_ordered(
            key,
            &layout.cell_refs(),
            self.opts.lock_wait,
            self.opts.write_retry,
        )?;
        distribute_evenly(&mut set, total);
        self.metrics.fragments_resized(key, current, target);
        info!(%key, from = current, to = target, total, "mrv.store.resize");
        Ok(())
    }

    pub(crate) fn entry(&self, key: &LogicalKey) -> Result<Arc<KeyEntry>> {
        self.keys
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| MrvError::KeyNotFound(key.clone()))
    }

    /// Takes the layout latch in shared mode, waiting at most `lock_wait`.
    pub(crate) fn read_layout<'a>(
        &self,
        entry: &'a KeyEntry,
        key: &LogicalKey,
    ) -> Result<RwLockReadGuard<'a, Layout>> {
        let layout = entry
            .layout
            .try_read_for(self.opts.lock_wait)
            .ok_or_else(|| conflict(key, 1))?;
        if !layout.live {
            return Err(MrvError::KeyNotFound(key.clone()));
        }
        Ok(layout)
    }

    fn write_layout<'a>(
        &self,
        entry: &'a KeyEntry,
        key: &LogicalKey,
    ) -> Result<RwLockWriteGuard<'a, Layout>> {
        let retry = self.opts.write_retry;
        let attempts = retry.attempts.max(1);
        let mut backoff = retry.backoff;
        for attempt in 1..=attempts {
            if let Some(layout) = entry.layout.try_write_for(self.opts.lock_wait) {
                if !layout.live {
                    return Err(MrvError::KeyNotFound(key.clone()));
                }
                return Ok(layout);
            }
            debug!(%key, attempt, "mrv.store.layout_retry");
            if attempt < attempts && !backoff.is_zero() {
                thread::sleep(backoff);
                backoff = backoff.saturating_mul(2);
            }
        }
        Err(conflict(key, attempts))
    }

    /// Reports the outcome of `op` to the metrics sink.
    pub(crate) fn record<T>(&self, key: &LogicalKey, op: OpKind, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.metrics.op_committed(key, op),
            Err(MrvError::Conflict { .. }) => self.metrics.op_aborted(key, op),
            Err(_) => {}
        }
        result
    }
}

pub(crate) fn conflict(key: &LogicalKey, attempts: u32) -> MrvError {
    MrvError::Conflict {
        key: key.clone(),
        attempts,
    }
}

/// Sum of `values`, or an error once it leaves the value range.
pub(crate) fn checked_total(mut values: impl Iterator<Item = Value>) -> Result<Value> {
    values.try_fold(0 as Value, |sum, value| {
        sum.checked_add(value)
            .ok_or(MrvError::InvalidArgument("value overflow"))
    })
}

/// Sets every locked fragment to `value / n` and adds the remainder to the
/// lowest slot.
pub(crate) fn distribute_evenly(set: &mut LockSet<'_>, value: Value) {
    let count = set.len() as Value;
    if count == 0 {
        return;
    }
    let per_fragment = value / count;
    let remainder = value - per_fragment * count;
    for guard in set.guards_mut() {
        guard.set(per_fragment);
    }
    if let Some(first) = set.guards_mut().first_mut() {
        first.add(remainder);
    }
}

/// Splits `value` into `count` fragments on distinct random slots: `count - 1`
/// equal partitions followed by a leftover fragment holding the rest.
fn split_value<R: Rng + ?Sized>(
    value: Value,
    count: usize,
    max_nodes: u16,
    rng: &mut R,
) -> Vec<FragmentCell> {
    let mut partition = value / count as Value;
    if partition == 0 && value > 0 {
        partition = 1;
    }
    let mut remaining = value;
    let slots = index::sample(rng, usize::from(max_nodes), count).into_vec();
    let mut cells = Vec::with_capacity(count);
    for &slot in &slots[..count - 1] {
        cells.push(FragmentCell::new(Rk(slot as u16), partition));
        remaining -= partition;
        if remaining == 0 {
            partition = 0;
        }
    }
    cells.push(FragmentCell::new(Rk(slots[count - 1] as u16), remaining));
    cells.sort_by_key(FragmentCell::rk);
    cells
}
