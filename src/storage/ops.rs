//! Logical operations over a key's fragments.
//!
//! Add and each step of Subtract lock a single fragment; Write and
//! DistributedAdd lock their fragments in ascending `rk` order through
//! [`LockSet`]. Threshold queries read fragment by fragment and may observe a
//! concurrent mutation part-way; callers needing an exact answer under
//! concurrency must use [`MrvStore::total`] under their own external lock.

use std::time::Duration;

use rand::Rng;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::primitives::concurrency::{FragmentCell, FragmentGuard, LockSet, RetryCfg};
use crate::types::{LogicalKey, MrvError, Result, Rk, Value};

use super::metrics::OpKind;
use super::store::{checked_total, conflict, distribute_evenly, MrvStore};

impl MrvStore {
    /// Adds `amount` to the first fragment with `rk >= rk_hint`, wrapping to
    /// the smallest `rk`. Returns the slot that received the amount.
    pub fn add(&self, key: &LogicalKey, rk_hint: Rk, amount: Value) -> Result<Rk> {
        let result = self.add_inner(key, rk_hint, amount);
        self.record(key, OpKind::Add, result)
    }

    fn add_inner(&self, key: &LogicalKey, rk_hint: Rk, amount: Value) -> Result<Rk> {
        if amount < 0 {
            return Err(MrvError::InvalidArgument("add amount must be non-negative"));
        }
        let entry = self.entry(key)?;
        let layout = self.read_layout(&entry, key)?;
        let cell = &layout.cells[layout.start_index(rk_hint)];
        let mut guard = self.lock_cell(key, cell)?;
        guard.checked_add(amount)?;
        trace!(%key, rk = %cell.rk(), amount, "mrv.ops.add");
        Ok(cell.rk())
    }

    /// Removes `amount` from the key, sweeping fragments from `rk >= rk_hint`
    /// and wrapping around, taking whatever each fragment holds.
    ///
    /// Fails with [`MrvError::InsufficientValue`] when the sweep cannot collect
    /// the full amount, and with [`MrvError::Conflict`] when a fragment stays
    /// locked past the configured wait. Either way every fragment is restored.
    pub fn subtract(&self, key: &LogicalKey, rk_hint: Rk, amount: Value) -> Result<()> {
        let result = self.subtract_inner(key, rk_hint, amount);
        self.record(key, OpKind::Subtract, result)
    }

    fn subtract_inner(&self, key: &LogicalKey, rk_hint: Rk, amount: Value) -> Result<()> {
        if amount < 0 {
            return Err(MrvError::InvalidArgument(
                "subtract amount must be non-negative",
            ));
        }
        let entry = self.entry(key)?;
        let layout = self.read_layout(&entry, key)?;
        if amount == 0 {
            return Ok(());
        }
        let len = layout.cells.len();
        let start = layout.start_index(rk_hint);
        let mut taken: SmallVec<[(FragmentGuard<'_>, Value); 8]> = SmallVec::new();
        let mut remaining = amount;
        for idx in (start..len).chain(0..start) {
            let mut guard = match self.lock_cell(key, &layout.cells[idx]) {
                Ok(guard) => guard,
                Err(err) => {
                    restore(&mut taken);
                    return Err(err);
                }
            };
            let take = guard.get().min(remaining);
            if take <= 0 {
                continue;
            }
            guard.add(-take);
            remaining -= take;
            taken.push((guard, take));
            if remaining == 0 {
                trace!(%key, amount, visited = taken.len(), "mrv.ops.subtract");
                return Ok(());
            }
        }
        restore(&mut taken);
        debug!(%key, amount, short = remaining, "mrv.ops.subtract_insufficient");
        Err(MrvError::InsufficientValue {
            key: key.clone(),
            requested: amount,
        })
    }

    /// Spreads `amount` over the `spread` fragments holding the least value,
    /// ties broken by `rk`. The division remainder goes to the smallest one.
    ///
    /// A key with fewer than `spread` fragments spreads over all of them.
    pub fn distributed_add(&self, key: &LogicalKey, amount: Value, spread: usize) -> Result<()> {
        let result = self.distributed_add_inner(key, amount, spread);
        self.record(key, OpKind::DistributedAdd, result)
    }

    fn distributed_add_inner(&self, key: &LogicalKey, amount: Value, spread: usize) -> Result<()> {
        if amount < 0 {
            return Err(MrvError::InvalidArgument("add amount must be non-negative"));
        }
        if spread == 0 {
            return Err(MrvError::InvalidArgument("spread must be at least 1"));
        }
        let entry = self.entry(key)?;
        let layout = self.read_layout(&entry, key)?;
        let mut smallest: Vec<(Value, usize)> = layout
            .cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| (cell.load(), idx))
            .collect();
        smallest.sort_unstable();
        smallest.truncate(spread);
        let first = layout.cells[smallest[0].1].rk();

        let mut picks: Vec<usize> = smallest.iter().map(|&(_, idx)| idx).collect();
        picks.sort_unstable();
        let cells: Vec<&FragmentCell> = picks.iter().map(|&idx| &layout.cells[idx]).collect();
        let mut set = LockSet::acquire_ordered(key, &cells, self.opts.lock_wait, single_attempt())?;

        let delta = amount / set.len() as Value;
        let remainder = amount - delta * set.len() as Value;
        let share = |rk: Rk| if rk == first { delta + remainder } else { delta };
        for guard in set.guards() {
            guard.fits(share(guard.rk()))?;
        }
        for guard in set.guards_mut() {
            guard.add(share(guard.rk()));
        }
        trace!(%key, amount, spread = set.len(), "mrv.ops.distributed_add");
        Ok(())
    }

    /// Sets the key to exactly `value`, spread evenly over its fragments.
    ///
    /// Locks every fragment in ascending `rk` order, retrying per
    /// [`crate::storage::MrvOptions::write_retry`]. The remainder of the
    /// division lands on the lowest slot.
    pub fn write(&self, key: &LogicalKey, value: Value) -> Result<()> {
        let result = self.write_inner(key, value);
        self.record(key, OpKind::Write, result)
    }

    fn write_inner(&self, key: &LogicalKey, value: Value) -> Result<()> {
        if value < 0 {
            return Err(MrvError::InvalidArgument("value must be non-negative"));
        }
        let entry = self.entry(key)?;
        let layout = self.read_layout(&entry, key)?;
        let mut set = LockSet::acquire_ordered(
            key,
            &layout.cell_refs(),
            self.opts.lock_wait,
            self.opts.write_retry,
        )?;
        distribute_evenly(&mut set, value);
        debug!(%key, value, fragments = set.len(), "mrv.ops.write");
        Ok(())
    }

    /// Sum of all fragment values.
    pub fn total(&self, key: &LogicalKey) -> Result<Value> {
        let result = self.total_inner(key);
        self.record(key, OpKind::Read, result)
    }

    fn total_inner(&self, key: &LogicalKey) -> Result<Value> {
        let entry = self.entry(key)?;
        let layout = self.read_layout(&entry, key)?;
        let mut values = Vec::with_capacity(layout.cells.len());
        for cell in &layout.cells {
            values.push(self.lock_cell(key, cell)?.get());
        }
        checked_total(values.into_iter())
    }

    /// Returns whether the key's value exceeds `amount`, stopping at the
    /// first fragment that settles the answer.
    ///
    /// Exact only in the absence of concurrent mutation.
    pub fn greater_than(&self, key: &LogicalKey, amount: Value) -> Result<bool> {
        let result = self.threshold(key, amount, |value, remaining| value > remaining);
        self.record(key, OpKind::Read, result)
    }

    /// Returns whether the key's value is at least `amount`; see
    /// [`MrvStore::greater_than`].
    pub fn greater_or_equal(&self, key: &LogicalKey, amount: Value) -> Result<bool> {
        let result = self.threshold(key, amount, |value, remaining| value >= remaining);
        self.record(key, OpKind::Read, result)
    }

    fn threshold<F>(&self, key: &LogicalKey, amount: Value, reached: F) -> Result<bool>
    where
        F: Fn(Value, Value) -> bool,
    {
        let entry = self.entry(key)?;
        let layout = self.read_layout(&entry, key)?;
        let mut remaining = amount;
        for cell in &layout.cells {
            let value = self.lock_cell(key, cell)?.get();
            if reached(value, remaining) {
                return Ok(true);
            }
            remaining -= value;
        }
        Ok(false)
    }

    /// Applies a signed change to the key.
    ///
    /// Increments at or above `distribute_adds_after` (when enabled) become a
    /// distributed add; other increments go to a single fragment chosen by a
    /// random hint; decrements sweep from a random hint. Zero is a no-op.
    pub fn update<R: Rng + ?Sized>(&self, key: &LogicalKey, delta: Value, rng: &mut R) -> Result<()> {
        let threshold = self.opts.distribute_adds_after;
        if delta > 0 && threshold > 0 && delta >= threshold {
            self.distributed_add(key, delta, self.opts.distribute_adds_size)
        } else if delta > 0 {
            self.add(key, self.random_hint(rng), delta).map(|_| ())
        } else if delta < 0 {
            let amount = delta
                .checked_neg()
                .ok_or(MrvError::InvalidArgument("delta out of range"))?;
            self.subtract(key, self.random_hint(rng), amount)
        } else {
            Ok(())
        }
    }

    /// Draws a placement hint uniformly from `[0, max_nodes]`.
    pub fn random_hint<R: Rng + ?Sized>(&self, rng: &mut R) -> Rk {
        Rk(rng.gen_range(0..=self.opts.max_nodes))
    }

    fn lock_cell<'a>(&self, key: &LogicalKey, cell: &'a FragmentCell) -> Result<FragmentGuard<'a>> {
        cell.try_lock_for(self.opts.lock_wait)
            .ok_or_else(|| conflict(key, 1))
    }
}

fn single_attempt() -> RetryCfg {
    RetryCfg {
        attempts: 1,
        backoff: Duration::ZERO,
    }
}

fn restore(taken: &mut [(FragmentGuard<'_>, Value)]) {
    for (guard, take) in taken.iter_mut() {
        guard.add(*take);
    }
}
