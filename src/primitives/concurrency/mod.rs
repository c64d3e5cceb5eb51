//! Per-fragment row locks and ordered full-key acquisition.
//!
//! Every fragment lives in a [`FragmentCell`]. Single-fragment mutations lock
//! one cell; full-key operations go through [`LockSet::acquire_ordered`], which
//! takes every cell in ascending `rk` order and retries a bounded number of
//! times before reporting a conflict.

use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use tracing::debug;

use crate::types::{LogicalKey, MrvError, Result, Rk, Value};

/// Bounded retry schedule for full-key lock acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryCfg {
    /// Maximum acquisition attempts before surfacing a conflict.
    pub attempts: u32,
    /// Pause between attempts; doubled after every failed attempt.
    pub backoff: Duration,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            attempts: 8,
            backoff: Duration::from_millis(1),
        }
    }
}

impl RetryCfg {
    fn normalize(self) -> Self {
        Self {
            attempts: self.attempts.max(1),
            backoff: self.backoff,
        }
    }
}

/// A single fragment row guarded by its own lock.
#[derive(Debug)]
pub struct FragmentCell {
    rk: Rk,
    value: Mutex<Value>,
}

impl FragmentCell {
    /// Creates a cell for slot `rk` holding `value`.
    pub fn new(rk: Rk, value: Value) -> Self {
        Self {
            rk,
            value: Mutex::new(value),
        }
    }

    /// Returns the slot of this fragment.
    pub fn rk(&self) -> Rk {
        self.rk
    }

    /// Reads the current value under a momentary lock.
    pub fn load(&self) -> Value {
        *self.value.lock()
    }

    /// Locks the fragment, waiting at most `wait`.
    pub fn try_lock_for(&self, wait: Duration) -> Option<FragmentGuard<'_>> {
        let guard = if wait.is_zero() {
            self.value.try_lock()
        } else {
            self.value.try_lock_for(wait)
        }?;
        Some(FragmentGuard { rk: self.rk, guard })
    }
}

/// Exclusive access to one fragment's value.
pub struct FragmentGuard<'a> {
    rk: Rk,
    guard: MutexGuard<'a, Value>,
}

impl FragmentGuard<'_> {
    /// Slot of the locked fragment.
    pub fn rk(&self) -> Rk {
        self.rk
    }

    /// Current value of the locked fragment.
    pub fn get(&self) -> Value {
        *self.guard
    }

    /// Overwrites the fragment value.
    pub fn set(&mut self, value: Value) {
        *self.guard = value;
    }

    /// Adds `delta` to the fragment value.
    pub fn add(&mut self, delta: Value) {
        *self.guard += delta;
    }

    /// Adds `delta` unless the sum overflows; the value is left untouched on
    /// overflow.
    pub fn checked_add(&mut self, delta: Value) -> Result<()> {
        *self.guard = self.fits(delta)?;
        Ok(())
    }

    /// Value the fragment would hold after adding `delta`.
    pub fn fits(&self, delta: Value) -> Result<Value> {
        self.guard.checked_add(delta).ok_or(MrvError::InvalidArgument("value overflow"))
    }
}

/// Every fragment of one key, locked in ascending `rk` order.
pub struct LockSet<'a> {
    guards: SmallVec<[FragmentGuard<'a>; 8]>,
}

impl<'a> LockSet<'a> {
    /// Acquires all `cells`, which must be sorted by ascending `rk`.
    ///
    /// A failed attempt releases everything taken so far, sleeps for the
    /// current backoff, and starts over from the lowest slot.
    pub fn acquire_ordered(
        key: &LogicalKey,
        cells: &[&'a FragmentCell],
        wait: Duration,
        retry: RetryCfg,
    ) -> Result<Self> {
        debug_assert!(
            cells.windows(2).all(|pair| pair[0].rk() < pair[1].rk()),
            "lock set must be acquired in ascending rk order"
        );
        let retry = retry.normalize();
        let mut backoff = retry.backoff;
        for attempt in 1..=retry.attempts {
            let mut guards = SmallVec::with_capacity(cells.len());
            let mut complete = true;
            for cell in cells {
                match cell.try_lock_for(wait) {
                    Some(guard) => guards.push(guard),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                return Ok(Self { guards });
            }
            drop(guards);
            debug!(%key, attempt, held_cells = cells.len(), "mrv.lockset.retry");
            if attempt < retry.attempts && !backoff.is_zero() {
                thread::sleep(backoff);
                backoff = backoff.saturating_mul(2);
            }
        }
        Err(MrvError::Conflict {
            key: key.clone(),
            attempts: retry.attempts,
        })
    }

    /// Number of locked fragments.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Returns `true` when no fragment is held.
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Sum of the locked values.
    pub fn total(&self) -> Value {
        self.guards.iter().map(FragmentGuard::get).sum()
    }

    /// Mutable access to the locked fragments in ascending `rk` order.
    pub fn guards_mut(&mut self) -> &mut [FragmentGuard<'a>] {
        &mut self.guards
    }

    /// Read access to the locked fragments in ascending `rk` order.
    pub fn guards(&self) -> &[FragmentGuard<'a>] {
        &self.guards
    }
}
