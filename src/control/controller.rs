use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::storage::MrvStore;
use crate::types::{LogicalKey, MrvError, Result, Value};

use super::policy::{AdjustBounds, AdjustPolicy};
use super::tracker::AbortSignal;
use super::StopSignal;

/// Controller configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerCfg {
    /// Adjustment rule.
    pub policy: AdjustPolicy,
    /// Period between two adjustments of the same key.
    pub tick: Duration,
    /// Abort rate above which a key grows.
    pub ar_goal: f64,
    /// Abort rate below which a key shrinks.
    pub ar_min: f64,
    /// Smallest fragment count the controller shrinks to.
    pub min_records: usize,
    /// Largest fragment count the controller grows to.
    pub max_records: usize,
    /// Caps growth at `total / min_amount_per_node + 1` fragments (0 disables).
    pub min_amount_per_node: Value,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            policy: AdjustPolicy::Binary,
            tick: Duration::from_secs(1),
            ar_goal: 0.05,
            ar_min: 0.01,
            min_records: 1,
            max_records: 128,
            min_amount_per_node: 0,
        }
    }
}

impl ControllerCfg {
    /// Policy thresholds and clamps.
    pub fn bounds(&self) -> AdjustBounds {
        AdjustBounds {
            min_records: self.min_records,
            max_records: self.max_records,
            ar_goal: self.ar_goal,
            ar_min: self.ar_min,
        }
    }
}

/// A fragment count change applied by one tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Resize {
    /// Key that was resized.
    pub key: LogicalKey,
    /// Abort rate that drove the change, if the window saw traffic.
    pub ar: Option<f64>,
    /// Fragment count before the tick.
    pub from: usize,
    /// Fragment count after the tick.
    pub to: usize,
}

struct KeyTask {
    stop: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

/// Per-key adaptive resizing.
///
/// Each spawned key gets its own background thread that ticks every
/// [`ControllerCfg::tick`]; tasks are cancelled independently. A tick only
/// blocks the key's traffic for the duration of its resize.
pub struct Controller {
    store: Arc<MrvStore>,
    signal: Arc<dyn AbortSignal>,
    cfg: Arc<ControllerCfg>,
    tasks: Mutex<FxHashMap<LogicalKey, KeyTask>>,
}

impl Controller {
    /// Creates a controller resizing keys of `store` from the rates in `signal`.
    pub fn new(
        store: Arc<MrvStore>,
        signal: Arc<dyn AbortSignal>,
        cfg: ControllerCfg,
    ) -> Result<Self> {
        let opts = store.options();
        if cfg.min_records < opts.min_nodes || cfg.max_records > usize::from(opts.max_nodes) {
            return Err(MrvError::InvalidArgument(
                "controller record bounds must lie within the store's node bounds",
            ));
        }
        if cfg.min_records > cfg.max_records {
            return Err(MrvError::InvalidArgument(
                "min_records must not exceed max_records",
            ));
        }
        if !(cfg.ar_min <= cfg.ar_goal) {
            return Err(MrvError::InvalidArgument("ar_min must not exceed ar_goal"));
        }
        if cfg.tick.is_zero() {
            return Err(MrvError::InvalidArgument("tick must be non-zero"));
        }
        if cfg.min_amount_per_node < 0 {
            return Err(MrvError::InvalidArgument(
                "min_amount_per_node must be non-negative",
            ));
        }
        Ok(Self {
            store,
            signal,
            cfg: Arc::new(cfg),
            tasks: Mutex::new(FxHashMap::default()),
        })
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ControllerCfg {
        &self.cfg
    }

    /// Starts the periodic task of `key`. Returns `false` if it already runs.
    pub fn spawn(&self, key: &LogicalKey) -> Result<bool> {
        if !self.store.contains(key) {
            return Err(MrvError::KeyNotFound(key.clone()));
        }
        let mut tasks = self.tasks.lock();
        Self::reap_finished(&mut tasks);
        if tasks.contains_key(key) {
            return Ok(false);
        }
        let stop = Arc::new(StopSignal::default());
        let handle = {
            let store = Arc::clone(&self.store);
            let signal = Arc::clone(&self.signal);
            let cfg = Arc::clone(&self.cfg);
            let stop = Arc::clone(&stop);
            let key = key.clone();
            thread::spawn(move || Self::task_loop(&store, signal.as_ref(), &cfg, &key, &stop))
        };
        tasks.insert(key.clone(), KeyTask { stop, handle });
        debug!(%key, tick_ms = self.cfg.tick.as_millis() as u64, "mrv.controller.spawn");
        Ok(true)
    }

    /// Stops the task of `key` and waits for it. Returns `false` if none ran.
    pub fn cancel(&self, key: &LogicalKey) -> bool {
        let Some(task) = self.tasks.lock().remove(key) else {
            return false;
        };
        task.stop.stop();
        if task.handle.join().is_err() {
            warn!(%key, "mrv.controller.task_panicked");
        }
        debug!(%key, "mrv.controller.cancel");
        true
    }

    /// Keys with a running task, in ascending order.
    pub fn running(&self) -> Vec<LogicalKey> {
        let mut tasks = self.tasks.lock();
        Self::reap_finished(&mut tasks);
        let mut keys: Vec<LogicalKey> = tasks.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drops the entries of tasks whose loop already exited, such as those of
    /// deleted keys.
    fn reap_finished(tasks: &mut FxHashMap<LogicalKey, KeyTask>) {
        let finished: Vec<LogicalKey> = tasks
            .iter()
            .filter(|(_, task)| task.handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        for key in finished {
            if let Some(task) = tasks.remove(&key) {
                if task.handle.join().is_err() {
                    warn!(%key, "mrv.controller.task_panicked");
                }
                debug!(%key, "mrv.controller.reaped");
            }
        }
    }

    /// Stops every task.
    pub fn shutdown(&self) {
        for key in self.running() {
            self.cancel(&key);
        }
    }

    /// Runs one adjustment of `key` on the calling thread.
    pub fn tick<R: Rng + ?Sized>(&self, key: &LogicalKey, rng: &mut R) -> Result<Option<Resize>> {
        Self::tick_key(&self.store, self.signal.as_ref(), &self.cfg, key, rng)
    }

    fn task_loop(
        store: &MrvStore,
        signal: &dyn AbortSignal,
        cfg: &ControllerCfg,
        key: &LogicalKey,
        stop: &StopSignal,
    ) {
        let mut rng = ChaCha8Rng::from_entropy();
        while !stop.sleep(cfg.tick) {
            match Self::tick_key(store, signal, cfg, key, &mut rng) {
                Ok(_) => {}
                Err(MrvError::KeyNotFound(_)) => {
                    debug!(%key, "mrv.controller.key_gone");
                    break;
                }
                Err(err) => warn!(%key, error = %err, "mrv.controller.tick_failed"),
            }
        }
    }

    fn tick_key<R: Rng + ?Sized>(
        store: &MrvStore,
        signal: &dyn AbortSignal,
        cfg: &ControllerCfg,
        key: &LogicalKey,
        rng: &mut R,
    ) -> Result<Option<Resize>> {
        let ar = signal.take_abort_rate(key);
        let current = store.fragment_count(key)?;
        let bounds = cfg.bounds();
        let mut target = match ar {
            Some(ar) => cfg.policy.adjust(ar, current, &bounds),
            None => current,
        };
        if cfg.min_amount_per_node > 0 {
            let total = store.stats(key)?.total;
            let cap = usize::try_from(total / cfg.min_amount_per_node + 1)
                .unwrap_or(usize::MAX)
                .clamp(bounds.min_records, bounds.max_records);
            if current > cap {
                target = target.min(current - 1);
            } else if target > cap {
                target = cap;
            }
        }
        let target = target.clamp(bounds.min_records, bounds.max_records);
        if target == current {
            return Ok(None);
        }
        store.resize(key, target, rng)?;
        info!(%key, ar = ar.unwrap_or(0.0), from = current, to = target, "mrv.controller.resize");
        Ok(Some(Resize {
            key: key.clone(),
            ar,
            from: current,
            to: target,
        }))
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
