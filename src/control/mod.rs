//! Adaptive fragment control.
//!
//! The [`Controller`] runs one scheduled task per logical key. Every tick it
//! drains the key's abort rate from an [`AbortSignal`], asks an
//! [`AdjustPolicy`] for a new fragment count, and resizes the key through the
//! store. The [`Monitor`] samples fragment counts and abort rates over time,
//! and [`simulate_adjustment`] replays the policies against the time-overlap
//! conflict model.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

mod controller;
mod monitor;
mod policy;
mod simulation;
mod tracker;

pub use controller::{Controller, ControllerCfg, Resize};
pub use monitor::{AbortSample, Monitor, MonitorCfg, MonitorReport, NodeSample};
pub use policy::{AdjustBounds, AdjustPolicy};
pub use simulation::{simulate_adjustment, SimulationParams, SimulationStep};
pub use tracker::{AbortSignal, TxStatusTracker};

/// Stop flag a background task sleeps on between ticks.
#[derive(Default)]
pub(crate) struct StopSignal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

impl StopSignal {
    /// Sleeps for `period` or until stopped. Returns `true` once stopped.
    pub(crate) fn sleep(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wakeup.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    pub(crate) fn stop(&self) {
        *self.stopped.lock() = true;
        self.wakeup.notify_all();
    }
}
