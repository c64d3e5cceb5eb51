use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::storage::MrvStore;
use crate::types::LogicalKey;

use super::tracker::TxStatusTracker;
use super::StopSignal;

/// Monitor configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorCfg {
    /// Period between two samples.
    pub interval: Duration,
}

impl Default for MonitorCfg {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
        }
    }
}

/// Fragment count of one key at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeSample {
    /// Milliseconds since the monitor started.
    pub elapsed_ms: u64,
    /// Sampled key.
    pub key: LogicalKey,
    /// Fragment count at that time.
    pub fragments: usize,
}

/// Aggregate abort rate over one sampling interval.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AbortSample {
    /// Milliseconds since the monitor started.
    pub elapsed_ms: u64,
    /// Aborted share of the operations finished during the interval.
    pub ar: f64,
}

/// Everything a monitor collected.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MonitorReport {
    /// Per-key fragment counts over time.
    pub nodes: Vec<NodeSample>,
    /// Aggregate abort rate over time.
    pub abort_rates: Vec<AbortSample>,
}

struct Sampler {
    store: Arc<MrvStore>,
    tracker: Arc<TxStatusTracker>,
    started: Instant,
    last_totals: (u64, u64),
    report: MonitorReport,
}

impl Sampler {
    fn sample(&mut self) {
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        for key in self.store.keys() {
            match self.store.fragment_count(&key) {
                Ok(fragments) => self.report.nodes.push(NodeSample {
                    elapsed_ms,
                    key,
                    fragments,
                }),
                Err(err) => debug!(%key, error = %err, "mrv.monitor.skip_key"),
            }
        }
        let (commits, aborts) = self.tracker.totals();
        let delta_commits = commits - self.last_totals.0;
        let delta_aborts = aborts - self.last_totals.1;
        self.last_totals = (commits, aborts);
        let seen = delta_commits + delta_aborts;
        let ar = if seen == 0 {
            0.0
        } else {
            delta_aborts as f64 / seen as f64
        };
        self.report.abort_rates.push(AbortSample { elapsed_ms, ar });
    }
}

/// Background sampler of fragment counts and abort rates.
pub struct Monitor {
    sampler: Arc<Mutex<Sampler>>,
    stop: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Starts sampling `store` and `tracker` every [`MonitorCfg::interval`].
    pub fn start(store: Arc<MrvStore>, tracker: Arc<TxStatusTracker>, cfg: MonitorCfg) -> Self {
        let last_totals = tracker.totals();
        let sampler = Arc::new(Mutex::new(Sampler {
            store,
            tracker,
            started: Instant::now(),
            last_totals,
            report: MonitorReport::default(),
        }));
        let stop = Arc::new(StopSignal::default());
        let handle = {
            let sampler = Arc::clone(&sampler);
            let stop = Arc::clone(&stop);
            let interval = cfg.interval.max(Duration::from_millis(1));
            thread::spawn(move || {
                while !stop.sleep(interval) {
                    sampler.lock().sample();
                }
            })
        };
        debug!(interval_ms = cfg.interval.as_millis() as u64, "mrv.monitor.start");
        Self {
            sampler,
            stop,
            handle: Some(handle),
        }
    }

    /// Takes one sample immediately.
    pub fn sample_now(&self) {
        self.sampler.lock().sample();
    }

    /// Copy of the samples gathered so far.
    pub fn snapshot(&self) -> MonitorReport {
        self.sampler.lock().report.clone()
    }

    /// Stops sampling and returns the collected report.
    pub fn stop(mut self) -> MonitorReport {
        self.halt();
        std::mem::take(&mut self.sampler.lock().report)
    }

    fn halt(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("mrv.monitor.sampler_panicked");
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.halt();
    }
}
