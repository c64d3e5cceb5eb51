use rand::Rng;
use serde::Serialize;

use crate::model::overlap_abort_rate;

use super::policy::{AdjustBounds, AdjustPolicy};

/// Workload of an adjustment simulation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationParams {
    /// Milliseconds between two adjustments.
    pub tick_ms: u32,
    /// Transactions per second hitting the key before the load step.
    pub tx_s: u32,
    /// Transaction duration in milliseconds.
    pub tx_time: u32,
    /// Fragment count at the start.
    pub initial_records: usize,
    /// Simulated seconds; the load grows by 15% at the halfway second.
    pub duration_s: u32,
    /// Policy thresholds and clamps.
    pub bounds: AdjustBounds,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            tx_s: 1000,
            tx_time: 5,
            initial_records: 1,
            duration_s: 150,
            bounds: AdjustBounds {
                ar_goal: 0.05,
                ..AdjustBounds::default()
            },
        }
    }
}

/// State at the end of one simulated second.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SimulationStep {
    /// Second index.
    pub t: u32,
    /// Fragment count during that second.
    pub records: usize,
    /// Abort rate measured during that second.
    pub ar: f64,
}

/// Replays `policy` against the time-overlap model, one step per second.
///
/// Adjustments due within a second run at its start using the abort rate of
/// the previous second; the rate is then measured over 10 independent runs.
pub fn simulate_adjustment<R: Rng + ?Sized>(
    policy: AdjustPolicy,
    params: &SimulationParams,
    rng: &mut R,
) -> Vec<SimulationStep> {
    let duration = params.duration_s as usize;
    let mut adjusts = vec![0u32; duration];
    let tick_ms = u64::from(params.tick_ms.max(1));
    let ticks = u64::from(params.duration_s) * 1000 / tick_ms;
    for i in 0..ticks {
        if let Some(slot) = adjusts.get_mut((i * tick_ms / 1000) as usize) {
            *slot += 1;
        }
    }

    let mut steps = Vec::with_capacity(duration);
    let mut records = params.initial_records.max(1);
    let mut tx_s = params.tx_s;
    let mut ar = 0.0;
    for (t, &due) in (0u32..).zip(&adjusts) {
        for _ in 0..due {
            records = policy.adjust(ar, records, &params.bounds);
        }
        let slots = u32::try_from(records).unwrap_or(u32::MAX);
        ar = overlap_abort_rate(slots, tx_s, params.tx_time, 10, rng);
        steps.push(SimulationStep { t, records, ar });
        if params.duration_s % 2 == 0 && t == params.duration_s / 2 {
            tx_s = (f64::from(tx_s) * 1.15) as u32;
        }
    }
    steps
}
