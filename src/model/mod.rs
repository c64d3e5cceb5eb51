//! Conflict model for concurrent writers over split values.
//!
//! Estimates the abort rate of `w` writers landing on `n` fragments: a
//! closed form derived from the expected number of distinct fragments hit, a
//! Monte Carlo cross-check of that formula, and a time-overlap estimator in
//! which transactions on one fragment conflict when their intervals overlap.

use rand::Rng;
use serde::Serialize;

/// Writer counts swept by [`formula_sweep`] and [`simulation_sweep`].
pub const CLIENTS: [u32; 6] = [2, 4, 8, 16, 32, 64];

/// Exclusive upper bound of the fragment counts swept.
pub const MAX_SWEEP_RECORDS: u32 = 128;

/// Length of the time window (ms) used by [`overlap_abort_rate`].
pub const WINDOW_MS: u32 = 1000;

/// One point of an abort-rate sweep.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ConflictPoint {
    /// Number of fragments.
    pub records: u32,
    /// Number of concurrent writers.
    pub clients: u32,
    /// Estimated abort rate.
    pub ar: f64,
}

/// Closed-form abort rate for `writers` uniform draws over `records` slots.
///
/// `ar = (w - (n - n·(1 - 1/n)^w)) / w`: the expected number of distinct slots
/// hit counts the committing writers; every other writer aborts.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn analytical_abort_rate(records: u32, writers: u32) -> f64 {
    if records == 0 || writers == 0 {
        return 0.0;
    }
    let n = f64::from(records);
    let w = f64::from(writers);
    let distinct = n - n * (1.0 - 1.0 / n).powf(w);
    (w - distinct) / w
}

/// Monte Carlo estimate of [`analytical_abort_rate`] over `trials` rounds.
#[must_use]
pub fn simulated_abort_rate<R: Rng + ?Sized>(
    records: u32,
    writers: u32,
    trials: u32,
    rng: &mut R,
) -> f64 {
    if records == 0 || writers == 0 || trials == 0 {
        return 0.0;
    }
    let mut hit = vec![false; records as usize];
    let mut distinct_total = 0u64;
    for _ in 0..trials {
        hit.iter_mut().for_each(|slot| *slot = false);
        for _ in 0..writers {
            hit[rng.gen_range(0..records as usize)] = true;
        }
        distinct_total += hit.iter().filter(|&&slot| slot).count() as u64;
    }
    let mean = distinct_total as f64 / f64::from(trials);
    (f64::from(writers) - mean) / f64::from(writers)
}

/// Abort rate when `tx_s` transactions start uniformly within a one-second
/// window, each picking one of `records` fragments and lasting `tx_time` ms.
///
/// Per fragment the earliest transaction commits; any transaction starting no
/// later than its predecessor's end aborts. Averaged over `runs` windows.
#[must_use]
pub fn overlap_abort_rate<R: Rng + ?Sized>(
    records: u32,
    tx_s: u32,
    tx_time: u32,
    runs: u32,
    rng: &mut R,
) -> f64 {
    if records == 0 || tx_s == 0 || runs == 0 {
        return 0.0;
    }
    let horizon = WINDOW_MS.saturating_sub(tx_time).max(1);
    let mut starts: Vec<Vec<u32>> = vec![Vec::new(); records as usize];
    let mut aborts = 0u64;
    for _ in 0..runs {
        starts.iter_mut().for_each(Vec::clear);
        for _ in 0..tx_s {
            let record = rng.gen_range(0..records as usize);
            starts[record].push(rng.gen_range(0..horizon));
        }
        for times in &mut starts {
            times.sort_unstable();
            aborts += times
                .windows(2)
                .filter(|pair| pair[0].saturating_add(tx_time) >= pair[1])
                .count() as u64;
        }
    }
    aborts as f64 / (f64::from(tx_s) * f64::from(runs))
}

/// Closed-form abort rates for every writer count in [`CLIENTS`] and every
/// fragment count in `1..MAX_SWEEP_RECORDS`.
pub fn formula_sweep() -> Vec<ConflictPoint> {
    sweep(analytical_abort_rate)
}

/// Monte Carlo counterpart of [`formula_sweep`].
pub fn simulation_sweep<R: Rng + ?Sized>(trials: u32, rng: &mut R) -> Vec<ConflictPoint> {
    sweep(|records, clients| simulated_abort_rate(records, clients, trials, &mut *rng))
}

fn sweep<F>(mut estimate: F) -> Vec<ConflictPoint>
where
    F: FnMut(u32, u32) -> f64,
{
    let mut points = Vec::with_capacity(CLIENTS.len() * MAX_SWEEP_RECORDS as usize);
    for clients in CLIENTS {
        for records in 1..MAX_SWEEP_RECORDS {
            points.push(ConflictPoint {
                records,
                clients,
                ar: estimate(records, clients),
            });
        }
    }
    points
}

/// Time-overlap abort rate for each fragment count in `records`, 10 runs each.
pub fn ar_per_records<R: Rng + ?Sized>(
    records: std::ops::RangeInclusive<u32>,
    tx_s: u32,
    tx_time: u32,
    rng: &mut R,
) -> Vec<(u32, f64)> {
    records
        .map(|n| (n, overlap_abort_rate(n, tx_s, tx_time, 10, &mut *rng)))
        .collect()
}

/// Smallest fragment count whose time-overlap abort rate is at most
/// `target`, searching up to `limit`. Returns `None` if `limit` is not enough.
pub fn records_to_reach<R: Rng + ?Sized>(
    target: f64,
    tx_s: u32,
    tx_time: u32,
    limit: u32,
    rng: &mut R,
) -> Option<u32> {
    (1..=limit).find(|&records| overlap_abort_rate(records, tx_s, tx_time, 10, &mut *rng) <= target)
}
