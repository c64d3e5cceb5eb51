//! Concurrent updates against shared keys.
//!
//! Every thread keeps its own ledger of applied deltas; at quiescence the sum
//! of all fragments must equal the initial value plus every ledger.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use mrv::primitives::concurrency::RetryCfg;
use mrv::storage::{MrvOptions, MrvStore};
use mrv::types::{LogicalKey, MrvError, Result, Value};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const THREADS: u64 = 8;
const OPS_PER_THREAD: usize = 2_000;
const KEYS: u64 = 3;
const INITIAL: Value = 5_000;

fn open() -> Result<Arc<MrvStore>> {
    Ok(Arc::new(MrvStore::open(
        MrvOptions::default()
            .max_nodes(32)
            .distribute_adds(20, 4)
            .lock_wait(Duration::from_millis(2))
            .write_retry(RetryCfg {
                attempts: 64,
                backoff: Duration::from_micros(50),
            }),
    )?))
}

/// Applies `delta`, retrying lock conflicts. Returns whether it was applied.
fn apply(store: &MrvStore, key: &LogicalKey, delta: Value, rng: &mut ChaCha8Rng) -> bool {
    loop {
        match store.update(key, delta, rng) {
            Ok(()) => return true,
            Err(MrvError::Conflict { .. }) => thread::yield_now(),
            Err(MrvError::InsufficientValue { .. }) => return false,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
}

#[test]
fn concurrent_updates_match_ledger() -> Result<()> {
    let store = open()?;
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    for id in 0..KEYS {
        store.create(&LogicalKey::from(id), INITIAL, 8, &mut rng)?;
    }
    let ledgers: Arc<Vec<AtomicI64>> = Arc::new((0..KEYS).map(|_| AtomicI64::new(0)).collect());
    let rejected = Arc::new(AtomicU64::new(0));
    let start = Arc::new(Barrier::new(THREADS as usize));

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let store = Arc::clone(&store);
            let ledgers = Arc::clone(&ledgers);
            let rejected = Arc::clone(&rejected);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(1_000 + worker);
                start.wait();
                for _ in 0..OPS_PER_THREAD {
                    let id = rng.gen_range(0..KEYS);
                    let key = LogicalKey::from(id);
                    let delta = match rng.gen_range(0..10) {
                        0 => rng.gen_range(20..60),
                        1..=5 => -rng.gen_range(1..8),
                        _ => rng.gen_range(1..5),
                    };
                    if apply(&store, &key, delta, &mut rng) {
                        ledgers[id as usize].fetch_add(delta, Ordering::Relaxed);
                    } else {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }

    for id in 0..KEYS {
        let key = LogicalKey::from(id);
        let expected = INITIAL + ledgers[id as usize].load(Ordering::Relaxed);
        assert_eq!(store.total(&key)?, expected, "key {id}");
        assert!(store.fragments_of(&key)?.iter().all(|f| f.value >= 0));
    }
    Ok(())
}

#[test]
fn writes_and_resizes_race_with_updates() -> Result<()> {
    let store = open()?;
    let key = LogicalKey::from("hot");
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    store.create(&key, INITIAL, 4, &mut rng)?;
    let ledger = Arc::new(AtomicI64::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let resizer = {
        let store = Arc::clone(&store);
        let key = key.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || -> Result<usize> {
            let mut rng = ChaCha8Rng::seed_from_u64(3);
            let mut resizes = 0;
            while !done.load(Ordering::Relaxed) {
                let target = rng.gen_range(1..=32);
                match store.resize(&key, target, &mut rng) {
                    Ok(()) => resizes += 1,
                    Err(MrvError::Conflict { .. }) => {}
                    Err(err) => return Err(err),
                }
                thread::sleep(Duration::from_millis(1));
            }
            Ok(resizes)
        })
    };

    let workers: Vec<_> = (0..4u64)
        .map(|worker| {
            let store = Arc::clone(&store);
            let key = key.clone();
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(50 + worker);
                for _ in 0..OPS_PER_THREAD {
                    let delta = if rng.gen_bool(0.5) { 3 } else { -2 };
                    if apply(&store, &key, delta, &mut rng) {
                        ledger.fetch_add(delta, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    done.store(true, Ordering::Relaxed);
    let resizes = resizer.join().expect("resizer")?;

    assert!(resizes > 0);
    assert_eq!(store.total(&key)?, INITIAL + ledger.load(Ordering::Relaxed));

    store.write(&key, 77)?;
    assert_eq!(store.total(&key)?, 77);
    Ok(())
}
