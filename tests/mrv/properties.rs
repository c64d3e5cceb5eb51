//! Randomized operation sequences checked against a plain reference value.

#![allow(missing_docs)]

use mrv::storage::{MrvOptions, MrvStore};
use mrv::types::{LogicalKey, MrvError, Rk, Value};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const MAX_NODES: u16 = 16;

#[derive(Debug, Clone)]
enum Op {
    Add { hint: u16, amount: Value },
    Subtract { hint: u16, amount: Value },
    DistributedAdd { amount: Value, spread: usize },
    Write { value: Value },
    Resize { count: usize },
    GreaterThan { amount: Value },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..=MAX_NODES, 0i64..500).prop_map(|(hint, amount)| Op::Add { hint, amount }),
        3 => (0..=MAX_NODES, 0i64..800).prop_map(|(hint, amount)| Op::Subtract { hint, amount }),
        1 => (0i64..500, 1usize..6).prop_map(|(amount, spread)| Op::DistributedAdd { amount, spread }),
        1 => (0i64..2_000).prop_map(|value| Op::Write { value }),
        1 => (1usize..=MAX_NODES as usize).prop_map(|count| Op::Resize { count }),
        1 => (0i64..3_000).prop_map(|amount| Op::GreaterThan { amount }),
    ]
}

fn open() -> MrvStore {
    MrvStore::open(MrvOptions::default().max_nodes(MAX_NODES)).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_value_matches_reference(
        initial in 0i64..1_000,
        count in 1usize..=MAX_NODES as usize,
        seed in any::<u64>(),
        ops in prop::collection::vec(arb_op(), 1..60),
    ) {
        let store = open();
        let key = LogicalKey::from("k");
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        store.create(&key, initial, count, &mut rng).unwrap();
        let mut expected = initial;

        for op in ops {
            match op {
                Op::Add { hint, amount } => {
                    let rk = store.add(&key, Rk(hint), amount).unwrap();
                    prop_assert!(rk.0 < MAX_NODES);
                    expected += amount;
                }
                Op::Subtract { hint, amount } => {
                    let before = store.fragments_of(&key).unwrap();
                    match store.subtract(&key, Rk(hint), amount) {
                        Ok(()) => {
                            prop_assert!(amount <= expected);
                            expected -= amount;
                        }
                        Err(MrvError::InsufficientValue { requested, .. }) => {
                            prop_assert!(amount > expected);
                            prop_assert_eq!(requested, amount);
                            prop_assert_eq!(store.fragments_of(&key).unwrap(), before);
                        }
                        Err(err) => prop_assert!(false, "unexpected error {}", err),
                    }
                }
                Op::DistributedAdd { amount, spread } => {
                    store.distributed_add(&key, amount, spread).unwrap();
                    expected += amount;
                }
                Op::Write { value } => {
                    store.write(&key, value).unwrap();
                    expected = value;
                }
                Op::Resize { count } => {
                    store.resize(&key, count, &mut rng).unwrap();
                    prop_assert_eq!(store.fragment_count(&key).unwrap(), count);
                }
                Op::GreaterThan { amount } => {
                    prop_assert_eq!(store.greater_than(&key, amount).unwrap(), expected > amount);
                    prop_assert_eq!(
                        store.greater_or_equal(&key, amount).unwrap(),
                        expected >= amount
                    );
                }
            }
            let fragments = store.fragments_of(&key).unwrap();
            prop_assert!(fragments.iter().all(|f| f.value >= 0));
            prop_assert!(fragments.windows(2).all(|w| w[0].rk < w[1].rk));
            prop_assert_eq!(store.total(&key).unwrap(), expected);
        }
    }

    #[test]
    fn prop_write_spreads_evenly(
        value in 0i64..100_000,
        count in 1usize..=MAX_NODES as usize,
        seed in any::<u64>(),
    ) {
        let store = open();
        let key = LogicalKey::from("w");
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        store.create(&key, 0, count, &mut rng).unwrap();
        store.write(&key, value).unwrap();
        let values: Vec<Value> = store
            .fragments_of(&key)
            .unwrap()
            .iter()
            .map(|f| f.value)
            .collect();
        let base = value / count as Value;
        prop_assert_eq!(values.iter().sum::<Value>(), value);
        prop_assert_eq!(values[0], value - base * (count as Value - 1));
        prop_assert!(values[1..].iter().all(|&v| v == base));
    }
}
