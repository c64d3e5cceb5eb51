#![allow(missing_docs)]

use mrv::storage::{MrvOptions, MrvStore};
use mrv::types::{LogicalKey, MrvError, Result, Rk, Value};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn values(store: &MrvStore, key: &LogicalKey) -> Result<Vec<Value>> {
    Ok(store.fragments_of(key)?.into_iter().map(|f| f.value).collect())
}

#[test]
fn create_then_drain_then_fail() -> Result<()> {
    let store = MrvStore::open(MrvOptions::default().min_amount_per_node(10))?;
    let mut rng = ChaCha8Rng::seed_from_u64(100);
    let key = LogicalKey::from("product-7");

    assert_eq!(store.create(&key, 100, 4, &mut rng)?, 4);
    let fragments = values(&store, &key)?;
    assert_eq!(fragments.len(), 4);
    assert_eq!(fragments.iter().sum::<Value>(), 100);
    assert!(fragments.iter().all(|&v| v >= 0));

    store.subtract(&key, Rk(0), 100)?;
    assert_eq!(store.total(&key)?, 0);

    let before = values(&store, &key)?;
    assert_eq!(
        store.subtract(&key, Rk(0), 1),
        Err(MrvError::InsufficientValue {
            key: key.clone(),
            requested: 1
        })
    );
    assert_eq!(store.total(&key)?, 0);
    assert_eq!(values(&store, &key)?, before);
    Ok(())
}

#[test]
fn write_on_three_fragments() -> Result<()> {
    let store = MrvStore::open(MrvOptions::default())?;
    let mut rng = ChaCha8Rng::seed_from_u64(101);
    let key = LogicalKey::from("product-8");
    store.create(&key, 999, 3, &mut rng)?;

    store.write(&key, 10)?;
    let mut got = values(&store, &key)?;
    got.sort_unstable();
    assert_eq!(got, vec![3, 3, 4]);
    assert_eq!(store.total(&key)?, 10);
    Ok(())
}

#[test]
fn write_distribution_is_near_even() -> Result<()> {
    let store = MrvStore::open(MrvOptions::default())?;
    let mut rng = ChaCha8Rng::seed_from_u64(102);
    let key = LogicalKey::from("k");
    store.create(&key, 0, 7, &mut rng)?;
    for value in [0, 1, 6, 7, 50, 1_003] {
        store.write(&key, value)?;
        let got = values(&store, &key)?;
        assert_eq!(got.iter().sum::<Value>(), value);
        let average = value / got.len() as Value;
        let spread: Value = got.iter().map(|v| (v - average).abs()).sum();
        assert!(spread <= got.len() as Value, "value {value}: {got:?}");
        assert!(got.iter().filter(|&&v| v != average).count() <= 1);
    }
    Ok(())
}

#[test]
fn resize_conserves_and_respects_bounds() -> Result<()> {
    let store = MrvStore::open(MrvOptions::default().max_nodes(20).min_nodes(2))?;
    let mut rng = ChaCha8Rng::seed_from_u64(103);
    let key = LogicalKey::from("k");
    store.create(&key, 1_234, 5, &mut rng)?;
    for target in [20, 2, 11, 3, 19] {
        store.resize(&key, target, &mut rng)?;
        assert_eq!(store.fragment_count(&key)?, target);
        assert_eq!(store.total(&key)?, 1_234);
        let fragments = store.fragments_of(&key)?;
        assert!(fragments.windows(2).all(|w| w[0].rk < w[1].rk));
        assert!(fragments.iter().all(|f| f.rk.0 < 20));
    }
    assert!(matches!(
        store.resize(&key, 21, &mut rng),
        Err(MrvError::InvalidFragmentCount { requested: 21, .. })
    ));
    assert!(matches!(
        store.resize(&key, 1, &mut rng),
        Err(MrvError::InvalidFragmentCount { requested: 1, .. })
    ));
    assert_eq!(store.fragment_count(&key)?, 19);
    Ok(())
}

#[test]
fn delete_then_recreate() -> Result<()> {
    let store = MrvStore::open(MrvOptions::default())?;
    let mut rng = ChaCha8Rng::seed_from_u64(104);
    let key = LogicalKey::from("k");
    store.create(&key, 10, 2, &mut rng)?;
    store.delete(&key)?;
    assert_eq!(store.total(&key), Err(MrvError::KeyNotFound(key.clone())));
    assert_eq!(store.delete(&key), Err(MrvError::KeyNotFound(key.clone())));
    store.create(&key, 3, 1, &mut rng)?;
    assert_eq!(store.total(&key)?, 3);
    assert_eq!(store.keys(), vec![key]);
    Ok(())
}

#[test]
fn stats_track_drained_fragments() -> Result<()> {
    let store = MrvStore::open(MrvOptions::default().max_nodes(4))?;
    let mut rng = ChaCha8Rng::seed_from_u64(105);
    let key = LogicalKey::from("k");
    store.create(&key, 40, 4, &mut rng)?;
    assert_eq!(store.stats(&key)?.variation, 0.0);
    store.subtract(&key, Rk(0), 20)?;
    let stats = store.stats(&key)?;
    assert_eq!((stats.fragments, stats.total, stats.zeros), (4, 20, 2));
    assert!((stats.variation - 1.0).abs() < 1e-12);
    Ok(())
}
