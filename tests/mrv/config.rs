#![allow(missing_docs)]

use std::fs;
use std::time::Duration;

use mrv::config::{ConfigError, MrvConfig};
use mrv::control::{AdjustPolicy, ControllerCfg};
use mrv::storage::MrvStore;
use tempfile::tempdir;

#[test]
fn loads_file_from_explicit_path() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("mrv.toml");
    fs::write(
        &path,
        r#"
[store]
max_nodes = 24
min_nodes = 2
lock_wait_ms = 3

[controller]
policy = "linear"
min_records = 2
max_records = 24
ar_goal = 0.2
"#,
    )?;
    let config = MrvConfig::load(Some(path.clone()))?;
    assert_eq!(config.path(), Some(path.as_path()));
    let opts = config.store_options();
    assert_eq!(opts.max_nodes, 24);
    assert_eq!(opts.min_nodes, 2);
    assert_eq!(opts.lock_wait, Duration::from_millis(3));
    assert_eq!(config.controller().policy, AdjustPolicy::Linear);
    assert_eq!(config.controller().ar_goal, 0.2);
    assert_eq!(config.controller().ar_min, ControllerCfg::default().ar_min);

    let store = MrvStore::open(opts)?;
    assert_eq!(store.options().max_nodes, 24);
    Ok(())
}

#[test]
fn missing_file_yields_defaults() -> Result<(), ConfigError> {
    let dir = tempdir().map_err(|source| ConfigError::Read {
        path: "tempdir".into(),
        source,
    })?;
    let path = dir.path().join("absent.toml");
    let config = MrvConfig::load(Some(path.clone()))?;
    assert_eq!(config.path(), Some(path.as_path()));
    assert_eq!(config.store_options().max_nodes, 128);
    assert_eq!(config.controller(), &ControllerCfg::default());
    Ok(())
}

#[test]
fn reports_read_and_parse_failures_with_path() {
    let dir = tempdir().unwrap();
    // A directory exists but cannot be read as a file.
    match MrvConfig::load(Some(dir.path().to_path_buf())) {
        Err(ConfigError::Read { path, .. }) => assert_eq!(path, dir.path()),
        other => panic!("expected read error, got {other:?}"),
    }

    let bad = dir.path().join("bad.toml");
    fs::write(&bad, "[store]\nmax_nodes = \"many\"\n").unwrap();
    match MrvConfig::load(Some(bad.clone())) {
        Err(ConfigError::Parse { path, .. }) => assert_eq!(path, bad),
        other => panic!("expected parse error, got {other:?}"),
    }
}
