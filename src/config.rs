//! TOML configuration for the store, the controller, and the monitor.
//!
//! ```toml
//! [store]
//! max_nodes = 128
//! min_amount_per_node = 10
//! lock_wait_ms = 10
//!
//! [controller]
//! policy = "linear"
//! tick_ms = 1000
//! ar_goal = 0.05
//!
//! [monitor]
//! interval_ms = 500
//! ```
//!
//! Every section and field is optional; missing values keep their defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::control::{AdjustPolicy, ControllerCfg, MonitorCfg};
use crate::primitives::concurrency::RetryCfg;
use crate::storage::MrvOptions;
use crate::types::Value;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read mrv config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse mrv config {path}: {source}")]
    Parse {
        /// File that failed, or `<inline>` for in-memory text.
        path: PathBuf,
        /// Underlying parse error.
        source: toml::de::Error,
    },
    /// `controller.policy` names no known policy.
    #[error("controller policy '{value}' is invalid")]
    InvalidPolicy {
        /// Rejected value.
        value: String,
    },
}

/// Default configuration file location: `<config dir>/mrv/mrv.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("mrv").join("mrv.toml"))
}

/// Resolved configuration.
#[derive(Clone, Debug, Default)]
pub struct MrvConfig {
    path: Option<PathBuf>,
    store: StoreSection,
    controller: ControllerCfg,
    monitor: MonitorCfg,
}

impl MrvConfig {
    /// Loads `explicit`, or the default path when `None`. A missing file
    /// yields the defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let raw = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        let mut config = Self::from_raw(raw)?;
        config.path = path;
        Ok(config)
    }

    /// Parses configuration text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    /// File the configuration was resolved against, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Store options described by `[store]`.
    pub fn store_options(&self) -> MrvOptions {
        let s = &self.store;
        let defaults = MrvOptions::default();
        let retry = RetryCfg {
            attempts: s.write_retry_attempts.unwrap_or(defaults.write_retry.attempts),
            backoff: s
                .write_retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.write_retry.backoff),
        };
        MrvOptions::default()
            .max_nodes(s.max_nodes.unwrap_or(defaults.max_nodes))
            .min_nodes(s.min_nodes.unwrap_or(defaults.min_nodes))
            .min_amount_per_node(s.min_amount_per_node.unwrap_or(defaults.min_amount_per_node))
            .distribute_adds(
                s.distribute_adds_after
                    .unwrap_or(defaults.distribute_adds_after),
                s.distribute_adds_size.unwrap_or(defaults.distribute_adds_size),
            )
            .lock_wait(
                s.lock_wait_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.lock_wait),
            )
            .write_retry(retry)
    }

    /// Controller settings described by `[controller]`.
    pub fn controller(&self) -> &ControllerCfg {
        &self.controller
    }

    /// Monitor settings described by `[monitor]`.
    pub fn monitor(&self) -> MonitorCfg {
        self.monitor
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let defaults = ControllerCfg::default();
        let c = raw.controller;
        let policy = match c.policy {
            Some(value) => value
                .parse::<AdjustPolicy>()
                .map_err(|_| ConfigError::InvalidPolicy { value })?,
            None => defaults.policy,
        };
        let controller = ControllerCfg {
            policy,
            tick: c.tick_ms.map(Duration::from_millis).unwrap_or(defaults.tick),
            ar_goal: c.ar_goal.unwrap_or(defaults.ar_goal),
            ar_min: c.ar_min.unwrap_or(defaults.ar_min),
            min_records: c.min_records.unwrap_or(defaults.min_records),
            max_records: c.max_records.unwrap_or(defaults.max_records),
            min_amount_per_node: c
                .min_amount_per_node
                .unwrap_or(defaults.min_amount_per_node),
        };
        let monitor = MonitorCfg {
            interval: raw
                .monitor
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(MonitorCfg::default().interval),
        };
        Ok(Self {
            path: None,
            store: raw.store,
            controller,
            monitor,
        })
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    store: StoreSection,
    #[serde(default)]
    controller: ControllerSection,
    #[serde(default)]
    monitor: MonitorSection,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreSection {
    max_nodes: Option<u16>,
    min_nodes: Option<usize>,
    min_amount_per_node: Option<Value>,
    distribute_adds_after: Option<Value>,
    distribute_adds_size: Option<usize>,
    lock_wait_ms: Option<u64>,
    write_retry_attempts: Option<u32>,
    write_retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControllerSection {
    policy: Option<String>,
    tick_ms: Option<u64>,
    ar_goal: Option<f64>,
    ar_min: Option<f64>,
    min_records: Option<usize>,
    max_records: Option<usize>,
    min_amount_per_node: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MonitorSection {
    interval_ms: Option<u64>,
}
