//! Fragment store and the logical operations over split values.
//!
//! A logical value lives in one or more fragments, each addressed by its
//! `(key, rk)` pair. [`MrvStore`] owns the fragments of every key and exposes
//! creation, resizing, and the add/subtract/write/read operations.

mod metrics;
mod ops;
mod options;
mod store;

/// Metrics hooks.
pub use metrics::{default_metrics, CounterMetrics, MrvMetrics, NoopMetrics, OpKind};

/// Store configuration.
pub use options::MrvOptions;

/// The fragment store.
pub use store::{FragmentStats, MrvStore};
