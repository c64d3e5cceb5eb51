use std::sync::Arc;
use std::time::Duration;

use crate::primitives::concurrency::RetryCfg;
use crate::types::{MrvError, Result, Value};

/// Configuration options supplied when opening an [`super::MrvStore`].
#[derive(Clone)]
pub struct MrvOptions {
    /// Number of placement slots; fragment `rk` values are drawn from `[0, max_nodes)`.
    pub max_nodes: u16,
    /// Lower bound on the fragment count reachable through resizing.
    pub min_nodes: usize,
    /// Smallest amount a freshly created fragment is expected to hold (0 disables).
    pub min_amount_per_node: Value,
    /// Additions at or above this amount are spread over several fragments (0 disables).
    pub distribute_adds_after: Value,
    /// Number of fragments a distributed add touches.
    pub distribute_adds_size: usize,
    /// Longest time a single fragment lock is awaited before the operation aborts.
    pub lock_wait: Duration,
    /// Retry schedule for operations that lock every fragment of a key.
    pub write_retry: RetryCfg,
    /// Optional metrics collection implementation
    pub metrics: Option<Arc<dyn super::metrics::MrvMetrics>>,
}

impl Default for MrvOptions {
    fn default() -> Self {
        Self {
            max_nodes: 128,
            min_nodes: 1,
            min_amount_per_node: 0,
            distribute_adds_after: 0,
            distribute_adds_size: 4,
            lock_wait: Duration::from_millis(10),
            write_retry: RetryCfg::default(),
            metrics: None,
        }
    }
}

impl MrvOptions {
    /// Sets the number of placement slots.
    pub fn max_nodes(mut self, slots: u16) -> Self {
        self.max_nodes = slots;
        self
    }

    /// Sets the minimum fragment count for resizing.
    pub fn min_nodes(mut self, count: usize) -> Self {
        self.min_nodes = count;
        self
    }

    /// Sets the minimum expected amount per fragment at creation.
    pub fn min_amount_per_node(mut self, amount: Value) -> Self {
        self.min_amount_per_node = amount;
        self
    }

    /// Enables distributed adds for amounts `>= threshold` over `size` fragments.
    pub fn distribute_adds(mut self, threshold: Value, size: usize) -> Self {
        self.distribute_adds_after = threshold;
        self.distribute_adds_size = size;
        self
    }

    /// Sets how long a fragment lock is awaited.
    pub fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Sets the retry schedule for full-key locking.
    pub fn write_retry(mut self, retry: RetryCfg) -> Self {
        self.write_retry = retry;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn super::metrics::MrvMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_nodes == 0 {
            return Err(MrvError::InvalidArgument("max_nodes must be at least 1"));
        }
        if self.min_nodes == 0 || self.min_nodes > usize::from(self.max_nodes) {
            return Err(MrvError::InvalidArgument(
                "min_nodes must be within 1..=max_nodes",
            ));
        }
        if self.min_amount_per_node < 0 || self.distribute_adds_after < 0 {
            return Err(MrvError::InvalidArgument(
                "amount thresholds must be non-negative",
            ));
        }
        if self.distribute_adds_after > 0 && self.distribute_adds_size == 0 {
            return Err(MrvError::InvalidArgument(
                "distribute_adds_size must be at least 1",
            ));
        }
        Ok(())
    }
}
