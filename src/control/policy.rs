use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Rule mapping an observed abort rate to a new fragment count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustPolicy {
    /// One fragment at a time.
    #[default]
    Binary,
    /// `1 + floor(count * ar)` fragments at a time.
    Linear,
    /// `1 + floor((count * ar)^2)` fragments at a time.
    Quadratic,
}

/// Thresholds and clamps shared by every [`AdjustPolicy`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdjustBounds {
    /// Smallest fragment count a shrink may reach.
    pub min_records: usize,
    /// Largest fragment count a grow may reach.
    pub max_records: usize,
    /// Abort rate above which the key grows.
    pub ar_goal: f64,
    /// Abort rate below which the key shrinks.
    pub ar_min: f64,
}

impl Default for AdjustBounds {
    fn default() -> Self {
        Self {
            min_records: 1,
            max_records: 1024,
            ar_goal: 0.1,
            ar_min: 0.01,
        }
    }
}

impl AdjustPolicy {
    /// Every policy, in increasing aggressiveness.
    pub const ALL: [AdjustPolicy; 3] = [
        AdjustPolicy::Binary,
        AdjustPolicy::Linear,
        AdjustPolicy::Quadratic,
    ];

    /// Returns the fragment count to move to from `count` given abort rate `ar`.
    ///
    /// Rates inside `[ar_min, ar_goal]` never change the count, and the result
    /// stays within `[min_records, max_records]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn adjust(self, ar: f64, count: usize, bounds: &AdjustBounds) -> usize {
        let scaled = count as f64 * ar;
        let step = match self {
            AdjustPolicy::Binary => 1,
            AdjustPolicy::Linear => 1 + scaled as usize,
            AdjustPolicy::Quadratic => 1 + (scaled * scaled) as usize,
        };
        if ar > bounds.ar_goal && count < bounds.max_records {
            count.saturating_add(step).min(bounds.max_records)
        } else if ar < bounds.ar_min && count > bounds.min_records {
            count.saturating_sub(step).max(bounds.min_records)
        } else {
            count
        }
    }

    /// Lowercase policy name.
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustPolicy::Binary => "binary",
            AdjustPolicy::Linear => "linear",
            AdjustPolicy::Quadratic => "quadratic",
        }
    }
}

impl fmt::Display for AdjustPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdjustPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(AdjustPolicy::Binary),
            "linear" => Ok(AdjustPolicy::Linear),
            "quadratic" => Ok(AdjustPolicy::Quadratic),
            other => Err(format!(
                "unknown adjust policy '{other}' (expected binary, linear, or quadratic)"
            )),
        }
    }
}
