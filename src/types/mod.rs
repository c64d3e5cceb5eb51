#![forbid(unsafe_code)]

//! Identifiers, fragment records, and the crate-wide error type.

use std::fmt;
use std::sync::Arc;

/// Signed scalar held by a split value and by each of its fragments.
///
/// The engine keeps every fragment non-negative; the sign exists so callers
/// can express decrements through [`crate::storage::MrvStore::update`].
pub type Value = i64;

/// Identity of a split value: the primary key of the owning logical row.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LogicalKey(Arc<str>);

impl LogicalKey {
    /// Creates a key from any string-like primary key rendering.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalKey {
    fn from(value: &str) -> Self {
        LogicalKey::new(value)
    }
}

impl From<String> for LogicalKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<u64> for LogicalKey {
    fn from(value: u64) -> Self {
        LogicalKey::new(value.to_string())
    }
}

impl serde::Serialize for LogicalKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Replica slot index distinguishing the fragments of one key.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Rk(pub u16);

impl fmt::Display for Rk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One physical record holding a portion of a logical value.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Fragment {
    /// Owning logical key.
    pub key: LogicalKey,
    /// Slot of this fragment, unique within the key.
    pub rk: Rk,
    /// Portion of the logical value stored here.
    pub value: Value,
}

/// Errors surfaced by the fragment store and its operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MrvError {
    /// A subtract could not consume the requested amount; nothing was applied.
    #[error("insufficient value for {key}: requested {requested}")]
    InsufficientValue {
        /// Key the subtract targeted.
        key: LogicalKey,
        /// Amount the caller asked to remove.
        requested: Value,
    },
    /// The logical key has no fragments.
    #[error("key not found: {0}")]
    KeyNotFound(LogicalKey),
    /// The logical key already has fragments.
    #[error("key already exists: {0}")]
    KeyExists(LogicalKey),
    /// A resize target fell outside the configured fragment bounds.
    #[error("invalid fragment count {requested} (allowed {min}..={max})")]
    InvalidFragmentCount {
        /// Requested fragment count.
        requested: usize,
        /// Lower bound.
        min: usize,
        /// Upper bound.
        max: usize,
    },
    /// Fragment locks could not be acquired in time; the caller should retry.
    #[error("concurrent modification conflict on {key} after {attempts} attempt(s)")]
    Conflict {
        /// Key whose locks were contended.
        key: LogicalKey,
        /// Number of acquisition attempts made.
        attempts: u32,
    },
    /// An argument violated the value domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl MrvError {
    /// Returns `true` for errors that a retry may resolve.
    pub fn is_conflict(&self) -> bool {
        matches!(self, MrvError::Conflict { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MrvError>;
