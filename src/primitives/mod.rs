//! Low-level primitives for the fragment store.

/// Fragment row locks and ordered full-key acquisition.
pub mod concurrency;
