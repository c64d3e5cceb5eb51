//! Multi-record values: hot scalars split across independently locked fragments.
//!
//! A logical value such as a stock count is stored as several fragments so
//! concurrent increments and decrements land on different rows. The
//! [`storage`] layer owns the fragments and the add/subtract/write/read
//! operations, [`model`] estimates abort rates for a fragment count, and
//! [`control`] grows or shrinks keys from observed contention.

#![warn(missing_docs)]

pub mod config;
pub mod control;
pub mod model;
pub mod primitives;
pub mod storage;
pub mod types;
