//! Destination writers.
//!
//! [`UpsertWriter`] renders one `INSERT ... ON CONFLICT` statement per
//! target and binds each record into it. [`ScdWriter`] keeps type-2
//! history: one open row per natural key, closed rows never touched again.

#![warn(clippy::pedantic)]

pub mod scd;
pub mod upsert;

pub use scd::{ScdSpec, ScdWriter, Versioned, OPEN_ENDED};
pub use upsert::{OnConflict, UpsertSpec, UpsertWriter};
