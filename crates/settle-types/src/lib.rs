//! Shared data types for the settle incremental-load engine.
//!
//! Pure data only: key values and their total order, checkpoint documents,
//! pipeline identifiers and the classified source error model. Kept free of
//! I/O so the state crate, the engine and every connector can share them.

#![warn(clippy::pedantic)]

pub mod checkpoint;
pub mod error;
pub mod key;
pub mod state;
