//! Destination-side persistence for the settle engine.
//!
//! Provides the [`Session`] / [`Warehouse`] abstractions over a transactional
//! SQL destination, `SQLite` and `PostgreSQL` implementations, the dialect
//! helpers that let one SQL text run on both, and the [`CheckpointStore`]
//! that keeps one watermark row per pipeline.

#![warn(clippy::pedantic)]

pub mod checkpoint;
pub mod dialect;
pub mod error;
pub mod postgres;
pub mod session;
pub mod sqlite;
pub mod value;

pub use checkpoint::CheckpointStore;
pub use dialect::Dialect;
pub use error::StateError;
pub use session::{Session, SessionFactory, Warehouse, WarehouseTx};
pub use value::{Row, SqlValue};
