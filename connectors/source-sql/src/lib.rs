//! Ordered-query batch readers.
//!
//! Records are read with a keyset predicate generated from the pipeline's
//! key columns, either inside the destination transaction or from a
//! separate relational source opened once per invocation.

#![warn(clippy::pedantic)]

pub mod keyset;
pub mod nested;
pub mod reader;

pub use keyset::{Bound, KeysetQuery};
pub use nested::NestedReader;
pub use reader::{SqlBatchReader, SqlSource};
