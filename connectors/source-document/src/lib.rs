//! Filtered-cursor batch reader over a document store.
//!
//! A [`DocumentCollection`] answers "documents whose key is past this
//! cursor, sorted by key, at most `limit`". The cursor is the lexicographic
//! `$or` filter built by [`CursorFilter`]. [`MongoCollection`] runs it on a
//! `MongoDB` server; the in-memory and `mongoexport` directory collections
//! evaluate it themselves.

#![warn(clippy::pedantic)]

pub mod collection;
pub mod filter;
pub mod mongo;
pub mod reader;

pub use collection::{DocumentCollection, JsonDirCollection, MemoryCollection};
pub use filter::CursorFilter;
pub use mongo::MongoCollection;
pub use reader::DocumentBatchReader;
