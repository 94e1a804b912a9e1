//! Paginated-endpoint batch reader.
//!
//! JSON APIs that only page by `offset`/`limit` with a small fixed page
//! size are read page by page until the pipeline's batch limit is reached.
//! Each page fetch is retried locally with bounded backoff; the
//! [`PageSource`] seam keeps the transport swappable, with a blocking
//! `reqwest` client for real endpoints and an in-memory source for tests.

#![warn(clippy::pedantic)]

pub mod memory;
pub mod page;
pub mod reader;

pub use memory::MemoryPageSource;
pub use page::{HttpPageSource, PageSource};
pub use reader::{HttpPagedReader, Resume};
