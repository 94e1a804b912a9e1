//! Generic incremental-load engine.
//!
//! A pipeline is a [`PipelineDriver`](driver::PipelineDriver) parameterized
//! by a [`BatchReader`](reader::BatchReader), an optional
//! [`ReferenceResolver`](gap::ReferenceResolver) and a
//! [`BatchWriter`](writer::BatchWriter). The driver loads the checkpoint,
//! reads ordered batches strictly after it, truncates each batch at the
//! first unresolved reference, writes what is left and saves the new
//! watermark in the same destination transaction.

#![warn(clippy::pedantic)]

pub mod driver;
pub mod errors;
pub mod gap;
pub mod paging;
pub mod reader;
pub mod record;
pub mod result;
pub mod retry;
pub mod writer;

pub use driver::{Pipeline, PipelineDriver, RunMode};
pub use errors::PipelineError;
pub use gap::{Resolution, ReferenceResolver};
pub use reader::{BatchReader, ReadRequest};
pub use record::Record;
pub use result::{Progress, RunOutcome};
pub use writer::{BatchWriter, WriteOutcome};
