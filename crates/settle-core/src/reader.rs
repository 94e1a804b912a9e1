//! Batch reader abstraction.

use settle_state::Session;
use settle_types::checkpoint::Checkpoint;

use crate::errors::PipelineError;

/// Parameters of one read call.
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest<'a> {
    /// Checkpoint loaded at the start of the invocation.
    pub checkpoint: &'a Checkpoint,
    /// Records already consumed past the checkpoint in this invocation.
    /// Always zero in single-batch mode.
    pub offset: u64,
    /// Maximum number of records to return.
    pub limit: usize,
}

/// Source of ordered batches.
///
/// `read` returns at most `limit` records whose keys are strictly greater
/// than the checkpoint's watermark (or, for readers configured with an
/// inclusive bound, greater or equal), in ascending key order.
pub trait BatchReader<R> {
    /// Fetch the next batch.
    ///
    /// `warehouse` is the destination transaction; readers whose source is
    /// the warehouse itself query through it, external readers ignore it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] for source failures (after local
    /// retries) or [`PipelineError::Record`] for rows that cannot be shaped.
    fn read(
        &mut self,
        warehouse: &mut dyn Session,
        request: &ReadRequest<'_>,
    ) -> Result<Vec<R>, PipelineError>;

    /// Release any connection opened for this invocation.
    fn release(&mut self) {}
}
