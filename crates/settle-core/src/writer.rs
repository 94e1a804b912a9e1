//! Batch writer abstraction.

use settle_state::Session;

use crate::errors::PipelineError;

/// Effect of writing one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A row was inserted or updated.
    Applied,
    /// The destination already held an equivalent row.
    Skipped,
}

impl WriteOutcome {
    /// Map a statement's affected-row count.
    #[must_use]
    pub fn from_affected(rows: u64) -> Self {
        if rows == 0 {
            Self::Skipped
        } else {
            Self::Applied
        }
    }
}

/// Idempotent per-record writer.
///
/// Writing the same record twice must leave the destination as writing it
/// once did; conflicts are absorbed by upsert or insert-ignore semantics.
pub trait BatchWriter<R> {
    /// Write one record through the destination transaction.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::State`] on destination failure.
    fn write(&mut self, session: &mut dyn Session, record: &R) -> Result<WriteOutcome, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affected_rows_map_to_outcome() {
        assert_eq!(WriteOutcome::from_affected(0), WriteOutcome::Skipped);
        assert_eq!(WriteOutcome::from_affected(1), WriteOutcome::Applied);
        assert_eq!(WriteOutcome::from_affected(2), WriteOutcome::Applied);
    }
}
