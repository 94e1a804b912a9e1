//! Pipeline error model.

use settle_state::StateError;
use settle_types::error::SourceError;

/// Any failure that aborts a pipeline invocation.
///
/// None of these are handled inside the driver: the destination
/// transaction is dropped, nothing is committed, and the next scheduled
/// invocation reads the same window again.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Classified source failure, after any local retries were exhausted.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Destination or checkpoint failure.
    #[error("warehouse error: {0}")]
    State(#[from] StateError),

    /// A source row or document could not be shaped into a record.
    #[error("invalid record: {0}")]
    Record(String),

    /// The pipeline was assembled with unusable settings.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn record(message: impl Into<String>) -> Self {
        Self::Record(message.into())
    }

    /// Returns `true` if the source marked the failure as retryable.
    ///
    /// The driver never retries by itself; schedulers may use this to pick
    /// a shorter re-run interval.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source(e) => e.retryable,
            Self::State(_) | Self::Record(_) | Self::Config(_) => false,
        }
    }

    /// Returns the typed source error if this is a `Source` variant.
    #[must_use]
    pub fn as_source_error(&self) -> Option<&SourceError> {
        match self {
            Self::Source(e) => Some(e),
            _ => None,
        }
    }
}

impl From<settle_types::key::KeyError> for PipelineError {
    fn from(e: settle_types::key::KeyError) -> Self {
        Self::State(StateError::Checkpoint(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_errors_keep_retryability() {
        let err = PipelineError::from(SourceError::transient_network("HTTP_503", "down"));
        assert!(err.is_retryable());
        assert!(err.as_source_error().is_some());

        let err = PipelineError::from(SourceError::config("BAD", "bad"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn infrastructure_errors_are_not_retryable() {
        let err = PipelineError::record("missing `_id`");
        assert!(!err.is_retryable());
        assert!(err.as_source_error().is_none());
        assert_eq!(err.to_string(), "invalid record: missing `_id`");
    }

    #[test]
    fn key_errors_surface_as_checkpoint_errors() {
        let err = PipelineError::from(settle_types::key::KeyError::UnsupportedVersion(2));
        assert!(matches!(err, PipelineError::State(StateError::Checkpoint(_))));
    }
}
