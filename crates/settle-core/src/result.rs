//! Pipeline run result types.

use settle_types::checkpoint::Checkpoint;
use settle_types::state::{PipelineKey, RunStats};

/// What an invocation achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// At least one record was admitted and the checkpoint moved.
    Advanced,
    /// The source had nothing past the checkpoint.
    NoRows,
    /// The first pending record has an unresolved reference; nothing was
    /// admitted past it.
    Stalled,
}

impl Progress {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Advanced => "advanced",
            Self::NoRows => "no_rows",
            Self::Stalled => "stalled",
        }
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub pipeline: PipelineKey,
    pub progress: Progress,
    pub stats: RunStats,
    pub checkpoint_before: Checkpoint,
    pub checkpoint_after: Checkpoint,
    pub duration_secs: f64,
}

impl RunOutcome {
    /// Whether the stored checkpoint changed.
    #[must_use]
    pub fn checkpoint_moved(&self) -> bool {
        self.checkpoint_before != self.checkpoint_after
    }
}
