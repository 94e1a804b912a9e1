//! Pipeline identity and run statistics.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Unique name of a pipeline; also the checkpoint row key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineKey(String);

impl PipelineKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for PipelineKey {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// Counters accumulated over one pipeline invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Records returned by the reader, before gap filtering.
    pub records_read: u64,
    /// Records whose write created or changed a row.
    pub records_written: u64,
    /// Records the writer accepted as no-ops (duplicate or unchanged).
    pub records_skipped: u64,
    /// Records dropped by the gap filter, to be read again next run.
    pub records_held_back: u64,
    /// Number of read calls that returned at least one record.
    pub batches: u64,
}

impl RunStats {
    /// Records that went through the writer, applied or not.
    #[must_use]
    pub fn records_admitted(&self) -> u64 {
        self.records_written + self.records_skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_key_display_and_as_str() {
        let key = PipelineKey::new("couriers_stg_to_dds_workflow");
        assert_eq!(key.as_str(), "couriers_stg_to_dds_workflow");
        assert_eq!(key.to_string(), "couriers_stg_to_dds_workflow");
    }

    #[test]
    fn pipeline_key_serde_transparent() {
        let key = PipelineKey::from("k");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"k\"");
    }

    #[test]
    fn run_stats_default_is_zeroed() {
        let stats = RunStats::default();
        assert_eq!(stats.records_read, 0);
        assert_eq!(stats.records_admitted(), 0);
        assert_eq!(stats.batches, 0);
    }

    #[test]
    fn admitted_counts_applied_and_skipped() {
        let stats = RunStats {
            records_written: 3,
            records_skipped: 2,
            ..RunStats::default()
        };
        assert_eq!(stats.records_admitted(), 5);
    }
}
