//! The concrete pipelines of the settlement warehouse.
//!
//! Each builder wires a reader, an optional reference resolver and a
//! writer into a [`PipelineDriver`] for one catalog entry.

pub mod cdm;
pub mod dds;
pub(crate) mod lookup;
pub mod stg;

use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDateTime;
use serde_json::Value;
use settle_core::{BatchReader, BatchWriter, Pipeline, PipelineDriver, PipelineError, Record, RunMode};
use settle_state::{CheckpointStore, Dialect, Row};
use settle_types::key::{parse_timestamp, KeySchema};
use settle_types::state::PipelineKey;

use crate::connectors::Connectors;

/// Builds one pipeline.
pub type BuildFn = fn(&BuildContext<'_>) -> Result<Box<dyn Pipeline>>;

/// Everything a builder needs besides its own query and table names.
pub struct BuildContext<'a> {
    pub key: &'static str,
    /// Schema holding the pipeline's target tables and checkpoint row.
    pub layer: &'static str,
    pub dialect: Dialect,
    pub mode: RunMode,
    pub limit: usize,
    pub stall_alarm: Duration,
    pub connectors: &'a dyn Connectors,
}

impl BuildContext<'_> {
    /// Driver with this context's key, checkpoint store, mode and limits.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer is not a valid schema name.
    pub fn driver<R: Record + 'static>(
        &self,
        schema: KeySchema,
        reader: impl BatchReader<R> + 'static,
        writer: impl BatchWriter<R> + 'static,
    ) -> Result<PipelineDriver<R>> {
        Ok(PipelineDriver::new(
            PipelineKey::new(self.key),
            schema,
            CheckpointStore::new(self.layer)?,
            reader,
            writer,
        )
        .with_mode(self.mode)
        .with_limit(self.limit)
        .with_stall_alarm(self.stall_alarm))
    }
}

/// Parse a JSON text column.
pub(crate) fn json_column(row: &Row, idx: usize) -> Result<Value, PipelineError> {
    let raw = row.get_string(idx)?;
    serde_json::from_str(&raw).map_err(|e| PipelineError::record(format!("column {idx} is not JSON: {e}")))
}

fn missing(pointer: &str) -> PipelineError {
    PipelineError::record(format!("missing or mistyped `{pointer}`"))
}

/// String at a JSON pointer such as `/user/id`.
pub(crate) fn text_at(value: &Value, pointer: &str) -> Result<String, PipelineError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(pointer))
}

/// Number at a JSON pointer; integers are widened.
pub(crate) fn f64_at(value: &Value, pointer: &str) -> Result<f64, PipelineError> {
    value.pointer(pointer).and_then(Value::as_f64).ok_or_else(|| missing(pointer))
}

/// Integer at a JSON pointer.
pub(crate) fn i64_at(value: &Value, pointer: &str) -> Result<i64, PipelineError> {
    value.pointer(pointer).and_then(Value::as_i64).ok_or_else(|| missing(pointer))
}

/// Timestamp string at a JSON pointer, in any form `parse_timestamp` reads.
pub(crate) fn timestamp_at(value: &Value, pointer: &str) -> Result<NaiveDateTime, PipelineError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .ok_or_else(|| missing(pointer))
}
