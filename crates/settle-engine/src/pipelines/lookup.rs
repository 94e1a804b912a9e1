//! Reference lookups run by the resolvers, inside the pipeline transaction.

use settle_core::PipelineError;
use settle_state::{Session, SqlValue};

/// Surrogate `id` of the newest row whose `column` equals `value`.
pub(crate) fn latest_id(
    session: &mut dyn Session,
    table: &str,
    column: &str,
    value: SqlValue,
) -> Result<Option<i64>, PipelineError> {
    let sql = format!("SELECT MAX(id) FROM {table} WHERE {column} = $1");
    match session.query_opt(&sql, &[value])? {
        Some(row) => Ok(row.get_opt_i64(0)?),
        None => Ok(None),
    }
}

/// Whether any row of `table` has `column` equal to `value`.
pub(crate) fn exists(
    session: &mut dyn Session,
    table: &str,
    column: &str,
    value: SqlValue,
) -> Result<bool, PipelineError> {
    let sql = format!("SELECT 1 FROM {table} WHERE {column} = $1 LIMIT 1");
    Ok(session.query_opt(&sql, &[value])?.is_some())
}
