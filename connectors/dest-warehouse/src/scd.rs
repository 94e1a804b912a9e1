//! Type-2 history writer.
//!
//! Each natural key has at most one open row, whose `valid_to` is
//! [`OPEN_ENDED`]. A changed payload closes that row at the new version's
//! `valid_from` and inserts the new version as the open row. A changed
//! payload with the open row's own `valid_from` corrects that row in place.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use settle_core::{BatchWriter, PipelineError, WriteOutcome};
use settle_state::{Row, Session, SqlValue};
use settle_types::key::{parse_date, parse_timestamp};

/// `valid_to` of the current version: 2099-12-31 00:00:00.
pub static OPEN_ENDED: LazyLock<NaiveDateTime> = LazyLock::new(|| {
    NaiveDate::from_ymd_opt(2099, 12, 31)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MAX)
});

/// Table layout of a type-2 dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScdSpec {
    pub table: String,
    pub natural_key: String,
    /// Columns whose change starts a new version.
    pub payload: Vec<String>,
    pub valid_from: String,
    pub valid_to: String,
}

impl ScdSpec {
    /// Spec with `active_from` / `active_to` validity columns.
    pub fn new<P>(table: impl Into<String>, natural_key: impl Into<String>, payload: P) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            table: table.into(),
            natural_key: natural_key.into(),
            payload: payload.into_iter().map(Into::into).collect(),
            valid_from: "active_from".into(),
            valid_to: "active_to".into(),
        }
    }

    fn select_open_sql(&self) -> String {
        format!(
            "SELECT {}, {} FROM {} WHERE {} = $1 AND {} = $2",
            self.payload.join(", "),
            self.valid_from,
            self.table,
            self.natural_key,
            self.valid_to
        )
    }

    fn close_sql(&self) -> String {
        format!(
            "UPDATE {} SET {} = $3 WHERE {} = $1 AND {} = $2",
            self.table, self.valid_to, self.natural_key, self.valid_to
        )
    }

    fn correct_sql(&self) -> String {
        let assignments: Vec<String> = self
            .payload
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{column} = ${}", i + 3))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {} = $1 AND {} = $2",
            self.table,
            assignments.join(", "),
            self.natural_key,
            self.valid_to
        )
    }

    fn insert_sql(&self) -> String {
        let columns: Vec<&str> = std::iter::once(self.natural_key.as_str())
            .chain(self.payload.iter().map(String::as_str))
            .chain([self.valid_from.as_str(), self.valid_to.as_str()])
            .collect();
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders}) ON CONFLICT ({}, {}) DO NOTHING",
            self.table,
            columns.join(", "),
            self.natural_key,
            self.valid_to
        )
    }
}

/// One incoming version of a dimension member.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub natural_key: SqlValue,
    /// Values in [`ScdSpec::payload`] order.
    pub payload: Vec<SqlValue>,
    pub valid_from: NaiveDateTime,
}

/// Compare a stored value with an incoming one across the representations
/// backends return (integers in real columns, temporal values as text).
#[allow(clippy::cast_precision_loss)]
fn same_value(stored: &SqlValue, incoming: &SqlValue) -> bool {
    match (stored, incoming) {
        (SqlValue::Float(a), SqlValue::Int(b)) | (SqlValue::Int(b), SqlValue::Float(a)) => {
            (*a - *b as f64).abs() < f64::EPSILON
        }
        (SqlValue::Float(a), SqlValue::Float(b)) => (a - b).abs() < f64::EPSILON,
        (SqlValue::Text(s), SqlValue::Timestamp(t)) => parse_timestamp(s) == Some(*t),
        (SqlValue::Text(s), SqlValue::Date(d)) => parse_date(s) == Some(*d),
        _ => stored == incoming,
    }
}

fn same_payload(row: &Row, incoming: &[SqlValue]) -> bool {
    row.values()
        .iter()
        .zip(incoming)
        .all(|(stored, new)| same_value(stored, new))
}

/// Extracts the version a record represents.
pub type Versioner<R> = Box<dyn Fn(&R) -> Versioned>;

/// Maintains validity intervals instead of overwriting.
pub struct ScdWriter<R> {
    spec: ScdSpec,
    select_open: String,
    close: String,
    correct: String,
    insert: String,
    version: Versioner<R>,
}

impl<R> ScdWriter<R> {
    pub fn new(spec: ScdSpec, version: impl Fn(&R) -> Versioned + 'static) -> Self {
        Self {
            select_open: spec.select_open_sql(),
            close: spec.close_sql(),
            correct: spec.correct_sql(),
            insert: spec.insert_sql(),
            spec,
            version: Box::new(version),
        }
    }

    /// Apply one version through `session`.
    ///
    /// An identical payload, or a version older than the open row, is
    /// skipped so that replays never rewrite history. A different payload
    /// stamped with the open row's `valid_from` overwrites the open row.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::State`] if a statement fails, or
    /// [`PipelineError::Config`] if the payload arity is wrong.
    pub fn write_versioned(
        &self,
        session: &mut dyn Session,
        version: &Versioned,
    ) -> Result<WriteOutcome, PipelineError> {
        if version.payload.len() != self.spec.payload.len() {
            return Err(PipelineError::Config(format!(
                "{} payload expects {} values, got {}",
                self.spec.table,
                self.spec.payload.len(),
                version.payload.len()
            )));
        }
        let open_to = SqlValue::Timestamp(*OPEN_ENDED);
        let current = session.query_opt(&self.select_open, &[version.natural_key.clone(), open_to.clone()])?;

        if let Some(row) = current {
            if same_payload(&row, &version.payload) {
                return Ok(WriteOutcome::Skipped);
            }
            let open_from = row.get_timestamp(self.spec.payload.len())?;
            if open_from > version.valid_from {
                tracing::debug!(
                    table = %self.spec.table,
                    open_from = %open_from,
                    incoming_from = %version.valid_from,
                    "Ignoring version older than the open row"
                );
                return Ok(WriteOutcome::Skipped);
            }
            if open_from == version.valid_from {
                let mut params = Vec::with_capacity(version.payload.len() + 2);
                params.push(version.natural_key.clone());
                params.push(open_to);
                params.extend(version.payload.iter().cloned());
                let affected = session.execute(&self.correct, &params)?;
                return Ok(WriteOutcome::from_affected(affected));
            }
            session.execute(
                &self.close,
                &[
                    version.natural_key.clone(),
                    open_to.clone(),
                    SqlValue::Timestamp(version.valid_from),
                ],
            )?;
        }

        let mut params = Vec::with_capacity(version.payload.len() + 3);
        params.push(version.natural_key.clone());
        params.extend(version.payload.iter().cloned());
        params.push(SqlValue::Timestamp(version.valid_from));
        params.push(open_to);
        let affected = session.execute(&self.insert, &params)?;
        Ok(WriteOutcome::from_affected(affected))
    }
}

impl<R> BatchWriter<R> for ScdWriter<R> {
    fn write(&mut self, session: &mut dyn Session, record: &R) -> Result<WriteOutcome, PipelineError> {
        let version = (self.version)(record);
        self.write_versioned(session, &version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_use_the_validity_columns() {
        let spec = ScdSpec::new("dds.dm_restaurants", "restaurant_id", ["restaurant_name"]);
        assert_eq!(
            spec.select_open_sql(),
            "SELECT restaurant_name, active_from FROM dds.dm_restaurants \
             WHERE restaurant_id = $1 AND active_to = $2"
        );
        assert_eq!(
            spec.close_sql(),
            "UPDATE dds.dm_restaurants SET active_to = $3 WHERE restaurant_id = $1 AND active_to = $2"
        );
        assert_eq!(
            spec.correct_sql(),
            "UPDATE dds.dm_restaurants SET restaurant_name = $3 WHERE restaurant_id = $1 AND active_to = $2"
        );
        assert_eq!(
            spec.insert_sql(),
            "INSERT INTO dds.dm_restaurants (restaurant_id, restaurant_name, active_from, active_to) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (restaurant_id, active_to) DO NOTHING"
        );
    }

    #[test]
    fn values_compare_across_representations() {
        assert!(same_value(&SqlValue::Float(180.0), &SqlValue::Int(180)));
        assert!(!same_value(&SqlValue::Float(180.5), &SqlValue::Int(180)));
        assert!(same_value(&SqlValue::from("a"), &SqlValue::from("a")));
        let ts = NaiveDate::from_ymd_opt(2022, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert!(same_value(
            &SqlValue::from("2022-01-02 03:04:05.000000"),
            &SqlValue::Timestamp(ts)
        ));
        assert!(!same_value(&SqlValue::Null, &SqlValue::Int(0)));
    }

    #[test]
    fn open_ended_sentinel_is_end_of_2099() {
        assert_eq!(OPEN_ENDED.to_string(), "2099-12-31 00:00:00");
    }
}
