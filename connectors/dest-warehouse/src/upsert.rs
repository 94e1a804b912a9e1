//! Idempotent single-row upserts.

use settle_core::{BatchWriter, PipelineError, WriteOutcome};
use settle_state::{Session, SqlValue};

/// What happens when the conflict key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Overwrite every non-key column.
    Update,
    /// Keep the existing row; for immutable facts and events.
    DoNothing,
}

/// Target table, its columns in bind order and the conflict key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertSpec {
    pub table: String,
    pub columns: Vec<String>,
    pub conflict: Vec<String>,
    pub on_conflict: OnConflict,
}

impl UpsertSpec {
    pub fn new<C, K>(table: impl Into<String>, columns: C, conflict: K, on_conflict: OnConflict) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            conflict: conflict.into_iter().map(Into::into).collect(),
            on_conflict,
        }
    }

    /// The `INSERT` statement with `$n` placeholders in column order.
    #[must_use]
    pub fn sql(&self) -> String {
        let placeholders = (1..=self.columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let conflict_cols = self.conflict.join(", ");
        let update_cols: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !self.conflict.contains(c))
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        let clause = if self.on_conflict == OnConflict::DoNothing || update_cols.is_empty() {
            format!("ON CONFLICT ({conflict_cols}) DO NOTHING")
        } else {
            format!("ON CONFLICT ({conflict_cols}) DO UPDATE SET {}", update_cols.join(", "))
        };
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders}) {clause}",
            self.table,
            self.columns.join(", ")
        )
    }
}

/// Extracts a record's values in [`UpsertSpec::columns`] order.
pub type Binder<R> = Box<dyn Fn(&R) -> Vec<SqlValue>>;

/// Writes each record with one upsert statement.
pub struct UpsertWriter<R> {
    spec: UpsertSpec,
    sql: String,
    bind: Binder<R>,
}

impl<R> UpsertWriter<R> {
    pub fn new(spec: UpsertSpec, bind: impl Fn(&R) -> Vec<SqlValue> + 'static) -> Self {
        let sql = spec.sql();
        Self {
            spec,
            sql,
            bind: Box::new(bind),
        }
    }

    #[must_use]
    pub fn spec(&self) -> &UpsertSpec {
        &self.spec
    }
}

impl<R> BatchWriter<R> for UpsertWriter<R> {
    fn write(&mut self, session: &mut dyn Session, record: &R) -> Result<WriteOutcome, PipelineError> {
        let params = (self.bind)(record);
        if params.len() != self.spec.columns.len() {
            return Err(PipelineError::Config(format!(
                "{} expects {} values, got {}",
                self.spec.table,
                self.spec.columns.len(),
                params.len()
            )));
        }
        let affected = session.execute(&self.sql, &params)?;
        Ok(WriteOutcome::from_affected(affected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_state::sqlite::SqliteWarehouse;

    #[test]
    fn update_sets_every_non_key_column() {
        let spec = UpsertSpec::new(
            "dds.dm_users",
            ["user_id", "user_name", "user_login"],
            ["user_id"],
            OnConflict::Update,
        );
        assert_eq!(
            spec.sql(),
            "INSERT INTO dds.dm_users (user_id, user_name, user_login) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE SET user_name = EXCLUDED.user_name, \
             user_login = EXCLUDED.user_login"
        );
    }

    #[test]
    fn key_only_targets_fall_back_to_do_nothing() {
        let spec = UpsertSpec::new("t", ["a", "b"], ["a", "b"], OnConflict::Update);
        assert!(spec.sql().ends_with("ON CONFLICT (a, b) DO NOTHING"));
    }

    fn warehouse() -> SqliteWarehouse {
        let mut wh = SqliteWarehouse::in_memory(&["dds"]).unwrap();
        wh.batch_execute("CREATE TABLE dds.t (k TEXT NOT NULL UNIQUE, v INTEGER)")
            .unwrap();
        wh
    }

    fn writer(on_conflict: OnConflict) -> UpsertWriter<(String, i64)> {
        UpsertWriter::new(
            UpsertSpec::new("dds.t", ["k", "v"], ["k"], on_conflict),
            |r: &(String, i64)| vec![SqlValue::from(r.0.as_str()), SqlValue::Int(r.1)],
        )
    }

    fn value(wh: &mut SqliteWarehouse) -> i64 {
        wh.query_opt("SELECT v FROM dds.t WHERE k = 'a'", &[])
            .unwrap()
            .unwrap()
            .get_i64(0)
            .unwrap()
    }

    #[test]
    fn upsert_overwrites_and_is_idempotent() {
        let mut wh = warehouse();
        let mut w = writer(OnConflict::Update);
        w.write(&mut wh, &("a".into(), 1)).unwrap();
        w.write(&mut wh, &("a".into(), 2)).unwrap();
        w.write(&mut wh, &("a".into(), 2)).unwrap();
        assert_eq!(value(&mut wh), 2);
        let n = wh.query("SELECT k FROM dds.t", &[]).unwrap().len();
        assert_eq!(n, 1);
    }

    #[test]
    fn do_nothing_keeps_the_first_row() {
        let mut wh = warehouse();
        let mut w = writer(OnConflict::DoNothing);
        assert_eq!(w.write(&mut wh, &("a".into(), 1)).unwrap(), WriteOutcome::Applied);
        assert_eq!(w.write(&mut wh, &("a".into(), 9)).unwrap(), WriteOutcome::Skipped);
        assert_eq!(value(&mut wh), 1);
    }

    #[test]
    fn wrong_arity_is_a_configuration_error() {
        let mut wh = warehouse();
        let mut w = UpsertWriter::new(
            UpsertSpec::new("dds.t", ["k", "v"], ["k"], OnConflict::Update),
            |_: &i64| vec![SqlValue::Int(1)],
        );
        assert!(matches!(w.write(&mut wh, &1).unwrap_err(), PipelineError::Config(_)));
    }
}
