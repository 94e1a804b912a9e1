//! Checkpoint store: one settings row per pipeline.
//!
//! Rows live in `<schema>.srv_wf_settings` of the layer the pipeline writes
//! to, so reading and saving a checkpoint always happens through the same
//! transaction as the pipeline's own writes.

use chrono::NaiveDate;
use settle_types::checkpoint::Checkpoint;
use settle_types::key::KeySchema;
use settle_types::state::PipelineKey;

use crate::dialect::{checked_identifier, Dialect};
use crate::error::Result;
use crate::session::Session;
use crate::value::SqlValue;

/// Name of the per-layer settings table.
pub const SETTINGS_TABLE: &str = "srv_wf_settings";

const CREATE_SETTINGS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS {table} (
    id {serial},
    workflow_key VARCHAR NOT NULL UNIQUE,
    workflow_settings TEXT NOT NULL
)";

/// Reads and writes pipeline checkpoints in one schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    table: String,
}

impl CheckpointStore {
    /// Store backed by `<schema>.srv_wf_settings`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidIdentifier`](crate::StateError::InvalidIdentifier)
    /// for a schema name that is not a plain identifier.
    pub fn new(schema: &str) -> Result<Self> {
        let schema = checked_identifier(schema)?;
        Ok(Self {
            table: format!("{schema}.{SETTINGS_TABLE}"),
        })
    }

    /// Fully-qualified table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// DDL for the settings table in `dialect`.
    #[must_use]
    pub fn create_table_sql(&self, dialect: Dialect) -> String {
        dialect.render_ddl(&CREATE_SETTINGS_TABLE.replace("{table}", &self.table))
    }

    /// Create the settings table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the DDL fails.
    pub fn ensure_table(&self, session: &mut dyn Session) -> Result<()> {
        let ddl = self.create_table_sql(session.dialect());
        session.batch_execute(&ddl)
    }

    /// The stored settings document, verbatim.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the lookup fails.
    pub fn raw(&self, session: &mut dyn Session, key: &PipelineKey) -> Result<Option<String>> {
        let sql = format!(
            "SELECT workflow_settings FROM {} WHERE workflow_key = $1",
            self.table
        );
        match session.query_opt(&sql, &[SqlValue::from(key.as_str())])? {
            Some(row) => Ok(Some(row.get_string(0)?)),
            None => Ok(None),
        }
    }

    /// Every stored `(workflow_key, workflow_settings)` pair, by key.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the query fails.
    pub fn list(&self, session: &mut dyn Session) -> Result<Vec<(String, String)>> {
        let sql = format!(
            "SELECT workflow_key, workflow_settings FROM {} ORDER BY workflow_key",
            self.table
        );
        session
            .query(&sql, &[])?
            .iter()
            .map(|row| Ok((row.get_string(0)?, row.get_string(1)?)))
            .collect()
    }

    /// Load the checkpoint for `key`.
    ///
    /// Without a stored row the result is the schema's minimum watermark,
    /// or the watermark seeded at `start_date` when one is given. Legacy
    /// documents missing some fields take them from the same default.
    ///
    /// # Errors
    ///
    /// Returns a backend error, or [`StateError::Checkpoint`](crate::StateError::Checkpoint)
    /// if the stored document does not match `schema`.
    pub fn get(
        &self,
        session: &mut dyn Session,
        key: &PipelineKey,
        schema: &KeySchema,
        start_date: Option<NaiveDate>,
    ) -> Result<Checkpoint> {
        let initial = start_date.map_or_else(|| schema.minimum(), |d| schema.starting_at(d));
        match self.raw(session, key)? {
            Some(raw) => Ok(Checkpoint::decode(schema, &raw, &initial)?),
            None => Ok(Checkpoint::at(initial)),
        }
    }

    /// Replace the stored checkpoint for `key` entirely.
    ///
    /// # Errors
    ///
    /// Returns a backend error, or [`StateError::Checkpoint`](crate::StateError::Checkpoint)
    /// if `checkpoint` does not conform to `schema`.
    pub fn put(
        &self,
        session: &mut dyn Session,
        key: &PipelineKey,
        schema: &KeySchema,
        checkpoint: &Checkpoint,
    ) -> Result<()> {
        let document = checkpoint.encode(schema)?;
        let sql = format!(
            "INSERT INTO {} (workflow_key, workflow_settings) VALUES ($1, $2) \
             ON CONFLICT (workflow_key) \
             DO UPDATE SET workflow_settings = EXCLUDED.workflow_settings",
            self.table
        );
        session.execute(&sql, &[SqlValue::from(key.as_str()), SqlValue::Text(document)])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteWarehouse;
    use crate::{Session, Warehouse};
    use settle_types::key::{KeyKind, KeyValue, Watermark};

    fn setup() -> (SqliteWarehouse, CheckpointStore) {
        let mut wh = SqliteWarehouse::in_memory(&["stg"]).unwrap();
        let store = CheckpointStore::new("stg").unwrap();
        store.ensure_table(&mut wh).unwrap();
        (wh, store)
    }

    fn id_schema() -> KeySchema {
        KeySchema::new([("id", KeyKind::Int)])
    }

    #[test]
    fn absent_checkpoint_is_the_minimum() {
        let (mut wh, store) = setup();
        let key = PipelineKey::new("p");
        let cp = store.get(&mut wh, &key, &id_schema(), None).unwrap();
        assert_eq!(cp.watermark, Watermark::new(vec![KeyValue::Int(-1)]));
        assert_eq!(cp.offset, None);
    }

    #[test]
    fn absent_checkpoint_honours_start_date() {
        let (mut wh, store) = setup();
        let schema = KeySchema::new([("event_ts", KeyKind::Timestamp), ("id", KeyKind::Int)]);
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        let cp = store.get(&mut wh, &PipelineKey::new("p"), &schema, Some(start)).unwrap();
        assert_eq!(
            cp.watermark.get(0),
            Some(&KeyValue::Timestamp(start.and_hms_opt(0, 0, 0).unwrap()))
        );
    }

    #[test]
    fn put_replaces_the_stored_value() {
        let (mut wh, store) = setup();
        let key = PipelineKey::new("p");
        let schema = id_schema();
        store
            .put(&mut wh, &key, &schema, &Checkpoint::at(Watermark::new(vec![KeyValue::Int(5)])))
            .unwrap();
        let mut second = Checkpoint::at(Watermark::new(vec![KeyValue::Int(9)]));
        second.offset = Some(3);
        store.put(&mut wh, &key, &schema, &second).unwrap();

        assert_eq!(store.get(&mut wh, &key, &schema, None).unwrap(), second);
        assert_eq!(store.list(&mut wh).unwrap().len(), 1);
    }

    #[test]
    fn legacy_rows_are_readable() {
        let (mut wh, store) = setup();
        wh.execute(
            "INSERT INTO stg.srv_wf_settings (workflow_key, workflow_settings) VALUES ($1, $2)",
            &[SqlValue::from("p"), SqlValue::from(r#"{"id": 42}"#)],
        )
        .unwrap();
        let cp = store.get(&mut wh, &PipelineKey::new("p"), &id_schema(), None).unwrap();
        assert_eq!(cp.watermark, Watermark::new(vec![KeyValue::Int(42)]));
    }

    #[test]
    fn put_inside_a_dropped_transaction_is_not_persisted() {
        let (mut wh, store) = setup();
        let key = PipelineKey::new("p");
        {
            let mut tx = wh.begin().unwrap();
            store
                .put(
                    tx.session(),
                    &key,
                    &id_schema(),
                    &Checkpoint::at(Watermark::new(vec![KeyValue::Int(1)])),
                )
                .unwrap();
        }
        assert!(store.raw(&mut wh, &key).unwrap().is_none());
    }

    #[test]
    fn schema_name_must_be_an_identifier() {
        assert!(CheckpointStore::new("stg;--").is_err());
        assert_eq!(CheckpointStore::new("dds").unwrap().table(), "dds.srv_wf_settings");
    }
}
