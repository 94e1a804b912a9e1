//! `SQLite`-backed warehouse and source sessions.
//!
//! Layer schemas (`stg`, `dds`, `cdm`) are separate attached databases, so
//! schema-qualified names such as `stg.ordersystem_users` resolve the same
//! way they do on `PostgreSQL`. Attached databases share one transaction.

use std::path::{Path, PathBuf};

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql, Transaction};

use crate::dialect::{checked_identifier, Dialect};
use crate::error::{Result, StateError};
use crate::session::{Session, SessionFactory, Warehouse, WarehouseTx};
use crate::value::{Row, SqlValue};

/// Fixed-width timestamp text so stored values compare correctly as text.
const SQLITE_TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const SQLITE_DATE_FMT: &str = "%Y-%m-%d";
const SQLITE_TIME_FMT: &str = "%H:%M:%S%.6f";

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Self::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Self::Timestamp(v) => {
                ToSqlOutput::Owned(Value::Text(v.format(SQLITE_TIMESTAMP_FMT).to_string()))
            }
            Self::Date(v) => ToSqlOutput::Owned(Value::Text(v.format(SQLITE_DATE_FMT).to_string())),
            Self::Time(v) => ToSqlOutput::Owned(Value::Text(v.format(SQLITE_TIME_FMT).to_string())),
        })
    }
}

fn decode_value(column: usize, value: ValueRef<'_>) -> Result<SqlValue> {
    match value {
        ValueRef::Null => Ok(SqlValue::Null),
        ValueRef::Integer(v) => Ok(SqlValue::Int(v)),
        ValueRef::Real(v) => Ok(SqlValue::Float(v)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| SqlValue::Text(s.to_string()))
            .map_err(|_| StateError::Decode {
                column,
                expected: "utf-8 text",
                found: "invalid utf-8".into(),
            }),
        ValueRef::Blob(_) => Err(StateError::Decode {
            column,
            expected: "a scalar value",
            found: "blob".into(),
        }),
    }
}

fn run_execute(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<u64> {
    let sql = Dialect::Sqlite.bind_placeholders(sql);
    let affected = conn.execute(&sql, params_from_iter(params.iter()))?;
    Ok(affected as u64)
}

fn run_query(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
    let sql = Dialect::Sqlite.bind_placeholders(sql);
    let mut stmt = conn.prepare(&sql)?;
    let column_count = stmt.column_count();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(decode_value(idx, row.get_ref(idx)?)?);
        }
        out.push(Row::new(values));
    }
    Ok(out)
}

/// Sibling file holding an attached schema: `dwh.db` + `stg` -> `dwh.stg.db`.
fn schema_file(path: &Path, schema: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map_or_else(|| "warehouse".to_string(), |s| s.to_string_lossy().into_owned());
    let name = match path.extension() {
        Some(ext) => format!("{stem}.{schema}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{schema}"),
    };
    path.with_file_name(name)
}

fn attach(conn: &Connection, target: &str, schema: &str) -> Result<()> {
    let alias = checked_identifier(schema)?;
    conn.execute(&format!("ATTACH DATABASE ?1 AS {alias}"), [target])?;
    Ok(())
}

/// `SQLite` warehouse.
///
/// Create with [`SqliteWarehouse::open`] for file-backed persistence or
/// [`SqliteWarehouse::in_memory`] for tests.
pub struct SqliteWarehouse {
    conn: Connection,
}

impl SqliteWarehouse {
    /// Open or create a warehouse at `path`, attaching one sibling database
    /// per entry of `schemas`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// [`StateError::InvalidIdentifier`] for a bad schema name, or
    /// [`StateError::Sqlite`] if a database can't be opened.
    pub fn open(path: &Path, schemas: &[&str]) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        for schema in schemas {
            let file = schema_file(path, schema);
            attach(&conn, &file.to_string_lossy(), schema)?;
        }
        tracing::debug!(path = %path.display(), ?schemas, "Opened sqlite warehouse");
        Ok(Self { conn })
    }

    /// In-memory warehouse; each schema is its own in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the database can't be initialized.
    pub fn in_memory(schemas: &[&str]) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        for schema in schemas {
            attach(&conn, ":memory:", schema)?;
        }
        Ok(Self { conn })
    }
}

impl Session for SqliteWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        run_execute(&self.conn, sql, params)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        run_query(&self.conn, sql, params)
    }

    fn batch_execute(&mut self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

impl Warehouse for SqliteWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn begin(&mut self) -> Result<Box<dyn WarehouseTx + '_>> {
        let tx = self.conn.transaction()?;
        Ok(Box::new(SqliteTx { tx }))
    }
}

/// Open `SQLite` transaction; rolls back on drop unless committed.
pub struct SqliteTx<'a> {
    tx: Transaction<'a>,
}

impl Session for SqliteTx<'_> {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        run_execute(&self.tx, sql, params)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        run_query(&self.tx, sql, params)
    }

    fn batch_execute(&mut self, sql: &str) -> Result<()> {
        self.tx.execute_batch(sql)?;
        Ok(())
    }
}

impl WarehouseTx for SqliteTx<'_> {
    fn session(&mut self) -> &mut dyn Session {
        self
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

/// Opens a plain (non-attached) `SQLite` database, for relational sources.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    path: PathBuf,
}

impl SqliteFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionFactory for SqliteFactory {
    fn connect(&self) -> Result<Box<dyn Session>> {
        let conn = Connection::open(&self.path)?;
        Ok(Box::new(SqliteWarehouse { conn }))
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}
