//! `PostgreSQL`-backed warehouse and source sessions.
//!
//! Uses the synchronous `postgres` client; each pipeline invocation opens
//! its own connection and drops it when the invocation ends.

use std::error::Error;

use ::postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use ::postgres::{Client, NoTls, Transaction};
use bytes::BytesMut;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::dialect::Dialect;
use crate::error::{Result, StateError};
use crate::session::{Session, SessionFactory, Warehouse, WarehouseTx};
use crate::value::{Row, SqlValue};

type BoxError = Box<dyn Error + Sync + Send>;

impl ToSql for SqlValue {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Int(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Self::Float(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Self::Text(v) => v.to_sql(ty, out),
            Self::Timestamp(v) => v.to_sql(ty, out),
            Self::Date(v) => v.to_sql(ty, out),
            Self::Time(v) => v.to_sql(ty, out),
        }
    }

    // Narrowing and widening happen in `to_sql`; the server reports a type
    // error for anything that is still incompatible.
    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn decode_row(row: &::postgres::Row) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?
                .map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?
                .map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?.into()
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)?
                .map_or(SqlValue::Null, |v| SqlValue::Float(f64::from(v)))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)?.into()
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)?
                .map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v)))
        } else if [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME].contains(ty) {
            row.try_get::<_, Option<String>>(idx)?.into()
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<NaiveDateTime>>(idx)?.into()
        } else if *ty == Type::DATE {
            row.try_get::<_, Option<NaiveDate>>(idx)?.into()
        } else if *ty == Type::TIME {
            row.try_get::<_, Option<NaiveTime>>(idx)?.into()
        } else {
            return Err(StateError::UnsupportedType {
                column: column.name().to_string(),
                type_name: ty.name().to_string(),
            });
        };
        values.push(value);
    }
    Ok(Row::new(values))
}

fn bind(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// Describe a connection string without its password, for log lines.
fn redact(conninfo: &str) -> String {
    conninfo
        .split_whitespace()
        .map(|pair| {
            if pair.starts_with("password=") {
                "password=***"
            } else {
                pair
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `PostgreSQL` warehouse over a single client connection.
pub struct PostgresWarehouse {
    client: Client,
}

impl PostgresWarehouse {
    /// Connect with a libpq-style connection string.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Postgres`] if the connection fails.
    pub fn connect(conninfo: &str) -> Result<Self> {
        let client = Client::connect(conninfo, NoTls)?;
        tracing::debug!(target_db = %redact(conninfo), "Connected to postgres");
        Ok(Self { client })
    }
}

impl Session for PostgresWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        Ok(self.client.execute(sql, &bind(params))?)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.client
            .query(sql, &bind(params))?
            .iter()
            .map(decode_row)
            .collect()
    }

    fn batch_execute(&mut self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql)?;
        Ok(())
    }
}

impl Warehouse for PostgresWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn begin(&mut self) -> Result<Box<dyn WarehouseTx + '_>> {
        let tx = self.client.transaction()?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

/// Open `PostgreSQL` transaction; rolls back on drop unless committed.
pub struct PostgresTx<'a> {
    tx: Transaction<'a>,
}

impl Session for PostgresTx<'_> {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        Ok(self.tx.execute(sql, &bind(params))?)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.tx
            .query(sql, &bind(params))?
            .iter()
            .map(decode_row)
            .collect()
    }

    fn batch_execute(&mut self, sql: &str) -> Result<()> {
        self.tx.batch_execute(sql)?;
        Ok(())
    }
}

impl WarehouseTx for PostgresTx<'_> {
    fn session(&mut self) -> &mut dyn Session {
        self
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

/// Opens `PostgreSQL` sessions from a connection string.
#[derive(Debug, Clone)]
pub struct PostgresFactory {
    conninfo: String,
}

impl PostgresFactory {
    pub fn new(conninfo: impl Into<String>) -> Self {
        Self {
            conninfo: conninfo.into(),
        }
    }
}

impl SessionFactory for PostgresFactory {
    fn connect(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(PostgresWarehouse::connect(&self.conninfo)?))
    }

    fn describe(&self) -> String {
        format!("postgres:{}", redact(&self.conninfo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_hides_password() {
        assert_eq!(
            redact("host=localhost user=etl password=secret dbname=de"),
            "host=localhost user=etl password=*** dbname=de"
        );
    }

    #[test]
    fn factory_description_is_redacted() {
        let factory = PostgresFactory::new("host=db password=hunter2");
        assert_eq!(factory.describe(), "postgres:host=db password=***");
    }

    fn test_url() -> String {
        std::env::var("TEST_POSTGRES_URL").expect("TEST_POSTGRES_URL must be set")
    }

    #[test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    fn values_round_trip_through_postgres() {
        let mut wh = PostgresWarehouse::connect(&test_url()).unwrap();
        wh.batch_execute(
            "CREATE TEMP TABLE rt (i INT4, f DOUBLE PRECISION, t TEXT, ts TIMESTAMP, d DATE)",
        )
        .unwrap();
        let ts = NaiveDate::from_ymd_opt(2022, 5, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        wh.execute(
            "INSERT INTO rt VALUES ($1, $2, $3, $4, $5)",
            &[
                SqlValue::Int(3),
                SqlValue::Float(1.5),
                SqlValue::from("x"),
                SqlValue::Timestamp(ts),
                SqlValue::Date(ts.date()),
            ],
        )
        .unwrap();
        let row = wh.query_opt("SELECT i, f, t, ts, d FROM rt", &[]).unwrap().unwrap();
        assert_eq!(row.get_i64(0).unwrap(), 3);
        assert_eq!(row.get_string(2).unwrap(), "x");
        assert_eq!(row.get_timestamp(3).unwrap(), ts);
        assert_eq!(row.get_date(4).unwrap(), ts.date());
    }

    #[test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    fn dropped_transaction_rolls_back() {
        let mut wh = PostgresWarehouse::connect(&test_url()).unwrap();
        wh.batch_execute("CREATE TEMP TABLE rb (v INT8)").unwrap();
        {
            let mut tx = wh.begin().unwrap();
            tx.execute("INSERT INTO rb VALUES ($1)", &[SqlValue::Int(1)])
                .unwrap();
        }
        assert!(wh.query("SELECT v FROM rb", &[]).unwrap().is_empty());
    }
}
