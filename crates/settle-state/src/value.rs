//! Backend-neutral SQL parameter and row values.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use settle_types::key::{parse_date, parse_timestamp, KeyKind, KeyValue};

use crate::error::{Result, StateError};

/// A bind parameter or a decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl SqlValue {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for SqlValue {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<&KeyValue> for SqlValue {
    fn from(v: &KeyValue) -> Self {
        match v {
            KeyValue::Int(i) => Self::Int(*i),
            KeyValue::Text(s) => Self::Text(s.clone()),
            KeyValue::Timestamp(t) => Self::Timestamp(*t),
            KeyValue::Date(d) => Self::Date(*d),
        }
    }
}

/// One result row, addressed by column position.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    #[must_use]
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Raw value at `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Decode`] if the row is shorter than `idx + 1`.
    pub fn value(&self, idx: usize) -> Result<&SqlValue> {
        self.values.get(idx).ok_or_else(|| StateError::Decode {
            column: idx,
            expected: "a value",
            found: format!("a row of {} columns", self.values.len()),
        })
    }

    fn mismatch(idx: usize, expected: &'static str, found: &SqlValue) -> StateError {
        StateError::Decode {
            column: idx,
            expected,
            found: found.type_name().to_string(),
        }
    }

    /// # Errors
    ///
    /// Returns [`StateError::Decode`] for anything but an integer.
    pub fn get_i64(&self, idx: usize) -> Result<i64> {
        self.get_opt_i64(idx)?
            .ok_or_else(|| Self::mismatch(idx, "int", &SqlValue::Null))
    }

    /// # Errors
    ///
    /// Returns [`StateError::Decode`] for anything but an integer or null.
    pub fn get_opt_i64(&self, idx: usize) -> Result<Option<i64>> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Int(v) => Ok(Some(*v)),
            other => Err(Self::mismatch(idx, "int", other)),
        }
    }

    /// Integers are widened, so aggregates that come back as either type
    /// on different backends read the same.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Decode`] for non-numeric values.
    pub fn get_f64(&self, idx: usize) -> Result<f64> {
        self.get_opt_f64(idx)?
            .ok_or_else(|| Self::mismatch(idx, "float", &SqlValue::Null))
    }

    /// # Errors
    ///
    /// Returns [`StateError::Decode`] for non-numeric, non-null values.
    #[allow(clippy::cast_precision_loss)]
    pub fn get_opt_f64(&self, idx: usize) -> Result<Option<f64>> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Float(v) => Ok(Some(*v)),
            SqlValue::Int(v) => Ok(Some(*v as f64)),
            other => Err(Self::mismatch(idx, "float", other)),
        }
    }

    /// # Errors
    ///
    /// Returns [`StateError::Decode`] for anything but text.
    pub fn get_string(&self, idx: usize) -> Result<String> {
        self.get_opt_string(idx)?
            .ok_or_else(|| Self::mismatch(idx, "text", &SqlValue::Null))
    }

    /// # Errors
    ///
    /// Returns [`StateError::Decode`] for anything but text or null.
    pub fn get_opt_string(&self, idx: usize) -> Result<Option<String>> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(v) => Ok(Some(v.clone())),
            other => Err(Self::mismatch(idx, "text", other)),
        }
    }

    /// Accepts native timestamps and the text form `SQLite` stores.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Decode`] if the value is not a timestamp.
    pub fn get_timestamp(&self, idx: usize) -> Result<NaiveDateTime> {
        match self.value(idx)? {
            SqlValue::Timestamp(v) => Ok(*v),
            SqlValue::Text(s) => {
                parse_timestamp(s).ok_or_else(|| Self::mismatch(idx, "timestamp", &SqlValue::Text(s.clone())))
            }
            other => Err(Self::mismatch(idx, "timestamp", other)),
        }
    }

    /// # Errors
    ///
    /// Returns [`StateError::Decode`] if the value is not a date.
    pub fn get_date(&self, idx: usize) -> Result<NaiveDate> {
        match self.value(idx)? {
            SqlValue::Date(v) => Ok(*v),
            SqlValue::Timestamp(v) => Ok(v.date()),
            SqlValue::Text(s) => {
                parse_date(s).ok_or_else(|| Self::mismatch(idx, "date", &SqlValue::Text(s.clone())))
            }
            other => Err(Self::mismatch(idx, "date", other)),
        }
    }

    /// Read a comparison-key component of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Decode`] if the column does not hold `kind`.
    pub fn get_key(&self, idx: usize, kind: KeyKind) -> Result<KeyValue> {
        Ok(match kind {
            KeyKind::Int => KeyValue::Int(self.get_i64(idx)?),
            KeyKind::Text | KeyKind::ObjectId => KeyValue::Text(self.get_string(idx)?),
            KeyKind::Timestamp => KeyValue::Timestamp(self.get_timestamp(idx)?),
            KeyKind::Date => KeyValue::Date(self.get_date(idx)?),
        })
    }
}
