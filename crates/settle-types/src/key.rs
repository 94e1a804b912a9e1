//! Comparison keys and watermarks.
//!
//! Every pipeline orders its records by a tuple of typed fields described by
//! a [`KeySchema`]. A [`Watermark`] is one such tuple; watermarks compare
//! lexicographically, which is the single total order shared by readers,
//! the gap filter and the driver.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Smallest possible document-store object id (24 hex zeros).
pub const OBJECT_ID_MIN: &str = "000000000000000000000000";

/// ISO-8601 timestamp format used in checkpoint documents.
pub const ISO_TIMESTAMP_FMT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// ISO-8601 date format used in checkpoint documents.
pub const ISO_DATE_FMT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while validating or decoding key values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("watermark has {found} values but the key schema has {expected} fields")]
    Arity { expected: usize, found: usize },

    #[error("key field `{field}` expects {expected}, got {found}")]
    KindMismatch {
        field: String,
        expected: KeyKind,
        found: String,
    },

    #[error("checkpoint is missing key field `{0}`")]
    MissingField(String),

    #[error("cannot decode key field `{field}` from {value}")]
    Decode { field: String, value: String },

    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u64),

    #[error("malformed checkpoint document: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Kinds and values
// ---------------------------------------------------------------------------

/// Declared type of one comparison-key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Int,
    Text,
    /// 24-hex-digit document id; compared as text.
    ObjectId,
    Timestamp,
    Date,
}

impl KeyKind {
    /// Minimum sentinel for this kind, used when no checkpoint exists.
    #[must_use]
    pub fn minimum(self) -> KeyValue {
        match self {
            Self::Int => KeyValue::Int(-1),
            Self::Text => KeyValue::Text(String::new()),
            Self::ObjectId => KeyValue::Text(OBJECT_ID_MIN.to_string()),
            Self::Timestamp => KeyValue::Timestamp(floor_date().and_time(NaiveTime::MIN)),
            Self::Date => KeyValue::Date(floor_date()),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Text => "text",
            Self::ObjectId => "object_id",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed component of a comparison key.
///
/// Variants of different kinds never meet inside one schema, so the derived
/// cross-variant order is never observed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    Int(i64),
    Text(String),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
}

/// Temporal sentinels are pinned to `0001-01-01`; chrono's own minimum lies
/// before year 1, which neither SQL backend can store.
fn floor_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN)
}

impl KeyValue {
    /// Whether this value can be stored in a field of `kind`.
    #[must_use]
    pub fn conforms_to(&self, kind: KeyKind) -> bool {
        matches!(
            (self, kind),
            (Self::Int(_), KeyKind::Int)
                | (Self::Text(_), KeyKind::Text | KeyKind::ObjectId)
                | (Self::Timestamp(_), KeyKind::Timestamp)
                | (Self::Date(_), KeyKind::Date)
        )
    }

    /// Short type label for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Date(_) => "date",
        }
    }

    /// Encode for a checkpoint document: ints as numbers, ids as strings,
    /// temporal values as ISO-8601 strings.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(v) => Value::from(*v),
            Self::Text(v) => Value::from(v.as_str()),
            Self::Timestamp(v) => Value::from(v.format(ISO_TIMESTAMP_FMT).to_string()),
            Self::Date(v) => Value::from(v.format(ISO_DATE_FMT).to_string()),
        }
    }

    /// Decode a checkpoint document value for a field of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Decode`] when the JSON value cannot represent
    /// the declared kind.
    pub fn from_json(field: &str, kind: KeyKind, value: &Value) -> Result<Self, KeyError> {
        let decode_err = || KeyError::Decode {
            field: field.to_string(),
            value: value.to_string(),
        };
        match (kind, value) {
            (KeyKind::Int, Value::Number(n)) => n.as_i64().map(Self::Int).ok_or_else(decode_err),
            (KeyKind::Int, Value::String(s)) => {
                s.trim().parse().map(Self::Int).map_err(|_| decode_err())
            }
            (KeyKind::Text | KeyKind::ObjectId, Value::String(s)) => Ok(Self::Text(s.clone())),
            (KeyKind::Text | KeyKind::ObjectId, Value::Number(n)) => Ok(Self::Text(n.to_string())),
            (KeyKind::Timestamp, Value::String(s)) => {
                parse_timestamp(s).map(Self::Timestamp).ok_or_else(decode_err)
            }
            (KeyKind::Date, Value::String(s)) => {
                parse_date(s).map(Self::Date).ok_or_else(decode_err)
            }
            _ => Err(decode_err()),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Timestamp(v) => write!(f, "{}", v.format(ISO_TIMESTAMP_FMT)),
            Self::Date(v) => write!(f, "{}", v.format(ISO_DATE_FMT)),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NaiveDateTime> for KeyValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl From<NaiveDate> for KeyValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

/// Parse a timestamp written with either a `T` or a space separator, an
/// optional fractional part and an optional trailing `Z`. A bare date is
/// read as midnight.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim().trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| parse_date(trimmed).map(|d| d.and_time(NaiveTime::MIN)))
}

/// Parse a date, also accepting a full timestamp (its date part is kept).
#[must_use]
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, ISO_DATE_FMT)
        .ok()
        .or_else(|| trimmed.get(..10).and_then(|head| NaiveDate::parse_from_str(head, ISO_DATE_FMT).ok()))
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A named, typed field of a comparison key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyField {
    pub name: String,
    pub kind: KeyKind,
}

/// Ordered list of key fields a pipeline sorts and checkpoints by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySchema {
    fields: Vec<KeyField>,
}

impl KeySchema {
    /// Build a schema from `(name, kind)` pairs in sort order.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, KeyKind)>,
        S: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, kind)| KeyField {
                    name: name.into(),
                    kind,
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[KeyField] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The watermark a pipeline starts from when nothing is stored.
    #[must_use]
    pub fn minimum(&self) -> Watermark {
        Watermark(self.fields.iter().map(|f| f.kind.minimum()).collect())
    }

    /// Like [`minimum`](Self::minimum) but with the first temporal field
    /// seeded to `start`, so a first run skips history before that date.
    #[must_use]
    pub fn starting_at(&self, start: NaiveDate) -> Watermark {
        let mut seeded = false;
        let values = self
            .fields
            .iter()
            .map(|f| match f.kind {
                KeyKind::Timestamp if !seeded => {
                    seeded = true;
                    KeyValue::Timestamp(start.and_time(NaiveTime::MIN))
                }
                KeyKind::Date if !seeded => {
                    seeded = true;
                    KeyValue::Date(start)
                }
                kind => kind.minimum(),
            })
            .collect();
        Watermark(values)
    }

    /// Verify that `watermark` has one value of the right kind per field.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Arity`] or [`KeyError::KindMismatch`].
    pub fn check(&self, watermark: &Watermark) -> Result<(), KeyError> {
        if watermark.len() != self.fields.len() {
            return Err(KeyError::Arity {
                expected: self.fields.len(),
                found: watermark.len(),
            });
        }
        for (field, value) in self.fields.iter().zip(watermark.values()) {
            if !value.conforms_to(field.kind) {
                return Err(KeyError::KindMismatch {
                    field: field.name.clone(),
                    expected: field.kind,
                    found: value.type_name().to_string(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// A comparison-key tuple. Ordering is lexicographic over the values.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(Vec<KeyValue>);

impl Watermark {
    #[must_use]
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&KeyValue> {
        self.0.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_values(self) -> Vec<KeyValue> {
        self.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str(")")
    }
}

impl<V: Into<KeyValue>> FromIterator<V> for Watermark {
    fn from_iter<T: IntoIterator<Item = V>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn ts_oid_schema() -> KeySchema {
        KeySchema::new([("update_ts", KeyKind::Timestamp), ("object_id", KeyKind::ObjectId)])
    }

    #[test]
    fn minimum_uses_per_kind_sentinels() {
        let schema = KeySchema::new([
            ("id", KeyKind::Int),
            ("name", KeyKind::Text),
            ("oid", KeyKind::ObjectId),
            ("ts", KeyKind::Timestamp),
            ("day", KeyKind::Date),
        ]);
        let min = schema.minimum();
        assert_eq!(min.get(0), Some(&KeyValue::Int(-1)));
        assert_eq!(min.get(1), Some(&KeyValue::Text(String::new())));
        assert_eq!(min.get(2), Some(&KeyValue::Text(OBJECT_ID_MIN.into())));
        assert_eq!(min.get(3), Some(&KeyValue::Timestamp(ts("0001-01-01 00:00:00"))));
        assert_eq!(
            min.get(4),
            Some(&KeyValue::Date(NaiveDate::from_ymd_opt(1, 1, 1).unwrap()))
        );
        schema.check(&min).unwrap();
    }

    #[test]
    fn starting_at_seeds_only_first_temporal_field() {
        let schema = KeySchema::new([
            ("event_ts", KeyKind::Timestamp),
            ("id", KeyKind::Int),
            ("other_ts", KeyKind::Timestamp),
        ]);
        let start = NaiveDate::from_ymd_opt(2022, 5, 1).unwrap();
        let wm = schema.starting_at(start);
        assert_eq!(wm.get(0), Some(&KeyValue::Timestamp(ts("2022-05-01 00:00:00"))));
        assert_eq!(wm.get(1), Some(&KeyValue::Int(-1)));
        assert_eq!(wm.get(2), Some(&KeyKind::Timestamp.minimum()));
    }

    #[test]
    fn watermark_orders_lexicographically() {
        let a: Watermark = [KeyValue::from(ts("2022-01-01 10:00:00")), "b".into()]
            .into_iter()
            .collect();
        let b: Watermark = [KeyValue::from(ts("2022-01-01 10:00:00")), "c".into()]
            .into_iter()
            .collect();
        let c: Watermark = [KeyValue::from(ts("2022-01-01 10:00:01")), "a".into()]
            .into_iter()
            .collect();
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.clone().max(c.clone()), c);
    }

    #[test]
    fn check_rejects_wrong_arity_and_kind() {
        let schema = ts_oid_schema();
        let short = Watermark::new(vec![KeyValue::Int(1)]);
        assert_eq!(
            schema.check(&short),
            Err(KeyError::Arity {
                expected: 2,
                found: 1
            })
        );
        let wrong = Watermark::new(vec![KeyValue::Int(1), KeyValue::Text("x".into())]);
        assert!(matches!(
            schema.check(&wrong),
            Err(KeyError::KindMismatch { ref field, .. }) if field == "update_ts"
        ));
    }

    #[test]
    fn json_values_follow_iso_and_string_ids() {
        let t = KeyValue::Timestamp(ts("2022-03-04 05:06:07.250"));
        assert_eq!(t.to_json(), Value::from("2022-03-04T05:06:07.250"));
        let d = KeyValue::Date(NaiveDate::from_ymd_opt(2022, 3, 4).unwrap());
        assert_eq!(d.to_json(), Value::from("2022-03-04"));
        assert_eq!(KeyValue::Int(-1).to_json(), Value::from(-1));

        let back = KeyValue::from_json("update_ts", KeyKind::Timestamp, &t.to_json()).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn from_json_accepts_space_separated_timestamps() {
        let v = KeyValue::from_json(
            "update_ts",
            KeyKind::Timestamp,
            &Value::from("2022-03-04 05:06:07"),
        )
        .unwrap();
        assert_eq!(v, KeyValue::Timestamp(ts("2022-03-04T05:06:07")));
    }

    #[test]
    fn from_json_rejects_mismatched_value() {
        let err = KeyValue::from_json("id", KeyKind::Int, &Value::from("abc")).unwrap_err();
        assert!(matches!(err, KeyError::Decode { .. }));
    }

    #[test]
    fn display_renders_tuple() {
        let wm: Watermark = [KeyValue::Int(3), KeyValue::Text("x".into())]
            .into_iter()
            .collect();
        assert_eq!(wm.to_string(), "(3, x)");
    }

    proptest! {
        #[test]
        fn watermark_order_matches_tuple_order(
            a in (any::<i64>(), "[a-f0-9]{0,4}"),
            b in (any::<i64>(), "[a-f0-9]{0,4}"),
        ) {
            let wa = Watermark::new(vec![KeyValue::Int(a.0), KeyValue::Text(a.1.clone())]);
            let wb = Watermark::new(vec![KeyValue::Int(b.0), KeyValue::Text(b.1.clone())]);
            prop_assert_eq!(wa.cmp(&wb), a.cmp(&b));
        }
    }
}
