//! Checkpoint documents.
//!
//! A [`Checkpoint`] is what a pipeline persists after each successful batch:
//! the watermark of the last committed record, an optional source offset for
//! endpoints that can only resume by position, and an optional stall marker
//! set while the gap filter holds the pipeline back.
//!
//! The stored form is a versioned JSON document:
//!
//! ```json
//! {"version": 1, "watermark": {"update_ts": "2022-05-01T10:00:00", "object_id": "62..."}}
//! ```
//!
//! Version-less documents (a flat map of field name to value, written by
//! earlier loaders) are still accepted on read.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::key::{parse_timestamp, KeyError, KeySchema, KeyValue, Watermark, ISO_TIMESTAMP_FMT};

/// Current checkpoint document version.
pub const CHECKPOINT_VERSION: u64 = 1;

/// Legacy documents kept the resume position under this top-level key.
const LEGACY_OFFSET_KEY: &str = "offset";

/// Marker recorded while a pipeline is blocked on a missing reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stall {
    /// Key of the first record that could not be admitted.
    pub blocked_at: Watermark,
    /// Name of the reference that failed to resolve.
    pub reference: String,
    /// When the pipeline first stopped at `blocked_at`.
    pub since: NaiveDateTime,
}

/// Persisted progress of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub watermark: Watermark,
    pub offset: Option<u64>,
    pub stall: Option<Stall>,
}

#[derive(Serialize, Deserialize)]
struct Document {
    version: u64,
    watermark: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stall: Option<StallDocument>,
}

#[derive(Serialize, Deserialize)]
struct StallDocument {
    blocked_at: Map<String, Value>,
    reference: String,
    since: String,
}

impl Checkpoint {
    /// A checkpoint holding only a watermark.
    #[must_use]
    pub fn at(watermark: Watermark) -> Self {
        Self {
            watermark,
            offset: None,
            stall: None,
        }
    }

    /// Serialize to the current document version.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if the watermark (or the stall key) does not
    /// conform to `schema`.
    pub fn encode(&self, schema: &KeySchema) -> Result<String, KeyError> {
        let stall = match &self.stall {
            Some(stall) => Some(StallDocument {
                blocked_at: encode_fields(schema, &stall.blocked_at)?,
                reference: stall.reference.clone(),
                since: stall.since.format(ISO_TIMESTAMP_FMT).to_string(),
            }),
            None => None,
        };
        let doc = Document {
            version: CHECKPOINT_VERSION,
            watermark: encode_fields(schema, &self.watermark)?,
            offset: self.offset,
            stall,
        };
        serde_json::to_string(&doc).map_err(|e| KeyError::Malformed(e.to_string()))
    }

    /// Parse a stored document.
    ///
    /// Fields missing from a legacy document take their value from
    /// `defaults`; a versioned document must carry every field.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Malformed`] for non-object JSON,
    /// [`KeyError::UnsupportedVersion`] for unknown versions, or a decode
    /// error for values that do not match the schema.
    pub fn decode(schema: &KeySchema, raw: &str, defaults: &Watermark) -> Result<Self, KeyError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| KeyError::Malformed(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(KeyError::Malformed(format!("expected an object, got {raw}")));
        };

        match map.get("version") {
            Some(version) => {
                let version = version
                    .as_u64()
                    .ok_or_else(|| KeyError::Malformed(format!("bad version {version}")))?;
                if version != CHECKPOINT_VERSION {
                    return Err(KeyError::UnsupportedVersion(version));
                }
                let doc: Document = serde_json::from_value(Value::Object(map))
                    .map_err(|e| KeyError::Malformed(e.to_string()))?;
                let stall = match doc.stall {
                    Some(stall) => Some(Stall {
                        blocked_at: decode_fields(schema, &stall.blocked_at, None)?,
                        since: parse_timestamp(&stall.since).ok_or_else(|| KeyError::Decode {
                            field: "since".into(),
                            value: stall.since.clone(),
                        })?,
                        reference: stall.reference,
                    }),
                    None => None,
                };
                Ok(Self {
                    watermark: decode_fields(schema, &doc.watermark, None)?,
                    offset: doc.offset,
                    stall,
                })
            }
            None => Ok(Self {
                watermark: decode_fields(schema, &map, Some(defaults))?,
                offset: map.get(LEGACY_OFFSET_KEY).and_then(Value::as_u64),
                stall: None,
            }),
        }
    }
}

fn encode_fields(schema: &KeySchema, watermark: &Watermark) -> Result<Map<String, Value>, KeyError> {
    schema.check(watermark)?;
    Ok(schema
        .fields()
        .iter()
        .zip(watermark.values())
        .map(|(field, value)| (field.name.clone(), value.to_json()))
        .collect())
}

fn decode_fields(
    schema: &KeySchema,
    map: &Map<String, Value>,
    defaults: Option<&Watermark>,
) -> Result<Watermark, KeyError> {
    let mut values: Vec<KeyValue> = Vec::with_capacity(schema.len());
    for (index, field) in schema.fields().iter().enumerate() {
        let value = match (map.get(&field.name), defaults) {
            (Some(raw), _) => KeyValue::from_json(&field.name, field.kind, raw)?,
            (None, Some(defaults)) => defaults
                .get(index)
                .cloned()
                .unwrap_or_else(|| field.kind.minimum()),
            (None, None) => return Err(KeyError::MissingField(field.name.clone())),
        };
        values.push(value);
    }
    Ok(Watermark::new(values))
}
