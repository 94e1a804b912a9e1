//! Document collections.

use std::path::{Path, PathBuf};

use chrono::DateTime;
use serde_json::{Map, Value};
use settle_types::error::SourceError;
use settle_types::key::{Watermark, ISO_TIMESTAMP_FMT};

use crate::filter::CursorFilter;

/// A queryable set of documents.
pub trait DocumentCollection {
    /// Collection name, for log lines.
    fn name(&self) -> &str;

    /// Documents matching `filter`, sorted ascending by its key fields,
    /// skipping `skip` and returning at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns a classified [`SourceError`] when the store cannot be read.
    fn find(&mut self, filter: &CursorFilter, skip: u64, limit: usize) -> Result<Vec<Value>, SourceError>;

    /// Drop anything cached for the current invocation.
    fn release(&mut self) {}
}

impl<C: DocumentCollection + ?Sized> DocumentCollection for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn find(&mut self, filter: &CursorFilter, skip: u64, limit: usize) -> Result<Vec<Value>, SourceError> {
        (**self).find(filter, skip, limit)
    }

    fn release(&mut self) {
        (**self).release();
    }
}

/// Rewrite `MongoDB` extended JSON into plain values: `{"$oid": x}` becomes
/// `x`, `{"$date": ...}` an ISO-8601 string, `{"$numberLong": n}` a number.
#[must_use]
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(flat) = unwrap_extended(&map) {
                return flat;
            }
            Value::Object(map.into_iter().map(|(k, v)| (k, normalize(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

/// The plain value of a single-key extended-JSON wrapper, if `map` is one.
fn unwrap_extended(map: &Map<String, Value>) -> Option<Value> {
    if map.len() != 1 {
        return None;
    }
    let (key, inner) = map.iter().next()?;
    match key.as_str() {
        "$oid" => Some(inner.clone()),
        "$date" => normalize_date(inner),
        "$numberLong" | "$numberInt" => inner.as_str()?.parse::<i64>().ok().map(Value::from),
        "$numberDouble" | "$numberDecimal" => inner.as_str()?.parse::<f64>().ok().map(Value::from),
        _ => None,
    }
}

fn normalize_date(inner: &Value) -> Option<Value> {
    let millis = match inner {
        Value::String(s) => return Some(Value::from(s.as_str())),
        Value::Number(n) => n.as_i64()?,
        Value::Object(m) => m.get("$numberLong")?.as_str()?.parse::<i64>().ok()?,
        _ => return None,
    };
    let ts = DateTime::from_timestamp_millis(millis)?.naive_utc();
    Some(Value::from(ts.format(ISO_TIMESTAMP_FMT).to_string()))
}

/// Apply `filter`, key order, `skip` and `limit` to a document set.
fn select(docs: &[Value], filter: &CursorFilter, skip: u64, limit: usize) -> Result<Vec<Value>, SourceError> {
    let mut keyed: Vec<(Watermark, &Value)> = Vec::new();
    for doc in docs {
        let key = filter
            .key_of(doc)
            .map_err(|e| SourceError::data("DOCUMENT_KEY", e.to_string()))?;
        if key > *filter.watermark() {
            keyed.push((key, doc));
        }
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyed
        .into_iter()
        .skip(usize::try_from(skip).unwrap_or(usize::MAX))
        .take(limit)
        .map(|(_, doc)| doc.clone())
        .collect())
}

/// Collection held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    name: String,
    docs: Vec<Value>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>, docs: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            docs: docs.into_iter().map(normalize).collect(),
        }
    }

    pub fn insert(&mut self, doc: Value) {
        self.docs.push(normalize(doc));
    }
}

impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&mut self, filter: &CursorFilter, skip: u64, limit: usize) -> Result<Vec<Value>, SourceError> {
        select(&self.docs, filter, skip, limit)
    }
}

/// Collection exported with `mongoexport --jsonArray` to
/// `<dir>/<name>.json`; read once per invocation.
#[derive(Debug, Clone)]
pub struct JsonDirCollection {
    name: String,
    path: PathBuf,
    loaded: Option<Vec<Value>>,
}

impl JsonDirCollection {
    pub fn new(dir: &Path, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: dir.join(format!("{name}.json")),
            name,
            loaded: None,
        }
    }

    fn load(&self) -> Result<Vec<Value>, SourceError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            SourceError::config(
                "COLLECTION_UNREADABLE",
                format!("{}: {e}", self.path.display()),
            )
        })?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(docs)) => Ok(docs.into_iter().map(normalize).collect()),
            Ok(_) => Err(SourceError::data(
                "COLLECTION_FORMAT",
                format!("{}: expected a JSON array", self.path.display()),
            )),
            Err(e) => Err(SourceError::data(
                "COLLECTION_FORMAT",
                format!("{}: {e}", self.path.display()),
            )),
        }
    }
}

impl DocumentCollection for JsonDirCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&mut self, filter: &CursorFilter, skip: u64, limit: usize) -> Result<Vec<Value>, SourceError> {
        if self.loaded.is_none() {
            let docs = self.load()?;
            tracing::debug!(
                collection = %self.name,
                path = %self.path.display(),
                documents = docs.len(),
                "Loaded collection export"
            );
            self.loaded = Some(docs);
        }
        select(self.loaded.as_deref().unwrap_or_default(), filter, skip, limit)
    }

    fn release(&mut self) {
        self.loaded = None;
    }
}
