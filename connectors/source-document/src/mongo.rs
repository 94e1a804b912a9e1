//! Collection backed by a `MongoDB` server.
//!
//! The cursor filter, the key sort, `skip` and `limit` all run on the
//! server; returned documents are flattened from relaxed extended JSON the
//! same way export files are.

use mongodb::bson::{Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::FindOptions;
use mongodb::sync::{Client, Collection};
use serde_json::Value;
use settle_types::error::SourceError;

use crate::collection::{normalize, DocumentCollection};
use crate::filter::CursorFilter;

/// One collection of the order-system database.
#[derive(Debug, Clone)]
pub struct MongoCollection {
    name: String,
    collection: Collection<Document>,
}

impl MongoCollection {
    /// Connect to `uri` and open collection `name` of `database`, or of
    /// the database named in the URI path when `database` is `None`.
    /// TLS options such as `tlsCAFile` go in the URI.
    ///
    /// # Errors
    ///
    /// Returns a config error for an unparsable URI or when no database is
    /// named anywhere.
    pub fn connect(uri: &str, database: Option<&str>, name: impl Into<String>) -> Result<Self, SourceError> {
        let name = name.into();
        let client = Client::with_uri_str(uri).map_err(|e| classify(&e))?;
        let db = match database {
            Some(db) => client.database(db),
            None => client.default_database().ok_or_else(|| {
                SourceError::config("MONGO_NO_DATABASE", "the MongoDB URI names no database")
            })?,
        };
        tracing::debug!(database = %db.name(), collection = %name, "Opened MongoDB collection");
        Ok(Self {
            collection: db.collection(&name),
            name,
        })
    }
}

impl DocumentCollection for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&mut self, filter: &CursorFilter, skip: u64, limit: usize) -> Result<Vec<Value>, SourceError> {
        let mut options = FindOptions::default();
        options.sort = Some(sort_document(filter));
        options.skip = Some(skip);
        options.limit = Some(i64::try_from(limit).unwrap_or(i64::MAX));

        let cursor = self
            .collection
            .find(filter_document(filter)?, options)
            .map_err(|e| classify(&e))?;
        cursor
            .map(|doc| {
                let doc = doc.map_err(|e| classify(&e))?;
                Ok(normalize(Bson::Document(doc).into_relaxed_extjson()))
            })
            .collect()
    }
}

/// The cursor filter as a BSON query document.
///
/// # Errors
///
/// Returns an internal error if the extended JSON does not convert, e.g. an
/// object id that is not 24 hex digits.
pub fn filter_document(filter: &CursorFilter) -> Result<Document, SourceError> {
    match Bson::try_from(filter.to_mongo()) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(SourceError::internal(
            "MONGO_FILTER",
            format!("filter is not a document: {other}"),
        )),
        Err(e) => Err(SourceError::internal("MONGO_FILTER", e.to_string())),
    }
}

/// Ascending sort on the key fields, in key order.
#[must_use]
pub fn sort_document(filter: &CursorFilter) -> Document {
    filter
        .sort()
        .into_iter()
        .map(|(field, direction)| (field.to_string(), Bson::Int32(direction)))
        .collect()
}

fn classify(err: &MongoError) -> SourceError {
    match err.kind.as_ref() {
        ErrorKind::Authentication { .. } => SourceError::auth("MONGO_AUTH", err.to_string()),
        ErrorKind::InvalidArgument { .. } => SourceError::config("MONGO_CONFIG", err.to_string()),
        ErrorKind::BsonDeserialization(_) => SourceError::data("MONGO_DOCUMENT", err.to_string()),
        _ => SourceError::transient_db("MONGO_UNAVAILABLE", err.to_string()),
    }
}
