//! Filtered-cursor batch reader.

use serde_json::Value;
use settle_core::retry::RetryPolicy;
use settle_core::{BatchReader, PipelineError, ReadRequest};
use settle_state::Session;
use settle_types::key::KeySchema;

use crate::collection::DocumentCollection;
use crate::filter::CursorFilter;

/// Shapes one document into a record.
pub type DocumentMapper<R> = Box<dyn Fn(Value) -> Result<R, PipelineError>>;

/// Reads documents past the checkpoint in key order.
pub struct DocumentBatchReader<R> {
    collection: Box<dyn DocumentCollection>,
    schema: KeySchema,
    map: DocumentMapper<R>,
    retry: RetryPolicy,
}

impl<R> DocumentBatchReader<R> {
    /// `schema` names the document fields of the key, e.g.
    /// `(update_ts, _id)`.
    pub fn new(
        collection: impl DocumentCollection + 'static,
        schema: KeySchema,
        map: impl Fn(Value) -> Result<R, PipelineError> + 'static,
    ) -> Self {
        Self {
            collection: Box::new(collection),
            schema,
            map: Box::new(map),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl<R> BatchReader<R> for DocumentBatchReader<R> {
    fn read(&mut self, _warehouse: &mut dyn Session, request: &ReadRequest<'_>) -> Result<Vec<R>, PipelineError> {
        let filter = CursorFilter::after(&self.schema, &request.checkpoint.watermark)?;
        tracing::debug!(
            collection = %self.collection.name(),
            filter = %filter.to_mongo(),
            limit = request.limit,
            "Querying collection"
        );
        let name = self.collection.name().to_string();
        let collection = &mut self.collection;
        let docs = self.retry.run(&name, || {
            collection.find(&filter, request.offset, request.limit)
        })?;
        docs.into_iter().map(|doc| (self.map)(doc)).collect()
    }

    fn release(&mut self) {
        self.collection.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use serde_json::json;
    use settle_state::sqlite::SqliteWarehouse;
    use settle_types::checkpoint::Checkpoint;
    use settle_types::key::KeyKind;

    fn reader() -> DocumentBatchReader<String> {
        let docs = vec![
            json!({ "_id": { "$oid": "c" }, "update_ts": { "$date": "2022-05-01T10:00:00Z" } }),
            json!({ "_id": { "$oid": "a" }, "update_ts": { "$date": "2022-05-01T11:00:00Z" } }),
            json!({ "_id": { "$oid": "b" }, "update_ts": { "$date": "2022-05-01T10:00:00Z" } }),
        ];
        DocumentBatchReader::new(
            MemoryCollection::new("users", docs),
            KeySchema::new([("update_ts", KeyKind::Timestamp), ("_id", KeyKind::ObjectId)]),
            |doc: Value| {
                doc.get("_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| PipelineError::record("missing _id"))
            },
        )
    }

    #[test]
    fn reads_in_key_order_with_offset_and_limit() {
        let mut wh = SqliteWarehouse::in_memory(&[]).unwrap();
        let mut reader = reader();
        let cp = Checkpoint::at(reader.schema.minimum());
        let first = reader
            .read(&mut wh, &ReadRequest { checkpoint: &cp, offset: 0, limit: 2 })
            .unwrap();
        assert_eq!(first, vec!["b", "c"]);
        let rest = reader
            .read(&mut wh, &ReadRequest { checkpoint: &cp, offset: 2, limit: 2 })
            .unwrap();
        assert_eq!(rest, vec!["a"]);
    }
}
