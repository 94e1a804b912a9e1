//! Ordered-query batch reader.

use std::sync::Arc;

use settle_core::{BatchReader, PipelineError, ReadRequest};
use settle_state::{Row, Session, SessionFactory, StateError};
use settle_types::error::SourceError;

use crate::keyset::KeysetQuery;

/// Shapes one result row into a record.
pub type RowMapper<R> = Box<dyn Fn(&Row) -> Result<R, PipelineError>>;

/// Where the query runs.
pub enum SqlSource {
    /// Inside the destination transaction (staging to dimensions, marts).
    Warehouse,
    /// On a separate relational source, connected once per invocation.
    External(Arc<dyn SessionFactory>),
}

/// Classify a failure on an external relational source.
pub(crate) fn source_failure(code: &str, err: &StateError) -> PipelineError {
    match err {
        StateError::Decode { .. } | StateError::UnsupportedType { .. } => {
            PipelineError::Source(SourceError::data(code, err.to_string()))
        }
        _ => PipelineError::Source(SourceError::transient_db(code, err.to_string())),
    }
}

/// Reads records in key order with a keyset predicate past the checkpoint.
pub struct SqlBatchReader<R> {
    source: SqlSource,
    query: KeysetQuery,
    map: RowMapper<R>,
    connection: Option<Box<dyn Session>>,
}

impl<R> SqlBatchReader<R> {
    pub fn new(
        source: SqlSource,
        query: KeysetQuery,
        map: impl Fn(&Row) -> Result<R, PipelineError> + 'static,
    ) -> Self {
        Self {
            source,
            query,
            map: Box::new(map),
            connection: None,
        }
    }

    /// Reader over a table or view reachable from the warehouse.
    pub fn over_warehouse(
        query: KeysetQuery,
        map: impl Fn(&Row) -> Result<R, PipelineError> + 'static,
    ) -> Self {
        Self::new(SqlSource::Warehouse, query, map)
    }

    /// Reader over a relational source opened through `factory`.
    pub fn over_source(
        factory: Arc<dyn SessionFactory>,
        query: KeysetQuery,
        map: impl Fn(&Row) -> Result<R, PipelineError> + 'static,
    ) -> Self {
        Self::new(SqlSource::External(factory), query, map)
    }

    #[must_use]
    pub fn query(&self) -> &KeysetQuery {
        &self.query
    }

    fn fetch(&mut self, warehouse: &mut dyn Session, request: &ReadRequest<'_>) -> Result<Vec<Row>, PipelineError> {
        let sql = self.query.sql();
        let params = self
            .query
            .params(&request.checkpoint.watermark, request.limit, request.offset)?;
        match &self.source {
            SqlSource::Warehouse => Ok(warehouse.query(&sql, &params)?),
            SqlSource::External(factory) => {
                if self.connection.is_none() {
                    let session = factory
                        .connect()
                        .map_err(|e| source_failure("SOURCE_CONNECT", &e))?;
                    tracing::debug!(source = %factory.describe(), "Opened source connection");
                    self.connection = Some(session);
                }
                let Some(session) = self.connection.as_mut() else {
                    return Ok(Vec::new());
                };
                session
                    .query(&sql, &params)
                    .map_err(|e| source_failure("SOURCE_QUERY", &e))
            }
        }
    }
}

impl<R> BatchReader<R> for SqlBatchReader<R> {
    fn read(&mut self, warehouse: &mut dyn Session, request: &ReadRequest<'_>) -> Result<Vec<R>, PipelineError> {
        let rows = self.fetch(warehouse, request)?;
        rows.iter().map(|row| (self.map)(row)).collect()
    }

    fn release(&mut self) {
        if self.connection.take().is_some() {
            tracing::debug!("Closed source connection");
        }
    }
}
