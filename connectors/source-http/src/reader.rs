//! Paginated-endpoint batch reader.

use serde_json::Value;
use settle_core::paging::collect_pages;
use settle_core::retry::RetryPolicy;
use settle_core::{BatchReader, PipelineError, ReadRequest, Record};
use settle_state::Session;
use settle_types::error::SourceError;
use settle_types::key::KeyValue;

use crate::page::{PageParams, PageSource};

/// Page size the delivery API serves by default.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Format of the `from` parameter.
const FROM_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// How a reader finds its place in the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Page from the offset stored in the checkpoint. Records are not
    /// filtered by key; the driver advances the stored offset by the number
    /// of admitted records.
    Offset,
    /// Send the first timestamp of the watermark as `param`; the server
    /// returns records at or after it and those not past the watermark are
    /// dropped here.
    From { param: &'static str },
}

/// Shapes one JSON object into a record.
pub type ValueMapper<R> = Box<dyn Fn(Value) -> Result<R, PipelineError>>;

/// Reads one endpoint page by page up to the batch limit.
pub struct HttpPagedReader<R> {
    source: Box<dyn PageSource>,
    path: String,
    sort_field: String,
    resume: Resume,
    page_size: usize,
    retry: RetryPolicy,
    map: ValueMapper<R>,
}

impl<R> HttpPagedReader<R> {
    pub fn new(
        source: impl PageSource + 'static,
        path: impl Into<String>,
        sort_field: impl Into<String>,
        resume: Resume,
        map: impl Fn(Value) -> Result<R, PipelineError> + 'static,
    ) -> Self {
        Self {
            source: Box::new(source),
            path: path.into(),
            sort_field: sort_field.into(),
            resume,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
            map: Box::new(map),
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn resume(&self) -> Resume {
        self.resume
    }

    fn fetch_page(&mut self, offset: u64, limit: usize, from: Option<&str>) -> Result<Vec<Value>, SourceError> {
        let mut params: PageParams = vec![
            ("sort_field", self.sort_field.clone()),
            ("sort_direction", "asc".to_string()),
        ];
        if let (Resume::From { param }, Some(from)) = (self.resume, from) {
            params.push((param, from.to_string()));
        }
        params.push(("offset", offset.to_string()));
        params.push(("limit", limit.to_string()));

        let what = format!("GET {}", self.path);
        let source = &mut self.source;
        let path = &self.path;
        let page = self.retry.run(&what, || source.fetch(path, &params))?;
        tracing::debug!(
            endpoint = %self.path,
            offset,
            records = page.len(),
            "Fetched page"
        );
        Ok(page)
    }

    fn map_all(&self, values: Vec<Value>) -> Result<Vec<R>, PipelineError> {
        values.into_iter().map(|v| (self.map)(v)).collect()
    }
}

impl<R: Record> HttpPagedReader<R> {
    fn read_by_offset(&mut self, request: &ReadRequest<'_>) -> Result<Vec<R>, PipelineError> {
        let base = request.checkpoint.offset.unwrap_or(0) + request.offset;
        let page_size = self.page_size;
        let values = collect_pages(request.limit, page_size, |offset, size| {
            self.fetch_page(base + offset, size, None)
        })?;
        self.map_all(values)
    }

    fn read_from(&mut self, request: &ReadRequest<'_>) -> Result<Vec<R>, PipelineError> {
        let after = &request.checkpoint.watermark;
        let from = match after.get(0) {
            Some(KeyValue::Timestamp(ts)) => ts.format(FROM_FMT).to_string(),
            other => {
                return Err(PipelineError::Config(format!(
                    "{}: `from` paging needs a leading timestamp key, got {other:?}",
                    self.path
                )))
            }
        };
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        let skip = usize::try_from(request.offset).unwrap_or(usize::MAX);
        let wanted = skip.saturating_add(request.limit);

        // The server orders by the leading key only, so a group of equal
        // leading keys may straddle pages in any inner order. Reading stops
        // once the server has moved past the group holding the last wanted
        // record; every record sorting below the cut is then in `kept`.
        let mut kept: Vec<R> = Vec::new();
        let mut raw_offset = 0u64;
        let mut last_seen: Option<KeyValue> = None;
        let mut boundary: Option<KeyValue> = None;
        loop {
            if boundary.is_none() && kept.len() >= wanted {
                kept.sort_by_cached_key(Record::key);
                boundary = kept[wanted - 1].key().get(0).cloned();
            }
            if let (Some(boundary), Some(seen)) = (&boundary, &last_seen) {
                if seen > boundary {
                    break;
                }
            }
            let page = self.fetch_page(raw_offset, self.page_size, Some(&from))?;
            if page.is_empty() {
                break;
            }
            raw_offset += page.len() as u64;
            for value in page {
                let record = (self.map)(value)?;
                let key = record.key();
                last_seen = key.get(0).cloned();
                if key > *after {
                    kept.push(record);
                }
            }
        }
        if raw_offset > 0 {
            tracing::debug!(
                endpoint = %self.path,
                fetched = raw_offset,
                kept = kept.len(),
                "Collected records past the watermark"
            );
        }

        kept.sort_by_cached_key(Record::key);
        Ok(kept.into_iter().skip(skip).take(request.limit).collect())
    }
}

impl<R: Record> BatchReader<R> for HttpPagedReader<R> {
    fn read(&mut self, _warehouse: &mut dyn Session, request: &ReadRequest<'_>) -> Result<Vec<R>, PipelineError> {
        match self.resume {
            Resume::Offset => self.read_by_offset(request),
            Resume::From { .. } => self.read_from(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPageSource;
    use serde_json::json;
    use settle_state::sqlite::SqliteWarehouse;
    use settle_types::checkpoint::Checkpoint;
    use settle_types::key::{parse_timestamp, Watermark};

    #[derive(Debug, Clone, PartialEq)]
    struct Courier(String);

    impl Record for Courier {
        fn key(&self) -> Watermark {
            Watermark::new(vec![KeyValue::Text(self.0.clone())])
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Delivery {
        id: String,
        ts: String,
    }

    impl Record for Delivery {
        fn key(&self) -> Watermark {
            Watermark::new(vec![
                KeyValue::Timestamp(parse_timestamp(&self.ts).unwrap()),
                KeyValue::Text(self.id.clone()),
            ])
        }
    }

    fn couriers(n: usize) -> MemoryPageSource {
        let records = (1..=n).map(|i| json!({ "_id": format!("c{i:02}"), "name": format!("courier {i}") })).collect();
        MemoryPageSource::new()
            .with_endpoint("/couriers", records)
            .with_sort_alias("id", "_id")
    }

    fn courier_reader(source: MemoryPageSource, page_size: usize) -> HttpPagedReader<Courier> {
        HttpPagedReader::new(source, "/couriers", "id", Resume::Offset, |v: Value| {
            Ok(Courier(v["_id"].as_str().unwrap_or_default().to_string()))
        })
        .with_page_size(page_size)
        .with_retry(RetryPolicy::new(3).with_base_delay(std::time::Duration::from_millis(1)))
    }

    fn read<R: Record>(reader: &mut HttpPagedReader<R>, cp: &Checkpoint, limit: usize) -> Vec<R> {
        let mut wh = SqliteWarehouse::in_memory(&[]).unwrap();
        reader
            .read(&mut wh, &ReadRequest { checkpoint: cp, offset: 0, limit })
            .unwrap()
    }

    fn offset_checkpoint(offset: u64) -> Checkpoint {
        let mut cp = Checkpoint::at(Watermark::new(vec![KeyValue::Text(String::new())]));
        cp.offset = Some(offset);
        cp
    }

    #[test]
    fn small_pages_match_one_large_read() {
        let cp = offset_checkpoint(0);
        let paged = read(&mut courier_reader(couriers(7), 2), &cp, 5);
        let single = read(&mut courier_reader(couriers(7), 5), &cp, 5);
        assert_eq!(paged.len(), 5);
        assert_eq!(paged, single);
        assert_eq!(paged.last(), Some(&Courier("c05".into())));
    }

    #[test]
    fn offset_resume_starts_after_stored_offset() {
        let cp = offset_checkpoint(5);
        let rest = read(&mut courier_reader(couriers(7), 2), &cp, 5);
        assert_eq!(rest, vec![Courier("c06".into()), Courier("c07".into())]);
    }

    #[test]
    fn transient_page_failures_are_retried() {
        let mut source = couriers(3);
        source.fail_next(SourceError::transient_network("HTTP_503", "busy"));
        source.fail_next(SourceError::rate_limit("HTTP_429", "slow down", Some(1)));
        let got = read(&mut courier_reader(source, 50), &offset_checkpoint(0), 10);
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn exhausted_retries_fail_the_read() {
        let mut source = couriers(3);
        for _ in 0..3 {
            source.fail_next(SourceError::transient_network("HTTP_503", "busy"));
        }
        let mut reader = courier_reader(source, 50);
        let mut wh = SqliteWarehouse::in_memory(&[]).unwrap();
        let cp = offset_checkpoint(0);
        let err = reader
            .read(&mut wh, &ReadRequest { checkpoint: &cp, offset: 0, limit: 10 })
            .unwrap_err();
        assert_eq!(err.as_source_error().unwrap().code, "HTTP_503");
    }

    fn deliveries(rows: &[(&str, &str)]) -> HttpPagedReader<Delivery> {
        let records = rows
            .iter()
            .map(|(id, ts)| json!({ "delivery_id": id, "delivery_ts": ts }))
            .collect();
        let source = MemoryPageSource::new()
            .with_endpoint("/deliveries", records)
            .with_from_filter("/deliveries", "delivery_ts")
            .with_sort_alias("date", "delivery_ts");
        HttpPagedReader::new(source, "/deliveries", "date", Resume::From { param: "from" }, |v: Value| {
            Ok(Delivery {
                id: v["delivery_id"].as_str().unwrap_or_default().to_string(),
                ts: v["delivery_ts"].as_str().unwrap_or_default().to_string(),
            })
        })
        .with_page_size(2)
    }

    fn at(ts: &str, id: &str) -> Checkpoint {
        Checkpoint::at(Watermark::new(vec![
            KeyValue::Timestamp(parse_timestamp(ts).unwrap()),
            KeyValue::Text(id.into()),
        ]))
    }

    #[test]
    fn from_resume_drops_records_already_loaded() {
        let mut reader = deliveries(&[
            ("d1", "2022-05-01 10:00:00"),
            ("d2", "2022-05-01 10:00:00"),
            ("d3", "2022-05-01 11:00:00"),
        ]);
        let got = read(&mut reader, &at("2022-05-01 10:00:00", "d1"), 10);
        let ids: Vec<_> = got.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d2", "d3"]);
    }

    #[test]
    fn from_resume_reads_a_timestamp_group_whole_before_cutting() {
        let mut reader = deliveries(&[
            ("d1", "2022-05-01 10:00:00"),
            ("d4", "2022-05-01 11:00:00"),
            ("d3", "2022-05-01 11:00:00"),
            ("d2", "2022-05-01 11:00:00"),
            ("d5", "2022-05-01 12:00:00"),
        ]);
        let got = read(&mut reader, &at("2000-01-01 00:00:00", ""), 2);
        let ids: Vec<_> = got.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2"]);

        let got = read(&mut reader, &at("2022-05-01 11:00:00", "d2"), 2);
        let ids: Vec<_> = got.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d3", "d4"]);
    }

    #[test]
    fn group_larger_than_page_and_limit_loses_nothing() {
        let ts = "2022-05-01 10:00:00";
        let mut reader = deliveries(&[("d5", ts), ("d4", ts), ("d3", ts), ("d1", ts), ("d2", ts)]);
        let mut cp = at("2000-01-01 00:00:00", "");
        let mut loaded = Vec::new();
        for _ in 0..5 {
            let batch = read(&mut reader, &cp, 2);
            let Some(last) = batch.last() else { break };
            cp = at(&last.ts, &last.id);
            loaded.extend(batch.into_iter().map(|d| d.id));
        }
        assert_eq!(loaded, ["d1", "d2", "d3", "d4", "d5"]);
    }

    #[test]
    fn from_resume_needs_a_timestamp_key() {
        let mut reader = deliveries(&[]);
        let mut wh = SqliteWarehouse::in_memory(&[]).unwrap();
        let cp = Checkpoint::at(Watermark::new(vec![KeyValue::Int(1)]));
        let err = reader
            .read(&mut wh, &ReadRequest { checkpoint: &cp, offset: 0, limit: 1 })
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
