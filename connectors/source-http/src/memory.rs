//! In-memory page source.

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;
use settle_types::error::SourceError;
use settle_types::key::parse_timestamp;

#[derive(Debug, Clone, Default)]
struct Endpoint {
    records: Vec<Value>,
    /// Field compared against the `from` parameter, if the endpoint
    /// supports one.
    from_field: Option<String>,
}

/// Serves endpoints from memory with the delivery API's paging rules:
/// `sort_field`, `sort_direction`, `offset`, `limit` and optional `from`.
#[derive(Debug, Clone, Default)]
pub struct MemoryPageSource {
    endpoints: BTreeMap<String, Endpoint>,
    /// Field that `sort_field=<name>` sorts by, e.g. `id` -> `_id`.
    sort_aliases: BTreeMap<String, String>,
    failures: VecDeque<SourceError>,
    requests: Vec<String>,
}

fn field_text(record: &Value, field: &str) -> String {
    match record.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn param<'a>(params: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
}

impl MemoryPageSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `records` at `path`.
    #[must_use]
    pub fn with_endpoint(mut self, path: &str, records: Vec<Value>) -> Self {
        self.endpoints.insert(
            path.to_string(),
            Endpoint {
                records,
                from_field: None,
            },
        );
        self
    }

    /// Filter `path` to records whose `field` is at or after `from`.
    #[must_use]
    pub fn with_from_filter(mut self, path: &str, field: &str) -> Self {
        self.endpoints.entry(path.to_string()).or_default().from_field = Some(field.to_string());
        self
    }

    /// Sort by record field `field` when asked for `sort_field=name`.
    #[must_use]
    pub fn with_sort_alias(mut self, name: &str, field: &str) -> Self {
        self.sort_aliases.insert(name.to_string(), field.to_string());
        self
    }

    /// Fail the next fetch with `err`; queued failures are served in order.
    pub fn fail_next(&mut self, err: SourceError) {
        self.failures.push_back(err);
    }

    /// Append records to an endpoint, as a live API would.
    pub fn push(&mut self, path: &str, record: Value) {
        self.endpoints.entry(path.to_string()).or_default().records.push(record);
    }

    /// Every request served so far, as `path?k=v&...`.
    #[must_use]
    pub fn requests(&self) -> &[String] {
        &self.requests
    }
}

impl super::PageSource for MemoryPageSource {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn fetch(&mut self, path: &str, params: &[(&'static str, String)]) -> Result<Vec<Value>, SourceError> {
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        self.requests.push(format!("{path}?{}", query.join("&")));
        if let Some(err) = self.failures.pop_front() {
            return Err(err);
        }

        let endpoint = self
            .endpoints
            .get(path)
            .ok_or_else(|| SourceError::config("HTTP_404", format!("no endpoint {path}")))?;
        let mut records = endpoint.records.clone();

        if let (Some(field), Some(from)) = (&endpoint.from_field, param(params, "from")) {
            let from = parse_timestamp(from)
                .ok_or_else(|| SourceError::config("HTTP_400", format!("bad from {from}")))?;
            records.retain(|r| parse_timestamp(&field_text(r, field)).is_some_and(|ts| ts >= from));
        }
        if let Some(sort) = param(params, "sort_field") {
            let field = self.sort_aliases.get(sort).map_or(sort, String::as_str);
            records.sort_by_key(|r| field_text(r, field));
            if param(params, "sort_direction") == Some("desc") {
                records.reverse();
            }
        }

        let offset = param(params, "offset").and_then(|v| v.parse::<usize>().ok()).unwrap_or(0);
        let limit = param(params, "limit").and_then(|v| v.parse::<usize>().ok()).unwrap_or(50);
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageSource;
    use serde_json::json;

    fn params(offset: u64, limit: usize) -> Vec<(&'static str, String)> {
        vec![
            ("sort_field", "id".to_string()),
            ("sort_direction", "asc".to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]
    }

    #[test]
    fn sorts_and_pages() {
        let mut source = MemoryPageSource::new()
            .with_endpoint("/couriers", vec![json!({"_id": "b"}), json!({"_id": "a"}), json!({"_id": "c"})])
            .with_sort_alias("id", "_id");
        let page = source.fetch("/couriers", &params(1, 5)).unwrap();
        assert_eq!(page, vec![json!({"_id": "b"}), json!({"_id": "c"})]);
        assert_eq!(source.requests(), ["/couriers?sort_field=id&sort_direction=asc&offset=1&limit=5"]);
    }

    #[test]
    fn queued_failures_come_first() {
        let mut source = MemoryPageSource::new().with_endpoint("/couriers", vec![json!({"_id": "a"})]);
        source.fail_next(SourceError::transient_network("HTTP_503", "busy"));
        assert!(source.fetch("/couriers", &params(0, 5)).is_err());
        assert_eq!(source.fetch("/couriers", &params(0, 5)).unwrap().len(), 1);
    }

    #[test]
    fn from_filter_is_inclusive() {
        let mut source = MemoryPageSource::new()
            .with_endpoint(
                "/deliveries",
                vec![
                    json!({"delivery_id": "1", "delivery_ts": "2022-05-01 10:00:00"}),
                    json!({"delivery_id": "2", "delivery_ts": "2022-05-01 11:00:00"}),
                ],
            )
            .with_from_filter("/deliveries", "delivery_ts");
        let mut p = params(0, 5);
        p.push(("from", "2022-05-01 11:00:00".to_string()));
        assert_eq!(source.fetch("/deliveries", &p).unwrap().len(), 1);
    }
}
