//! Page transport.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use serde_json::Value;
use settle_types::error::SourceError;

/// Query parameters of one page request, in order.
pub type PageParams = Vec<(&'static str, String)>;

/// Fetches one page of JSON objects from an endpoint.
pub trait PageSource {
    /// Target description, without credentials, for log lines.
    fn describe(&self) -> String;

    /// `GET <path>?<params>`; an empty body is an empty page.
    ///
    /// # Errors
    ///
    /// Returns a classified [`SourceError`]; retryable failures carry the
    /// backoff hints the caller's retry loop uses.
    fn fetch(&mut self, path: &str, params: &[(&'static str, String)]) -> Result<Vec<Value>, SourceError>;
}

impl<S: PageSource + ?Sized> PageSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn fetch(&mut self, path: &str, params: &[(&'static str, String)]) -> Result<Vec<Value>, SourceError> {
        (**self).fetch(path, params)
    }
}

/// Blocking HTTP page source with fixed headers (API key, cohort).
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: Client,
    base_url: String,
}

impl HttpPageSource {
    /// # Errors
    ///
    /// Returns a config error for an invalid header name or value, or if
    /// the client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SourceError::config("HTTP_HEADER", format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SourceError::config("HTTP_HEADER", format!("{name}: {e}")))?;
            map.insert(header, value);
        }
        let client = Client::builder()
            .default_headers(map)
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::config("HTTP_CLIENT", e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Classify a transport failure.
fn network_failure(err: &reqwest::Error) -> SourceError {
    if err.is_builder() {
        SourceError::config("HTTP_REQUEST", err.to_string())
    } else if err.is_timeout() {
        SourceError::transient_network("HTTP_TIMEOUT", err.to_string())
    } else if err.is_connect() {
        SourceError::transient_network("HTTP_CONNECT", err.to_string())
    } else {
        SourceError::transient_network("HTTP_NETWORK", err.to_string())
    }
}

/// Classify a non-success status code.
#[must_use]
pub fn classify_status(status: u16, retry_after_secs: Option<u64>, body: &str) -> SourceError {
    let code = format!("HTTP_{status}");
    let message = if body.is_empty() {
        format!("status {status}")
    } else {
        format!("status {status}: {}", body.chars().take(200).collect::<String>())
    };
    match status {
        429 => SourceError::rate_limit(code, message, retry_after_secs.map(|s| s.saturating_mul(1_000))),
        401 | 403 => SourceError::auth(code, message),
        500..=599 => SourceError::transient_network(code, message),
        _ => SourceError::config(code, message),
    }
}

/// Parse a page body: empty means no records, otherwise a JSON array of
/// objects.
///
/// # Errors
///
/// Returns a data error for anything else.
pub fn parse_page(body: &str) -> Result<Vec<Value>, SourceError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(SourceError::data(
            "HTTP_BODY",
            format!("expected a JSON array, got {}", json_kind(&other)),
        )),
        Err(e) => Err(SourceError::data("HTTP_BODY", e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl PageSource for HttpPageSource {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn fetch(&mut self, path: &str, params: &[(&'static str, String)]) -> Result<Vec<Value>, SourceError> {
        let response = self
            .client
            .get(self.url(path))
            .query(params)
            .send()
            .map_err(|e| network_failure(&e))?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().map_err(|e| network_failure(&e))?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), retry_after, &body));
        }
        parse_page(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_types::error::ErrorCategory;

    #[test]
    fn rate_limit_honours_retry_after() {
        let err = classify_status(429, Some(2), "");
        assert_eq!(err.category, ErrorCategory::RateLimit);
        assert_eq!(err.retry_after_ms, Some(2_000));
        assert!(err.retryable);
        assert_eq!(err.code, "HTTP_429");
    }

    #[test]
    fn server_errors_are_transient() {
        let err = classify_status(503, None, "busy");
        assert_eq!(err.category, ErrorCategory::TransientNetwork);
        assert!(err.retryable);
        assert_eq!(err.message, "status 503: busy");
    }

    #[test]
    fn auth_and_client_errors_are_fatal() {
        assert_eq!(classify_status(401, None, "").category, ErrorCategory::Auth);
        assert_eq!(classify_status(403, None, "").category, ErrorCategory::Auth);
        let err = classify_status(404, None, "");
        assert_eq!(err.category, ErrorCategory::Config);
        assert!(!err.retryable);
    }

    #[test]
    fn empty_body_is_an_empty_page() {
        assert!(parse_page("").unwrap().is_empty());
        assert!(parse_page("  \n").unwrap().is_empty());
        assert_eq!(parse_page(r#"[{"_id": "a"}]"#).unwrap().len(), 1);
    }

    #[test]
    fn non_array_body_is_a_data_error() {
        let err = parse_page(r#"{"error": "x"}"#).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Data);
        assert!(err.message.contains("an object"));
        assert!(parse_page("[").is_err());
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let source = HttpPageSource::new("https://api.example.com/", &BTreeMap::new(), Duration::from_secs(1)).unwrap();
        assert_eq!(source.url("/couriers"), "https://api.example.com/couriers");
        assert_eq!(source.url("deliveries"), "https://api.example.com/deliveries");
    }

    #[test]
    fn bad_header_is_a_config_error() {
        let headers = BTreeMap::from([("X Bad".to_string(), "v".to_string())]);
        let err = HttpPageSource::new("https://api.example.com", &headers, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.code, "HTTP_HEADER");
    }
}
