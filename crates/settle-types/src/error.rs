//! Classified source error model.
//!
//! Readers report failures as [`SourceError`], which carries enough retry
//! metadata for the bounded retry loop around page fetches to decide
//! whether and how long to wait.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    #[error("config")]
    Config,
    #[error("auth")]
    Auth,
    #[error("rate_limit")]
    RateLimit,
    #[error("transient_network")]
    TransientNetwork,
    #[error("transient_db")]
    TransientDb,
    #[error("data")]
    Data,
    #[error("internal")]
    Internal,
}

/// Base delay class for exponential backoff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    Fast,
    Normal,
    Slow,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error(
    "[{category}] {code} ({retryability}): {message}",
    retryability = if *.retryable { "retryable" } else { "fatal" }
)]
pub struct SourceError {
    pub category: ErrorCategory,
    /// SCREAMING_SNAKE_CASE error code.
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
}

impl SourceError {
    fn fatal(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable: false,
            retry_after_ms: None,
            backoff_class: BackoffClass::Normal,
        }
    }

    /// Configuration error (not retryable).
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::fatal(ErrorCategory::Config, code, message)
    }

    /// Authentication error (not retryable).
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::fatal(ErrorCategory::Auth, code, message)
    }

    /// Malformed source data (not retryable).
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::fatal(ErrorCategory::Data, code, message)
    }

    /// Unexpected failure inside a reader (not retryable).
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::fatal(ErrorCategory::Internal, code, message)
    }

    /// Rate limit error (retryable, slow backoff).
    pub fn rate_limit(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        Self {
            category: ErrorCategory::RateLimit,
            code: code.into(),
            message: message.into(),
            retryable: true,
            retry_after_ms,
            backoff_class: BackoffClass::Slow,
        }
    }

    /// Transient network error (retryable, fast backoff).
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::TransientNetwork,
            code: code.into(),
            message: message.into(),
            retryable: true,
            retry_after_ms: None,
            backoff_class: BackoffClass::Fast,
        }
    }

    /// Transient database error (retryable, normal backoff).
    pub fn transient_db(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::TransientDb,
            code: code.into(),
            message: message.into(),
            retryable: true,
            retry_after_ms: None,
            backoff_class: BackoffClass::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category_code_and_retryability() {
        let err = SourceError::transient_network("HTTP_503", "service unavailable");
        assert_eq!(
            err.to_string(),
            "[transient_network] HTTP_503 (retryable): service unavailable"
        );
        let err = SourceError::config("BAD_URL", "no scheme");
        assert_eq!(err.to_string(), "[config] BAD_URL (fatal): no scheme");
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = SourceError::rate_limit("HTTP_429", "slow down", Some(250));
        assert!(err.retryable);
        assert_eq!(err.retry_after_ms, Some(250));
        assert_eq!(err.backoff_class, BackoffClass::Slow);
    }

    #[test]
    fn fatal_factories_are_not_retryable() {
        assert!(!SourceError::auth("HTTP_401", "denied").retryable);
        assert!(!SourceError::data("BAD_JSON", "eof").retryable);
        assert!(!SourceError::internal("BUG", "x").retryable);
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::TransientNetwork).unwrap();
        assert_eq!(json, "\"transient_network\"");
    }
}
