//! Bounded retry with exponential backoff for source reads.
//!
//! Only page-level source fetches are retried, locally inside a reader. The
//! driver itself never retries: a failed invocation is re-run by the
//! scheduler.

use std::time::Duration;

use settle_types::error::{BackoffClass, SourceError};

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Compute retry delay based on error hints and attempt number (1-based).
#[must_use]
pub fn compute_backoff(err: &SourceError, attempt: u32) -> Duration {
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms);
    }
    let base_ms = match err.backoff_class {
        BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
        BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
        BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
    };
    exponential(base_ms, attempt, BACKOFF_MAX_MS)
}

fn exponential(base_ms: u64, attempt: u32, cap_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    Duration::from_millis(delay_ms.min(cap_ms))
}

/// How many times, and how patiently, to retry a retryable source error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `1` disables retries.
    pub max_attempts: u32,
    /// Overrides the backoff-class base delay when set.
    pub base_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: None,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: None,
        }
    }

    #[must_use]
    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.base_delay = Some(base);
        self
    }

    /// Delay before attempt `attempt + 1` after `err` failed attempt
    /// `attempt`.
    #[must_use]
    pub fn delay_for(&self, err: &SourceError, attempt: u32) -> Duration {
        match (err.retry_after_ms, self.base_delay) {
            (None, Some(base)) => {
                let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
                exponential(base_ms, attempt, BACKOFF_MAX_MS)
            }
            _ => compute_backoff(err, attempt),
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns the last error seen.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Result<T, SourceError>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable && attempt < self.max_attempts => {
                    let delay = self.delay_for(&err, attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying source read after transient failure"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    if err.retryable {
                        tracing::error!(
                            operation = what,
                            attempts = attempt,
                            error = %err,
                            "Source read retries exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}
