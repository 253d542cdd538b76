//! Retry classification and backoff schedule
//!
//! Retries are reserved for failures a later attempt can plausibly fix:
//! transport hiccups and upstream outages. Authentication, missing resources
//! and quota exhaustion are terminal. A 401 is never retried here; the
//! executor handles it with a single token-recovery attempt.

use std::time::Duration;

use crate::error::{Error, TransportKind};

/// Upper bound for a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Bounded exponential retry policy used by `RequestExecutor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each following retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Policy that retries without sleeping, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `MAX_BACKOFF`. Retry 0 means "first attempt" and never waits.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        if retry == 0 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Whether a failed attempt with this error should be retried.
pub fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Transport { kind, .. } => !matches!(kind, TransportKind::Other),
        Error::ServiceUnavailable { .. } => true,
        Error::Validation { .. }
        | Error::Auth { .. }
        | Error::NotFound { .. }
        | Error::QuotaExceeded { .. }
        | Error::Service { .. }
        | Error::Http { .. }
        | Error::TokenParse(_)
        | Error::Cancelled
        | Error::DeadlineExceeded
        | Error::Batch { .. }
        | Error::Config(_) => false,
    }
}

/// Whether a response with this status should be retried.
///
/// 408 and the 5xx gateway/server family are transient. Everything else,
/// including 401, 404 and 429, is decided elsewhere.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 500 | 502 | 503 | 504)
}
