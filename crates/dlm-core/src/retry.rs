//! Shared backoff policy and error classification, used by [`crate::worker`]
//! for segment retries and by [`crate::probe`] for HEAD/range-probe retries.

use std::time::Duration;

/// Exponential backoff with a cap, matching §4.3 step 4:
/// `250ms * 2^attempt`, capped at 30s, ±20% jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Classification of a transport failure, independent of which leg
/// (worker segment fetch, probe) produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Throttled,
    Connection,
    Http5xx(u16),
    Other,
}

impl RetryPolicy {
    /// `attempt` is 1-based (the attempt that just failed).
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        if matches!(kind, ErrorKind::Other) {
            // Non-retryable classification (e.g. 4xx other than 408/429):
            // callers should have already filtered this out via
            // `classify_http_status`, but be defensive.
            return RetryDecision::NoRetry;
        }
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
        let raw = self.base_delay.saturating_mul(exp);
        let capped = raw.min(self.max_delay);
        RetryDecision::RetryAfter(capped)
    }
}

/// Apply ±20% jitter to a computed delay. Separate from `decide` so tests
/// can assert on the un-jittered backoff curve.
pub fn jitter(delay: Duration, jitter_fraction: f64, random_unit: f64) -> Duration {
    // random_unit in [0,1) maps to a multiplier in
    // [1 - jitter_fraction, 1 + jitter_fraction].
    let factor = 1.0 - jitter_fraction + 2.0 * jitter_fraction * random_unit;
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}

pub fn classify_http_status(status: u32) -> ErrorKind {
    match status {
        429 | 503 => ErrorKind::Throttled,
        408 => ErrorKind::Timeout,
        500..=599 => ErrorKind::Http5xx(status as u16),
        _ => ErrorKind::Other,
    }
}

/// §4.1: retryable transport error kinds are
/// `Resolve/Connect/Tls/Timeout/ServerClosed` and 5xx; `RangeRejected` and
/// 4xx (except 408/429) are not.
pub fn classify_curl_error(err: &curl::Error) -> ErrorKind {
    if err.is_operation_timedout() {
        ErrorKind::Timeout
    } else if err.is_couldnt_connect()
        || err.is_couldnt_resolve_host()
        || err.is_couldnt_resolve_proxy()
        || err.is_ssl_connect_error()
        || err.is_recv_error()
        || err.is_send_error()
        || err.is_got_nothing()
    {
        ErrorKind::Connection
    } else {
        ErrorKind::Other
    }
}
