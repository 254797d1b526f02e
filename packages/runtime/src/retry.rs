//! Generic retry helper for transient failures.
//!
//! Mirrors the connection-level retry loop in the data-source crate's
//! `retry::send_inner`, generalized to any fallible async operation rather
//! than just HTTP requests: a higher-order function taking the attempt
//! budget, a backoff schedule, a transient-error classifier, and the
//! operation itself.

use std::future::Future;
use std::time::Duration;

/// Retries `f` up to `attempts` additional times (so `attempts + 1` total
/// calls) while `classify_transient` says the error is worth retrying,
/// sleeping `backoff(attempt)` between tries.
///
/// Returns the first success, or the last error once attempts are
/// exhausted or the error is classified as non-transient.
pub async fn retry<T, E, F, Fut>(
    attempts: u32,
    backoff: impl Fn(u32) -> Duration,
    classify_transient: impl Fn(&E) -> bool,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= attempts || !classify_transient(&e) {
                    return Err(e);
                }
                let delay = backoff(attempt);
                log::warn!("retry {}/{attempts} in {delay:?}: {e}", attempt + 1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Exponential backoff starting at 2s, doubling each attempt (2s, 4s, 8s,
/// 16s, 32s, ...), matching the data-source crate's HTTP retry schedule.
#[must_use]
pub fn exponential_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << (attempt + 1).min(20))
}

/// Classifies a `reqwest::Error` as transient: timeouts, connection
/// failures, response-body errors, and rate-limit/server-error status codes
/// (surfaced via `.error_for_status()`) are worth retrying; permanent 4xx
/// client errors are not.
#[must_use]
pub fn is_transient_http(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request() || e.status().is_some_and(is_retryable_status)
}

/// Classifies an HTTP status code as worth retrying: 429 (rate limited)
/// and any 5xx server error.
#[must_use]
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retrying_on_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(
            3,
            |_| Duration::from_millis(0),
            |_: &&str| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            },
        )
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_attempts_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(
            2,
            |_| Duration::from_millis(0),
            |_: &&str| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
        )
        .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_non_transient_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(
            5,
            |_| Duration::from_millis(0),
            |_: &&str| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
        )
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
