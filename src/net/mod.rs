//! C3: a small protocol-agnostic retry+pacing wrapper shared by the
//! transcription and summarization drivers. Grounded in
//! `original_source/transcription/openai.py`'s `_RateLimiter`/
//! `_select_retry_delay`/`_parse_retry_after_seconds` (numeric-or-HTTP-date),
//! restructured around a reusable `RetryCaller` rather than duplicating the
//! loop in each driver, and on the teacher's `reqwest`-client-builder idiom
//! in `ffui_core/tools/download/net.rs`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RetrySettings;

/// HTTP statuses that are retried per §4.3/GLOSSARY.
pub const RETRIABLE_STATUS: [u16; 7] = [408, 409, 429, 500, 502, 503, 504];

pub fn is_retriable_status(status: u16) -> bool {
    RETRIABLE_STATUS.contains(&status)
}

/// Per-caller-instance single-process rate gate: enforces a minimum interval
/// between the *starts* of consecutive attempts. Shared (via `Arc`) across
/// fanned-out chunk requests so the overall ceiling is enforced process-wide
/// for that caller, per §4.3/§5.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_started_at: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: Option<u32>) -> Self {
        let min_interval = match requests_per_minute {
            Some(rpm) if rpm > 0 => Duration::from_secs_f64(60.0 / rpm as f64),
            _ => Duration::ZERO,
        };
        Self {
            min_interval,
            last_started_at: Mutex::new(None),
        }
    }

    /// Sleeps until at least `min_interval` has elapsed since the previous
    /// acquisition, then records the current time as the new baseline.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_started_at.lock().await;
        let now = Instant::now();
        if let Some(previous) = *last {
            let elapsed = now.duration_since(previous);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                tracing::debug!(wait_secs = wait.as_secs_f64(), "rate limiter waiting");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// The outcome of one attempt, used to decide whether a retry is warranted
/// and to compute the retry delay.
pub enum AttemptOutcome<T> {
    Success(T),
    /// A transport-level error (no status code) — always retriable until
    /// attempts are exhausted.
    TransportError(String),
    /// An HTTP error response carrying a status and an optional
    /// `Retry-After` header value (as received, numeric seconds or an
    /// HTTP-date string).
    HttpError {
        status: u16,
        message: String,
        retry_after: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RetryExhausted {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http error (status {status}): {message}")]
    Http { status: u16, message: String },
}

/// Parses a `Retry-After` header value as either a number of seconds or an
/// HTTP-date (RFC 2822), returning `None` for a past/invalid date.
pub fn parse_retry_after(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(seconds) = trimmed.parse::<f64>() {
        return if seconds < 0.0 { None } else { Some(seconds) };
    }
    let parsed = chrono::DateTime::parse_from_rfc2822(trimmed).ok()?;
    let now = chrono::Utc::now();
    let delta = (parsed.with_timezone(&chrono::Utc) - now).num_milliseconds() as f64 / 1000.0;
    if delta <= 0.0 {
        None
    } else {
        Some(delta)
    }
}

/// Computes the delay before attempt `attempt + 1`, given that `attempt` 1-based
/// just failed: `base * 2^(attempt-1)`, raised to `Retry-After` when present,
/// then capped.
pub fn select_retry_delay(attempt: u32, retry: &RetrySettings, retry_after: Option<f64>) -> Duration {
    let base_delay = retry.retry_backoff_seconds * 2f64.powi(attempt as i32 - 1);
    let mut delay = base_delay;
    if let Some(ra) = retry_after {
        delay = delay.max(ra);
    }
    if let Some(cap) = retry.max_retry_backoff_seconds {
        delay = delay.min(cap);
    }
    Duration::from_secs_f64(delay.max(0.0))
}

/// Drives the retry+rate-limit loop around a caller-supplied thunk. `call`
/// is invoked once per attempt and must report its outcome via
/// `AttemptOutcome`; this function owns sleeping, rate limiting and the
/// attempt ceiling.
pub async fn call_with_retry<T, F, Fut>(
    retry: &RetrySettings,
    limiter: &RateLimiter,
    mut call: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AttemptOutcome<T>>,
{
    let mut attempt = 0u32;
    let mut last_transport: Option<String> = None;
    let mut last_http: Option<(u16, String)> = None;

    loop {
        attempt += 1;
        limiter.acquire().await;

        match call().await {
            AttemptOutcome::Success(value) => return Ok(value),
            AttemptOutcome::TransportError(message) => {
                if attempt < retry.max_attempts {
                    let delay = select_retry_delay(attempt, retry, None);
                    tracing::warn!(attempt, delay_secs = delay.as_secs_f64(), %message, "transport error, retrying");
                    tokio::time::sleep(delay).await;
                    last_transport = Some(message);
                    continue;
                }
                return Err(RetryExhausted::Transport(message));
            }
            AttemptOutcome::HttpError {
                status,
                message,
                retry_after,
            } => {
                if is_retriable_status(status) && attempt < retry.max_attempts {
                    let retry_after_seconds = retry_after.as_deref().and_then(parse_retry_after);
                    let delay = select_retry_delay(attempt, retry, retry_after_seconds);
                    tracing::warn!(attempt, status, delay_secs = delay.as_secs_f64(), "http error, retrying");
                    tokio::time::sleep(delay).await;
                    last_http = Some((status, message));
                    continue;
                }
                return Err(RetryExhausted::Http { status, message });
            }
        }
    }
    #[allow(unreachable_code)]
    {
        let _ = (&last_transport, &last_http);
        unreachable!()
    }
}

pub type SharedRateLimiter = Arc<RateLimiter>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retry_settings() -> RetrySettings {
        RetrySettings {
            max_attempts: 4,
            retry_backoff_seconds: 1.0,
            max_retry_backoff_seconds: Some(10.0),
            requests_per_minute: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn parses_numeric_retry_after() {
        assert_eq!(parse_retry_after("2"), Some(2.0));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn retry_delay_uses_exponential_base_then_caps() {
        let retry = retry_settings();
        assert_eq!(select_retry_delay(1, &retry, None), Duration::from_secs_f64(1.0));
        assert_eq!(select_retry_delay(2, &retry, None), Duration::from_secs_f64(2.0));
        assert_eq!(select_retry_delay(3, &retry, None), Duration::from_secs_f64(4.0));
        // attempt 5 would be 16s uncapped, capped to 10s
        assert_eq!(select_retry_delay(5, &retry, None), Duration::from_secs_f64(10.0));
    }

    #[test]
    fn retry_after_raises_delay_above_base() {
        let retry = retry_settings();
        let delay = select_retry_delay(1, &retry, Some(5.0));
        assert_eq!(delay, Duration::from_secs_f64(5.0));
    }

    #[tokio::test]
    async fn retries_until_success_within_attempt_budget() {
        let retry = RetrySettings {
            max_attempts: 4,
            retry_backoff_seconds: 0.001,
            max_retry_backoff_seconds: Some(0.01),
            requests_per_minute: None,
            request_timeout: Duration::from_secs(5),
        };
        let limiter = RateLimiter::new(None);
        let calls = AtomicU32::new(0);

        let result = call_with_retry(&retry, &limiter, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    AttemptOutcome::HttpError {
                        status: 429,
                        message: "rate limited".to_string(),
                        retry_after: None,
                    }
                } else {
                    AttemptOutcome::Success(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn exhausts_retries_and_reports_last_status() {
        let retry = RetrySettings {
            max_attempts: 2,
            retry_backoff_seconds: 0.001,
            max_retry_backoff_seconds: Some(0.01),
            requests_per_minute: None,
            request_timeout: Duration::from_secs(5),
        };
        let limiter = RateLimiter::new(None);

        let err = call_with_retry(&retry, &limiter, || async {
            AttemptOutcome::<()>::HttpError {
                status: 503,
                message: "unavailable".to_string(),
                retry_after: None,
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, RetryExhausted::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn non_retriable_status_fails_immediately() {
        let retry = retry_settings();
        let limiter = RateLimiter::new(None);
        let calls = AtomicU32::new(0);

        let err = call_with_retry(&retry, &limiter, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                AttemptOutcome::<()>::HttpError {
                    status: 401,
                    message: "unauthorized".to_string(),
                    retry_after: None,
                }
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, RetryExhausted::Http { status: 401, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
