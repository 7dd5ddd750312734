// Retry-with-backoff for manifest requests: exponential backoff with jitter,
// a max-delay cap, per-status eligibility, and cancellation awareness.

use crate::error::DownloadError;
use rand::RngExt;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::MANIFEST_502_RETRY_COUNT;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry attempts for transport failures and retryable statuses, not
    /// counting the initial attempt.
    pub max_retries: u32,
    /// 502 gets its own, larger ceiling: upstream packagers routinely return
    /// it for a few seconds around a period transition.
    pub max_retries_502: u32,
    /// Base delay; actual delay = base * 2^attempt + jitter, capped.
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_retries_502: MANIFEST_502_RETRY_COUNT,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Ceiling applicable to the error of the most recent attempt.
    pub fn ceiling_for(&self, err: &DownloadError) -> u32 {
        match err {
            DownloadError::HttpStatus { status, .. } if *status == StatusCode::BAD_GATEWAY => {
                self.max_retries_502
            }
            _ => self.max_retries,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Checked shift so misconfigured attempt counts saturate instead of
        // overflowing the Duration math.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Outcome of a single attempt as seen by the retry driver.
pub enum RetryAction<T> {
    Success(T),
    /// Transient failure (connect/timeout/5xx); eligible for another attempt.
    Retry(DownloadError),
    /// Permanent failure (4xx, bad URL); returned immediately.
    Fail(DownloadError),
}

/// Drive an async operation through the retry policy. The closure receives
/// the 0-indexed attempt number and classifies its own result.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, DownloadError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt >= policy.ceiling_for(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying manifest request after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(DownloadError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// Retryable: connect, timeout, request and body-read errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body()
}

/// Server errors and 429 are worth another attempt; client errors are not.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
