// Transport boundary: performs the actual byte transfer for one manifest
// request, with its own retry policy and abort-on-cancellation behavior.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::config::FetchConfig;
use crate::error::DownloadError;
use crate::retry::{
    RetryAction, RetryPolicy, is_retryable_reqwest_error, is_retryable_status, retry_with_backoff,
};

/// Timing observed for one completed request, logged alongside the response.
#[derive(Debug, Clone, Default)]
pub struct FetchMetrics {
    pub total_time: Duration,
    pub downloaded_bytes: u64,
    pub attempts: u32,
}

/// Result of one manifest transfer.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub body: Bytes,
    pub http_status: StatusCode,
    /// URL after redirects; the refresh loop re-targets this.
    pub effective_url: String,
    pub metrics: FetchMetrics,
}

/// Boundary trait so the scheduler can be driven by an in-memory fetcher in
/// tests and by [`HttpTransport`] in production.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        config: &FetchConfig,
        token: &CancellationToken,
    ) -> Result<FetchOutcome, DownloadError>;
}

pub struct HttpTransport {
    client: Client,
    retry_policy: RetryPolicy,
}

impl HttpTransport {
    pub fn new(config: &FetchConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(config.headers.clone())
            .connect_timeout(config.start_timeout)
            .read_timeout(config.stall_timeout)
            .build()?;
        Ok(Self {
            client,
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    async fn fetch_once(
        &self,
        url: &Url,
        config: &FetchConfig,
        token: &CancellationToken,
    ) -> RetryAction<(Bytes, StatusCode, String)> {
        let request = self
            .client
            .get(url.clone())
            .timeout(config.download_timeout);

        let response = tokio::select! {
            _ = token.cancelled() => return RetryAction::Fail(DownloadError::Cancelled),
            response = request.send() => response,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let retryable = is_retryable_reqwest_error(&e);
                let err = DownloadError::from(e);
                return if retryable {
                    RetryAction::Retry(err)
                } else {
                    RetryAction::Fail(err)
                };
            }
        };

        let status = response.status();
        let effective_url = response.url().to_string();
        if !status.is_success() {
            let err = DownloadError::http_status(status, effective_url);
            return if is_retryable_status(status) {
                RetryAction::Retry(err)
            } else {
                RetryAction::Fail(err)
            };
        }

        let body = tokio::select! {
            _ = token.cancelled() => return RetryAction::Fail(DownloadError::Cancelled),
            bytes = response.bytes() => bytes,
        };
        match body {
            Ok(bytes) => RetryAction::Success((bytes, status, effective_url)),
            Err(e) => {
                let retryable = is_retryable_reqwest_error(&e);
                let err = DownloadError::from(e);
                if retryable {
                    RetryAction::Retry(err)
                } else {
                    RetryAction::Fail(err)
                }
            }
        }
    }
}

#[async_trait]
impl ManifestFetcher for HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        config: &FetchConfig,
        token: &CancellationToken,
    ) -> Result<FetchOutcome, DownloadError> {
        let url = Url::parse(url).map_err(|e| DownloadError::invalid_url(url, e.to_string()))?;

        let started = Instant::now();
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let (body, http_status, effective_url) =
            retry_with_backoff(&self.retry_policy, token, |_| {
                attempts.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.fetch_once(&url, config, token)
            })
            .await?;

        let metrics = FetchMetrics {
            total_time: started.elapsed(),
            downloaded_bytes: body.len() as u64,
            attempts: attempts.load(std::sync::atomic::Ordering::Relaxed),
        };
        debug!(
            url = %effective_url,
            status = http_status.as_u16(),
            bytes = metrics.downloaded_bytes,
            total_ms = metrics.total_time.as_millis() as u64,
            attempts = metrics.attempts,
            "Manifest request completed"
        );
        Ok(FetchOutcome {
            body,
            http_status,
            effective_url,
            metrics,
        })
    }
}
