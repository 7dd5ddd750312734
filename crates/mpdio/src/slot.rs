// Single-slot manifest buffer: each push replaces the previous value, so
// consumers always read the newest manifest and never drain a backlog.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ManifestStatus;
use crate::response::ManifestResponse;

#[derive(Default)]
pub struct ManifestSlot {
    current: Mutex<Option<Arc<ManifestResponse>>>,
    notify: Notify,
}

impl ManifestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the buffered manifest and wake every waiting consumer.
    pub fn push(&self, response: Arc<ManifestResponse>) {
        *self.current.lock() = Some(response);
        self.notify.notify_waiters();
    }

    /// Drop the buffered manifest (session release).
    pub fn clear(&self) {
        *self.current.lock() = None;
    }

    pub fn peek(&self) -> Option<Arc<ManifestResponse>> {
        self.current.lock().clone()
    }

    pub fn has_value(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Fetch the buffered manifest. With `wait` set an empty slot blocks
    /// until a push, the timeout elapses (`Timeout` status), or the token is
    /// cancelled (`Aborted` status). Without `wait` an empty slot returns a
    /// `DownloadError` response immediately, since nothing has been
    /// downloaded yet. The result is always a valid object.
    pub async fn get(
        &self,
        wait: bool,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Arc<ManifestResponse> {
        if let Some(response) = self.peek() {
            return response;
        }
        if !wait {
            debug!("Manifest requested without wait while buffer empty");
            return Arc::new(ManifestResponse::error(ManifestStatus::DownloadError));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking so a push between the
            // check and the await cannot be missed.
            notified.as_mut().enable();
            if let Some(response) = self.peek() {
                return response;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Manifest wait ended by release");
                    return Arc::new(ManifestResponse::error(ManifestStatus::Aborted));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "Manifest wait timed out");
                    return Arc::new(ManifestResponse::error(ManifestStatus::Timeout));
                }
                _ = &mut notified => {
                    if let Some(response) = self.peek() {
                        return response;
                    }
                }
            }
        }
    }
}
