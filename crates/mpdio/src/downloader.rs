// Session orchestrator: owns the download loop task, the manifest buffer,
// the notifier, and the externally-settable knobs. One instance per playback
// session.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_REFRESH_INTERVAL, MIN_REFRESH_INTERVAL, SessionConfig};
use crate::error::{DownloadError, ManifestStatus};
use crate::harvest::Harvester;
use crate::low_latency::{self, LowLatencyProfile};
use crate::notify::{ManifestUpdateCallback, UpdateNotifier};
use crate::refresh::RefreshState;
use crate::response::ManifestResponse;
use crate::slot::ManifestSlot;
use crate::stitch::StitchCache;
use crate::transport::{HttpTransport, ManifestFetcher};

/// State shared between the loop task, the public API, and the notifier.
struct SharedState {
    slot: ManifestSlot,
    notifier: UpdateNotifier,
    fetch: Mutex<crate::config::FetchConfig>,
    fetcher: Mutex<Arc<dyn ManifestFetcher>>,
    /// Player-reported buffer in milliseconds, -1 while unknown.
    buffer_availability_ms: AtomicI64,
    /// Distance from play position to manifest end, -1 while unknown.
    position_delta_ms: AtomicI64,
    low_latency: Mutex<LowLatencyProfile>,
    publish_time_ms: AtomicU64,
    effective_url: Mutex<String>,
    last_manifest: Mutex<Bytes>,
    refresh_count: AtomicU32,
}

pub struct ManifestDownloader {
    config: SessionConfig,
    shared: Arc<SharedState>,
    token: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
    /// Whether the fetcher is the built-in HTTP transport and should be
    /// rebuilt when connection timeouts change.
    http_transport: bool,
}

impl ManifestDownloader {
    /// Build a downloader backed by the HTTP transport. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(config: SessionConfig) -> Result<Self, DownloadError> {
        let transport = HttpTransport::new(&config.fetch)?;
        Ok(Self::build(config, Arc::new(transport), true))
    }

    /// Build a downloader over a caller-supplied fetcher.
    pub fn with_fetcher(config: SessionConfig, fetcher: Arc<dyn ManifestFetcher>) -> Self {
        Self::build(config, fetcher, false)
    }

    fn build(config: SessionConfig, fetcher: Arc<dyn ManifestFetcher>, http: bool) -> Self {
        let shared = Arc::new(SharedState {
            slot: ManifestSlot::new(),
            notifier: UpdateNotifier::new(),
            fetch: Mutex::new(config.fetch.clone()),
            fetcher: Mutex::new(fetcher),
            buffer_availability_ms: AtomicI64::new(-1),
            position_delta_ms: AtomicI64::new(-1),
            low_latency: Mutex::new(LowLatencyProfile::default()),
            publish_time_ms: AtomicU64::new(0),
            effective_url: Mutex::new(String::new()),
            last_manifest: Mutex::new(Bytes::new()),
            refresh_count: AtomicU32::new(0),
        });
        Self {
            config,
            shared,
            token: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
            released: AtomicBool::new(true),
            http_transport: http,
        }
    }

    /// Spawn the download loop. A no-op while already running. With an empty
    /// tune URL no loop is spawned and non-blocking consumers see download
    /// errors.
    pub fn start(&self) {
        if !self.released.swap(false, Ordering::SeqCst) {
            debug!("Download loop already running");
            return;
        }
        let token = CancellationToken::new();
        *self.token.lock() = token.clone();

        if self.config.tune_url.is_empty() {
            error!("No tune URL provided for download");
            return;
        }

        let config = self.config.clone();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run_download_loop(config, shared, token));
        *self.task.lock() = Some(handle);
    }

    /// Tear the session down: cancel the loop, wake every waiter, join the
    /// worker tasks, and drop cached state. Safe to call repeatedly.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Releasing manifest downloader");
        self.token.lock().cancel();

        let task = self.task.lock().take();
        if let Some(handle) = task {
            let _ = handle.await;
        }
        self.shared.notifier.shutdown().await;

        self.shared.slot.clear();
        *self.shared.low_latency.lock() = LowLatencyProfile::default();
        self.shared.publish_time_ms.store(0, Ordering::Relaxed);
        info!("Manifest downloader released");
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Fetch the newest manifest. `error_simulation` short-circuits with a
    /// synthetic HTTP failure for fault-injection tests. Always returns a
    /// valid response object and never blocks longer than `timeout`.
    pub async fn get_manifest(
        &self,
        wait: bool,
        timeout: Duration,
        error_simulation: Option<u16>,
    ) -> Arc<ManifestResponse> {
        if self.released.load(Ordering::SeqCst) {
            return Arc::new(ManifestResponse::error(ManifestStatus::DownloadError));
        }
        if let Some(code) = error_simulation {
            info!(code, "Simulating HTTP error for manifest request");
            return Arc::new(ManifestResponse::simulated_error(code));
        }
        let token = self.token.lock().clone();
        self.shared.slot.get(wait, timeout, &token).await
    }

    /// Overall per-request timeout; applies from the next request on.
    pub fn set_network_timeout(&self, timeout: Duration) {
        self.shared.fetch.lock().download_timeout = timeout;
    }

    /// Time allowed between received chunks; rebuilds the HTTP client.
    pub fn set_stall_timeout(&self, timeout: Duration) {
        self.shared.fetch.lock().stall_timeout = timeout;
        self.rebuild_transport();
    }

    /// Connection establishment timeout; rebuilds the HTTP client.
    pub fn set_start_timeout(&self, timeout: Duration) {
        self.shared.fetch.lock().start_timeout = timeout;
        self.rebuild_transport();
    }

    fn rebuild_transport(&self) {
        if !self.http_transport {
            return;
        }
        let fetch = self.shared.fetch.lock().clone();
        match HttpTransport::new(&fetch) {
            Ok(transport) => *self.shared.fetcher.lock() = Arc::new(transport),
            Err(e) => warn!(error = %e, "Failed to rebuild HTTP client with updated timeouts"),
        }
    }

    /// Player-reported buffer level feeding the refresh calculator.
    pub fn set_buffer_availability_ms(&self, milliseconds: i64) {
        self.shared
            .buffer_availability_ms
            .store(milliseconds, Ordering::Relaxed);
    }

    /// Distance between play position and manifest end, used to relax
    /// minimum-interval polling in low-latency mode.
    pub fn set_position_delta_to_manifest_end_ms(&self, milliseconds: i64) {
        self.shared
            .position_delta_ms
            .store(milliseconds, Ordering::Relaxed);
    }

    /// Subscribe to manifest updates. Only one callback may be active.
    pub async fn register_callback(&self, callback: ManifestUpdateCallback) {
        let token = self.token.lock().clone();
        self.shared.notifier.register(&token, callback).await;
    }

    pub fn unregister_callback(&self) {
        self.shared.notifier.unregister();
    }

    /// Low-latency attributes latched from the first manifest; the default
    /// profile (mode off) before the first parse.
    pub fn low_latency(&self) -> LowLatencyProfile {
        self.shared.low_latency.lock().clone()
    }

    /// Publish time of the newest manifest in milliseconds, 0 before the
    /// first successful parse.
    pub fn publish_time_ms(&self) -> u64 {
        self.shared.publish_time_ms.load(Ordering::Relaxed)
    }

    /// URL of the last successful download after redirects.
    pub fn effective_url(&self) -> String {
        self.shared.effective_url.lock().clone()
    }

    /// Raw text of the last successfully downloaded manifest.
    pub fn last_manifest_text(&self) -> String {
        String::from_utf8_lossy(&self.shared.last_manifest.lock()).into_owned()
    }

    /// Number of manifests pushed to consumers so far.
    pub fn refresh_count(&self) -> u32 {
        self.shared.refresh_count.load(Ordering::Relaxed)
    }
}

async fn run_download_loop(
    config: SessionConfig,
    shared: Arc<SharedState>,
    token: CancellationToken,
) {
    let mut refresh_state = RefreshState::default();
    let mut stitch = StitchCache::new();
    let mut harvester = Harvester::new(&config.harvest);
    let mut target_url = config.tune_url.clone();
    let mut preprocessed = config.preprocessed_manifest.clone();
    let mut first_download = true;
    let mut interval = DEFAULT_REFRESH_INTERVAL;

    info!(
        player_id = config.player_id,
        app = %config.app_name,
        url = %target_url,
        "Manifest download loop started"
    );

    loop {
        if token.is_cancelled() {
            break;
        }

        let mut timeout_class_failure = false;
        let mut response = if let Some(text) = preprocessed.take() {
            warn!("Pre-processed manifest provided, skipping network fetch");
            ManifestResponse::from_preprocessed(text, &target_url)
        } else if let Some(hook) = config.preprocess_hook.as_ref() {
            match hook() {
                Some(text) if !text.is_empty() => {
                    ManifestResponse::from_preprocessed(text, &target_url)
                }
                _ => {
                    // An empty hook result counts as a transport timeout.
                    timeout_class_failure = true;
                    ManifestResponse::error(ManifestStatus::DownloadError)
                }
            }
        } else {
            let fetcher = shared.fetcher.lock().clone();
            let fetch_config = shared.fetch.lock().clone();
            match fetcher.fetch(&target_url, &fetch_config, &token).await {
                Ok(outcome) => ManifestResponse::from_outcome(outcome),
                Err(DownloadError::Cancelled) => break,
                Err(e) => {
                    error!(url = %target_url, error = %e, "Manifest request failed");
                    timeout_class_failure = e.is_timeout_class();
                    let mut failed = ManifestResponse::error(ManifestStatus::DownloadError);
                    if let DownloadError::HttpStatus { status, url } = &e {
                        failed.http_status = Some(*status);
                        failed.effective_url = url.clone();
                    }
                    failed
                }
            }
        };

        if response.status.is_ok() {
            if response.body.is_empty() {
                info!(
                    status = ?response.http_status,
                    "Ignoring empty manifest body"
                );
                response.status = ManifestStatus::DownloadError;
            } else {
                response.parse();
            }
        }

        let mut push = true;
        let mut raw_update: Option<ManifestResponse> = None;
        if response.status.is_ok() {
            // Low-latency attributes are read from the first manifest only
            // and latched for the session.
            if first_download && config.low_latency_enabled {
                if let Some(mpd) = response.mpd.as_ref() {
                    *shared.low_latency.lock() = low_latency::detect(mpd);
                }
            }
            response.refresh_required = response.is_live;

            let profile = shared.low_latency.lock().clone();
            let decision = refresh_state.evaluate(
                &response,
                &profile,
                shared.buffer_availability_ms.load(Ordering::Relaxed),
                shared.position_delta_ms.load(Ordering::Relaxed),
            );
            interval = decision.interval;
            push = decision.push;
            shared
                .publish_time_ms
                .store(refresh_state.publish_time_ms(), Ordering::Relaxed);
            *shared.effective_url.lock() = response.effective_url.clone();
            *shared.last_manifest.lock() = response.body.clone();
            // Next refresh targets the post-redirect URL.
            target_url = response.effective_url.clone();

            if first_download {
                if response.is_live {
                    if let Some(stitch_url) = config.stitch_url.as_ref() {
                        stitch.prime(&response);
                        target_url = stitch_url.clone();
                    }
                }
                first_download = false;
            } else if stitch.is_primed() {
                raw_update = Some(response.clone());
                match stitch.merge(&response) {
                    Some(merged) => response = merged,
                    // Merge skipped; the previously pushed composite stays
                    // authoritative.
                    None => push = false,
                }
            }
        } else if !first_download && timeout_class_failure {
            warn!("Manifest refresh timed out, retrying at the minimum interval");
            interval = MIN_REFRESH_INTERVAL;
        }

        // Harvest the raw downloaded manifest, not the stitched composite.
        harvester
            .harvest(raw_update.as_ref().unwrap_or(&response))
            .await;

        if push {
            debug!(status = %response.status, "Publishing manifest to buffer");
            shared.slot.push(Arc::new(response.clone()));
            shared.notifier.notify_update();
            shared.refresh_count.fetch_add(1, Ordering::Relaxed);
        }

        let keep_running = if response.status.is_ok() {
            response.is_live
        } else {
            // Only timeouts on a live refresh are worth retrying; any other
            // failure ends the session.
            !first_download && timeout_class_failure
        };
        if !keep_running || token.is_cancelled() {
            break;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("Manifest download loop finished");
}
