use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

/// Floor for the time between two manifest refreshes.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(500);
/// Ceiling for the time between two manifest refreshes.
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_millis(6000);
/// Interval used when the manifest declares no minimum update period.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(3000);

/// Retry ceiling for 502 responses on manifest requests.
pub const MANIFEST_502_RETRY_COUNT: u32 = 10;

/// How many consecutive refreshes may run at the minimum interval while the
/// manifest publish time stays unchanged.
pub const MAX_MINIMAL_REFRESH_RETRIES: u32 = 2;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Hook invoked instead of the network fetch when the application supplies
/// manifests itself. Returning `None` (or empty text) is reported to the loop
/// as a transport timeout.
pub type PreprocessHook = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Network tuning for manifest requests. Readable by the download loop on
/// every iteration; mutable through the public setters between iterations.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Overall timeout for one manifest request.
    pub download_timeout: Duration,
    /// Maximum time between receiving data chunks.
    pub stall_timeout: Duration,
    /// Connection establishment timeout.
    pub start_timeout: Duration,
    /// Custom HTTP headers sent with every manifest request.
    pub headers: HeaderMap,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            download_timeout: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(30),
            headers: default_headers(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip, deflate, br"),
    );
    headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static("application/dash+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers
}

/// Harvesting writes each downloaded manifest to disk for offline inspection,
/// bounded by a decrementing counter.
#[derive(Debug, Clone, Default)]
pub struct HarvestConfig {
    /// Directory the manifests are written under. `None` disables harvesting.
    pub path: Option<PathBuf>,
    /// Number of manifests still to be written.
    pub count_limit: u32,
}

impl HarvestConfig {
    pub fn enabled(&self) -> bool {
        self.path.is_some() && self.count_limit > 0
    }
}

/// Per-session download configuration. Built once before `start()` and treated
/// as immutable by the loop, apart from the one-shot pre-processed override.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// URL used for tuning the stream.
    pub tune_url: String,
    /// Secondary manifest merged into the cached tune manifest across
    /// refreshes. When set, the loop switches its target to this URL after the
    /// first successful live download.
    pub stitch_url: Option<String>,
    /// Whether low-latency detection runs on the first manifest.
    pub low_latency_enabled: bool,
    pub fetch: FetchConfig,
    pub harvest: HarvestConfig,
    /// Manifest text consumed on the first iteration instead of fetching.
    pub preprocessed_manifest: Option<String>,
    /// Hook consulted on every iteration when set; bypasses the network.
    pub preprocess_hook: Option<PreprocessHook>,
    /// Identifier carried into log lines so multiple players can share a log.
    pub player_id: u32,
    /// Application name reported in logs.
    pub app_name: String,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("tune_url", &self.tune_url)
            .field("stitch_url", &self.stitch_url)
            .field("low_latency_enabled", &self.low_latency_enabled)
            .field("fetch", &self.fetch)
            .field("harvest", &self.harvest)
            .field(
                "preprocessed_manifest",
                &self.preprocessed_manifest.as_ref().map(String::len),
            )
            .field("preprocess_hook", &self.preprocess_hook.is_some())
            .field("player_id", &self.player_id)
            .field("app_name", &self.app_name)
            .finish()
    }
}

impl SessionConfig {
    pub fn new(tune_url: impl Into<String>) -> Self {
        Self {
            tune_url: tune_url.into(),
            ..Default::default()
        }
    }

    pub fn with_stitch_url(mut self, url: impl Into<String>) -> Self {
        self.stitch_url = Some(url.into());
        self
    }

    pub fn with_low_latency(mut self, enabled: bool) -> Self {
        self.low_latency_enabled = enabled;
        self
    }

    pub fn with_harvest(mut self, path: PathBuf, count_limit: u32) -> Self {
        self.harvest = HarvestConfig {
            path: Some(path),
            count_limit,
        };
        self
    }

    pub fn with_preprocessed_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.preprocessed_manifest = Some(manifest.into());
        self
    }

    pub fn with_preprocess_hook(mut self, hook: PreprocessHook) -> Self {
        self.preprocess_hook = Some(hook);
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }
}
