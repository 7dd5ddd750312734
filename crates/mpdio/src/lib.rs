//! DASH manifest acquisition and refresh scheduling.
//!
//! The crate downloads a streaming session's manifest, keeps it fresh while
//! the stream is live, and hands the newest copy to consumers through a
//! single-slot buffer:
//!
//! - [`ManifestDownloader`] owns the session: the download loop task, the
//!   buffer, the update notifier, and the externally settable knobs.
//! - The refresh cadence adapts to the manifest's declared update period,
//!   the player's reported buffer level, and low-latency attributes, always
//!   clamped to a fixed interval range.
//! - An optional secondary ("stitch") source is merged into the cached
//!   primary manifest across refreshes.
//!
//! ```no_run
//! use mpdio::{ManifestDownloader, SessionConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), mpdio::DownloadError> {
//! let config = SessionConfig::new("https://example.com/live.mpd");
//! let downloader = ManifestDownloader::new(config)?;
//! downloader.start();
//!
//! let manifest = downloader
//!     .get_manifest(true, Duration::from_secs(10), None)
//!     .await;
//! if manifest.status.is_ok() {
//!     println!("live: {}", manifest.is_live);
//! }
//! downloader.release().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod harvest;
pub mod low_latency;
pub mod notify;
pub mod refresh;
pub mod response;
pub mod retry;
pub mod slot;
pub mod stitch;
pub mod transport;

mod downloader;

pub use config::{
    DEFAULT_REFRESH_INTERVAL, FetchConfig, HarvestConfig, MAX_REFRESH_INTERVAL,
    MIN_REFRESH_INTERVAL, PreprocessHook, SessionConfig,
};
pub use downloader::ManifestDownloader;
pub use error::{DownloadError, ManifestStatus};
pub use low_latency::LowLatencyProfile;
pub use notify::ManifestUpdateCallback;
pub use response::ManifestResponse;
pub use transport::{FetchMetrics, FetchOutcome, HttpTransport, ManifestFetcher};
