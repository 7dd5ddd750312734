// Manifest harvesting: every downloaded manifest is written to disk for
// offline inspection, sequentially numbered, until the configured count is
// exhausted.

use std::path::PathBuf;
use tracing::{debug, warn};

use crate::config::HarvestConfig;
use crate::error::DownloadError;
use crate::response::ManifestResponse;

pub struct Harvester {
    directory: Option<PathBuf>,
    remaining: u32,
    sequence: u32,
    directory_ready: bool,
}

impl Harvester {
    pub fn new(config: &HarvestConfig) -> Self {
        Self {
            directory: config.path.clone(),
            remaining: config.count_limit,
            sequence: 0,
            directory_ready: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.directory.is_some() && self.remaining > 0
    }

    /// Write the manifest body under the harvest directory. Failures are
    /// logged and do not consume the remaining count; harvesting never
    /// disturbs the download loop.
    pub async fn harvest(&mut self, response: &ManifestResponse) {
        if !self.enabled() || response.body.is_empty() {
            return;
        }
        match self.write(response).await {
            Ok(path) => {
                self.sequence += 1;
                self.remaining -= 1;
                debug!(
                    path = %path.display(),
                    remaining = self.remaining,
                    "Harvested manifest"
                );
            }
            Err(e) => {
                warn!(error = %e, "Failed to harvest manifest");
            }
        }
    }

    async fn write(&mut self, response: &ManifestResponse) -> Result<PathBuf, DownloadError> {
        let Some(directory) = self.directory.as_ref() else {
            return Err(DownloadError::Internal {
                reason: "harvest directory not configured".to_string(),
            });
        };
        if !self.directory_ready {
            tokio::fs::create_dir_all(directory).await?;
            self.directory_ready = true;
        }
        let path = directory.join(format!("manifest_{:05}.mpd", self.sequence));
        tokio::fs::write(&path, &response.body).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::fixtures;

    fn response() -> ManifestResponse {
        ManifestResponse::from_preprocessed(
            fixtures::static_manifest(),
            "http://example.com/m.mpd",
        )
    }

    #[tokio::test]
    async fn writes_numbered_files_until_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HarvestConfig {
            path: Some(dir.path().join("harvest")),
            count_limit: 2,
        };
        let mut harvester = Harvester::new(&config);

        harvester.harvest(&response()).await;
        harvester.harvest(&response()).await;
        harvester.harvest(&response()).await;

        let base = dir.path().join("harvest");
        assert!(base.join("manifest_00000.mpd").exists());
        assert!(base.join("manifest_00001.mpd").exists());
        assert!(!base.join("manifest_00002.mpd").exists());
        assert!(!harvester.enabled());
    }

    #[tokio::test]
    async fn disabled_without_a_path() {
        let mut harvester = Harvester::new(&HarvestConfig {
            path: None,
            count_limit: 5,
        });
        assert!(!harvester.enabled());
        harvester.harvest(&response()).await;
    }

    #[tokio::test]
    async fn empty_body_is_not_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HarvestConfig {
            path: Some(dir.path().to_path_buf()),
            count_limit: 2,
        };
        let mut harvester = Harvester::new(&config);
        let empty = ManifestResponse::default();
        harvester.harvest(&empty).await;
        assert!(!dir.path().join("manifest_00000.mpd").exists());
    }
}
