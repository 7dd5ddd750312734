use bytes::Bytes;
use dash_mpd::MPD;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use crate::error::ManifestStatus;
use crate::transport::{FetchMetrics, FetchOutcome};

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// One download attempt's raw and parsed data plus derived attributes.
///
/// Produced and mutated exclusively by the download loop; once pushed into the
/// buffer it is shared read-only behind an `Arc`, and the loop keeps working
/// on its own owned copy.
#[derive(Debug, Clone, Default)]
pub struct ManifestResponse {
    /// Raw manifest bytes as transferred.
    pub body: Bytes,
    /// URL after redirects, empty until a transfer succeeded.
    pub effective_url: String,
    pub http_status: Option<StatusCode>,
    pub status: ManifestStatus,
    /// Parsed document handle, `None` until [`parse`](Self::parse) succeeds.
    pub mpd: Option<MPD>,
    pub is_live: bool,
    /// Set while the loop intends to download this manifest again.
    pub refresh_required: bool,
    /// Wall-clock milliseconds of the moment the download finished.
    pub fetched_at_ms: u64,
    pub metrics: FetchMetrics,
}

impl ManifestResponse {
    pub fn from_outcome(outcome: FetchOutcome) -> Self {
        Self {
            body: outcome.body,
            effective_url: outcome.effective_url,
            http_status: Some(outcome.http_status),
            status: ManifestStatus::Ok,
            mpd: None,
            is_live: false,
            refresh_required: false,
            fetched_at_ms: now_ms(),
            metrics: outcome.metrics,
        }
    }

    /// Manifest text supplied by the application instead of the network.
    pub fn from_preprocessed(text: String, url: &str) -> Self {
        Self {
            body: Bytes::from(text),
            effective_url: url.to_owned(),
            http_status: Some(StatusCode::OK),
            status: ManifestStatus::Ok,
            fetched_at_ms: now_ms(),
            ..Default::default()
        }
    }

    /// Error sentinel handed to consumers; always a valid object.
    pub fn error(status: ManifestStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Test-only simulated HTTP failure requested through `get_manifest`.
    pub fn simulated_error(code: u16) -> Self {
        Self {
            status: ManifestStatus::DownloadError,
            http_status: StatusCode::from_u16(code).ok(),
            ..Default::default()
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body and derive liveness. Failures land in `self.status`;
    /// the loop proceeds to its next scheduled attempt either way.
    pub fn parse(&mut self) {
        match dash_mpd::parse(&self.text()) {
            Ok(mpd) => {
                if mpd.periods.is_empty() {
                    self.status = ManifestStatus::ContentError;
                    self.mpd = Some(mpd);
                } else {
                    self.is_live = mpd.mpdtype.as_deref() != Some("static");
                    self.status = ManifestStatus::Ok;
                    self.mpd = Some(mpd);
                }
            }
            Err(e) => {
                debug!(url = %self.effective_url, error = %e, "Manifest parse failed");
                self.status = ManifestStatus::ParseError;
                self.mpd = None;
            }
        }
    }

    /// Replace the body with re-serialized text and re-parse, keeping the
    /// document handle consistent after a stitch merge.
    pub fn replace_body(&mut self, text: String) {
        self.body = Bytes::from(text);
        self.parse();
    }

    /// Manifest-declared generation timestamp in milliseconds.
    pub fn publish_time_ms(&self) -> Option<u64> {
        self.mpd
            .as_ref()
            .and_then(|mpd| mpd.publishTime.as_ref())
            .map(|t| t.timestamp_millis().max(0) as u64)
    }

    pub fn minimum_update_period(&self) -> Option<Duration> {
        self.mpd.as_ref().and_then(|mpd| mpd.minimumUpdatePeriod)
    }

    /// Event markers (ad insertion points) anywhere in the manifest.
    pub fn has_event_stream(&self) -> bool {
        self.mpd
            .as_ref()
            .is_some_and(|mpd| mpd.periods.iter().any(|p| !p.event_streams.is_empty()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn response_from(text: String) -> ManifestResponse {
        let mut response = ManifestResponse::from_preprocessed(text, "http://example.com/m.mpd");
        response.parse();
        response
    }

    #[test]
    fn dynamic_manifest_classified_live() {
        let response = response_from(fixtures::live_manifest("2026-01-01T00:00:10Z"));
        assert_eq!(response.status, ManifestStatus::Ok);
        assert!(response.is_live);
        assert_eq!(
            response.minimum_update_period(),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn static_manifest_classified_not_live() {
        let response = response_from(fixtures::static_manifest());
        assert_eq!(response.status, ManifestStatus::Ok);
        assert!(!response.is_live);
    }

    #[test]
    fn malformed_document_sets_parse_error() {
        let response = response_from("<MPD><broken".to_string());
        assert_eq!(response.status, ManifestStatus::ParseError);
        assert!(response.mpd.is_none());
    }

    #[test]
    fn empty_root_sets_content_error() {
        let response = response_from(
            r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic"></MPD>"#.to_string(),
        );
        assert_eq!(response.status, ManifestStatus::ContentError);
    }

    #[test]
    fn publish_time_extracted_in_milliseconds() {
        let response = response_from(fixtures::live_manifest("2026-01-01T00:00:10Z"));
        let expected = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:10Z")
            .unwrap()
            .timestamp_millis() as u64;
        assert_eq!(response.publish_time_ms(), Some(expected));
    }

    #[test]
    fn event_stream_detected() {
        let response = response_from(fixtures::event_manifest());
        assert!(response.has_event_stream());
        let response = response_from(fixtures::live_manifest("2026-01-01T00:00:10Z"));
        assert!(!response.has_event_stream());
    }

    #[test]
    fn error_response_is_always_a_valid_object() {
        let response = ManifestResponse::error(ManifestStatus::Timeout);
        assert_eq!(response.status, ManifestStatus::Timeout);
        assert!(response.mpd.is_none());
        assert!(response.body.is_empty());
    }
}
