// Manifest stitching: merges each refresh of the secondary source into a
// clone of the cached primary manifest. The cached base is never mutated in
// place, so consumers holding an earlier push are unaffected by later merges.

use tracing::{debug, info, warn};

use crate::response::ManifestResponse;

/// Loop-private cache of the primary ("tune") manifest once a stitch source
/// is configured.
#[derive(Default)]
pub struct StitchCache {
    base: Option<ManifestResponse>,
}

impl StitchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_primed(&self) -> bool {
        self.base.is_some()
    }

    /// Retain the first successful primary download as the merge base for the
    /// rest of the session.
    pub fn prime(&mut self, response: &ManifestResponse) {
        info!(url = %response.effective_url, "Caching primary manifest for stitching");
        self.base = Some(response.clone());
    }

    pub fn reset(&mut self) {
        self.base = None;
    }

    /// Append the update's periods onto a clone of the cached base, then
    /// re-serialize and re-parse so the returned composite is internally
    /// consistent. Returns `None` when either side has no parsed document or
    /// the rebuilt text fails to parse; the caller keeps its previous result.
    pub fn merge(&self, update: &ManifestResponse) -> Option<ManifestResponse> {
        let base = self.base.as_ref()?;
        let (Some(base_mpd), Some(update_mpd)) = (base.mpd.as_ref(), update.mpd.as_ref()) else {
            debug!("Stitch skipped, one side has no parsed document");
            return None;
        };

        let mut merged_mpd = base_mpd.clone();
        merged_mpd
            .periods
            .extend(update_mpd.periods.iter().cloned());

        let text = match quick_xml::se::to_string_with_root("MPD", &merged_mpd) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Stitched manifest serialization failed");
                return None;
            }
        };

        let mut merged = base.clone();
        merged.fetched_at_ms = update.fetched_at_ms;
        merged.metrics = update.metrics.clone();
        merged.replace_body(text);
        if !merged.status.is_ok() {
            warn!(status = %merged.status, "Stitched manifest failed to re-parse");
            return None;
        }
        debug!(
            periods = merged.mpd.as_ref().map(|m| m.periods.len()).unwrap_or(0),
            "Stitched manifest rebuilt"
        );
        Some(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::fixtures;

    fn parsed(text: String, url: &str) -> ManifestResponse {
        let mut response = ManifestResponse::from_preprocessed(text, url);
        response.parse();
        response
    }

    #[test]
    fn merge_appends_periods_from_the_update() {
        let mut cache = StitchCache::new();
        cache.prime(&parsed(
            fixtures::live_manifest("2026-01-01T00:00:10Z"),
            "http://example.com/main.mpd",
        ));
        let update = parsed(
            fixtures::live_manifest("2026-01-01T00:00:12Z"),
            "http://example.com/stitch.mpd",
        );

        let merged = cache.merge(&update).expect("merge succeeds");
        assert_eq!(merged.mpd.as_ref().unwrap().periods.len(), 2);
        assert!(merged.status.is_ok());
    }

    #[test]
    fn merge_leaves_the_cached_base_unchanged() {
        let mut cache = StitchCache::new();
        let base = parsed(
            fixtures::live_manifest("2026-01-01T00:00:10Z"),
            "http://example.com/main.mpd",
        );
        cache.prime(&base);
        let update = parsed(
            fixtures::live_manifest("2026-01-01T00:00:12Z"),
            "http://example.com/stitch.mpd",
        );

        let _ = cache.merge(&update).expect("merge succeeds");
        // The base is re-merged from scratch each time: a second merge still
        // yields exactly base + update periods.
        let again = cache.merge(&update).expect("second merge succeeds");
        assert_eq!(again.mpd.as_ref().unwrap().periods.len(), 2);
    }

    #[test]
    fn merge_requires_a_primed_base() {
        let cache = StitchCache::new();
        let update = parsed(
            fixtures::live_manifest("2026-01-01T00:00:12Z"),
            "http://example.com/stitch.mpd",
        );
        assert!(cache.merge(&update).is_none());
    }

    #[test]
    fn merge_skips_when_update_is_unparsed() {
        let mut cache = StitchCache::new();
        cache.prime(&parsed(
            fixtures::live_manifest("2026-01-01T00:00:10Z"),
            "http://example.com/main.mpd",
        ));
        let update = parsed("<MPD><broken".to_string(), "http://example.com/stitch.mpd");
        assert!(update.mpd.is_none());
        assert!(cache.merge(&update).is_none());
    }
}
