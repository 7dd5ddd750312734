// Refresh scheduling: a pure interval calculator plus the small amount of
// state carried between refreshes (publish time and the minimal-refresh
// counter).

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{
    DEFAULT_REFRESH_INTERVAL, MAX_MINIMAL_REFRESH_RETRIES, MAX_REFRESH_INTERVAL,
    MIN_REFRESH_INTERVAL,
};
use crate::low_latency::LowLatencyProfile;
use crate::response::ManifestResponse;

/// Compute the wait before the next refresh of a live manifest.
///
/// Buffer-driven shaping applies in standard latency only: a comfortable
/// buffer stretches the interval (1.5x the update period), a thin one halves
/// it, and a near-empty one drops to a third of what remains. Low-latency
/// streams honour the manifest's update period corrected by the availability
/// time offset instead; when the playhead still has more than two fragments
/// of addressable content ahead, floor-interval polling relaxes back to the
/// update period. The result always lands inside
/// [`MIN_REFRESH_INTERVAL`, `MAX_REFRESH_INTERVAL`].
pub fn next_refresh_interval(
    response: &ManifestResponse,
    low_latency: &LowLatencyProfile,
    buffer_availability_ms: i64,
    position_delta_to_end_ms: i64,
) -> Duration {
    let min_ms = MIN_REFRESH_INTERVAL.as_millis() as i64;
    let max_ms = MAX_REFRESH_INTERVAL.as_millis() as i64;
    let default_ms = DEFAULT_REFRESH_INTERVAL.as_millis() as i64;

    if !response.is_live {
        return DEFAULT_REFRESH_INTERVAL;
    }

    let min_update_ms = response
        .minimum_update_period()
        .map(|d| d.as_millis() as i64)
        .unwrap_or(default_ms);
    let ll_mode = low_latency.low_latency_mode;
    let event_stream_found = response.has_event_stream();
    debug!(
        min_update_ms,
        buffer_availability_ms, ll_mode, "Computing next refresh interval"
    );

    let mut delay_ms = default_ms;

    if buffer_availability_ms != -1 && !ll_mode {
        if buffer_availability_ms < 2 * max_ms {
            if min_update_ms > 0 && buffer_availability_ms > min_update_ms {
                // Plenty of buffer: stretch. Thin buffer: tighten.
                let factor = if buffer_availability_ms > min_update_ms * 2 {
                    1.5
                } else {
                    0.5
                };
                delay_ms = (factor * min_update_ms as f64) as i64;
            } else {
                // Buffer below one update period: refresh soon to avoid a
                // stall.
                delay_ms = if buffer_availability_ms != 0 {
                    buffer_availability_ms / 3
                } else {
                    min_ms
                };
                if buffer_availability_ms < default_ms {
                    warn!(
                        buffer_availability_ms,
                        delay_ms, "Buffer running low, refreshing manifest sooner"
                    );
                }
            }
        } else if buffer_availability_ms > 2 * max_ms {
            delay_ms = max_ms;
        }
    }

    // Ad-insertion markers and low-latency streams follow the manifest's own
    // update period when it is tighter.
    if (event_stream_found || ll_mode) && min_update_ms > 0 && min_update_ms < delay_ms {
        delay_ms = min_update_ms;
    }

    delay_ms = delay_ms.min(max_ms);

    if delay_ms < min_ms {
        if ll_mode {
            let offset_ms = (low_latency.availability_time_offset * 1000.0) as i64;
            let segment_ms = low_latency.fragment_duration.as_millis() as i64;
            delay_ms = if min_update_ms > 0 && min_update_ms < segment_ms {
                min_update_ms
            } else if min_update_ms > 0 && min_update_ms > offset_ms {
                min_update_ms - offset_ms
            } else if segment_ms > 0 && segment_ms > offset_ms {
                segment_ms - offset_ms
            } else {
                min_ms
            };
        }
        delay_ms = delay_ms.max(min_ms);
    }

    // An empty buffer is worth rebuilding quickly.
    if ll_mode && buffer_availability_ms <= 0 && buffer_availability_ms != -1 {
        delay_ms = min_ms;
    }
    // With more than two segments of content still addressable in the
    // manifest there is no need for floor-interval polling; follow the
    // update period instead.
    let segment_ms = low_latency.fragment_duration.as_millis() as i64;
    if ll_mode
        && delay_ms <= min_ms
        && min_update_ms > 0
        && position_delta_to_end_ms > segment_ms * 2
    {
        delay_ms = min_update_ms;
    }

    Duration::from_millis(delay_ms.clamp(min_ms, max_ms) as u64)
}

/// What the loop does with a freshly refreshed manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshDecision {
    pub interval: Duration,
    /// Whether the new response replaces the buffered one and notifies
    /// subscribers. `false` while the publish time is unchanged.
    pub push: bool,
}

/// Publish-time tracking across refreshes of one session.
#[derive(Debug, Default)]
pub struct RefreshState {
    publish_time_ms: u64,
    minimal_refresh_retries: u32,
}

impl RefreshState {
    /// Decide interval and push for a successfully parsed manifest.
    ///
    /// An unchanged publish time means the origin has produced nothing new:
    /// the refresh drops to the minimum interval and the stale copy is not
    /// re-published, for at most [`MAX_MINIMAL_REFRESH_RETRIES`] consecutive
    /// refreshes. After that the normal interval resumes (and pushes resume
    /// with it) so a frozen origin cannot pin the loop at the floor.
    pub fn evaluate(
        &mut self,
        response: &ManifestResponse,
        low_latency: &LowLatencyProfile,
        buffer_availability_ms: i64,
        position_delta_to_end_ms: i64,
    ) -> RefreshDecision {
        let publish_time_ms = response.publish_time_ms().unwrap_or(0);

        if publish_time_ms != 0 && publish_time_ms == self.publish_time_ms {
            if self.minimal_refresh_retries < MAX_MINIMAL_REFRESH_RETRIES {
                self.minimal_refresh_retries += 1;
                info!(
                    retry = self.minimal_refresh_retries,
                    "Manifest publish time unchanged, scheduling minimal refresh"
                );
                return RefreshDecision {
                    interval: MIN_REFRESH_INTERVAL,
                    push: false,
                };
            }
            return RefreshDecision {
                interval: next_refresh_interval(
                    response,
                    low_latency,
                    buffer_availability_ms,
                    position_delta_to_end_ms,
                ),
                push: true,
            };
        }

        self.publish_time_ms = publish_time_ms;
        self.minimal_refresh_retries = 0;
        RefreshDecision {
            interval: next_refresh_interval(
                response,
                low_latency,
                buffer_availability_ms,
                position_delta_to_end_ms,
            ),
            push: true,
        }
    }

    pub fn publish_time_ms(&self) -> u64 {
        self.publish_time_ms
    }

    pub fn reset(&mut self) {
        self.publish_time_ms = 0;
        self.minimal_refresh_retries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::fixtures;

    fn live_response(publish_time: &str) -> ManifestResponse {
        let mut response = ManifestResponse::from_preprocessed(
            fixtures::live_manifest(publish_time),
            "http://example.com/m.mpd",
        );
        response.parse();
        response
    }

    fn ll_response() -> ManifestResponse {
        let mut response = ManifestResponse::from_preprocessed(
            fixtures::low_latency_manifest(),
            "http://example.com/m.mpd",
        );
        response.parse();
        response
    }

    fn standard() -> LowLatencyProfile {
        LowLatencyProfile::default()
    }

    #[test]
    fn static_manifest_gets_default_interval() {
        let mut response = ManifestResponse::from_preprocessed(
            fixtures::static_manifest(),
            "http://example.com/m.mpd",
        );
        response.parse();
        assert_eq!(
            next_refresh_interval(&response, &standard(), -1, -1),
            DEFAULT_REFRESH_INTERVAL
        );
    }

    #[test]
    fn unknown_buffer_uses_manifest_update_period_clamped() {
        // minimumUpdatePeriod is PT2S; no buffer signal leaves the default,
        // and the fixture carries no event stream.
        let response = live_response("2026-01-01T00:00:10Z");
        assert_eq!(
            next_refresh_interval(&response, &standard(), -1, -1),
            DEFAULT_REFRESH_INTERVAL
        );
    }

    #[test]
    fn comfortable_buffer_stretches_interval() {
        let response = live_response("2026-01-01T00:00:10Z");
        // buffer 5s > 2 * 2s update period: 1.5 * 2000ms
        assert_eq!(
            next_refresh_interval(&response, &standard(), 5_000, -1),
            Duration::from_millis(3_000)
        );
    }

    #[test]
    fn thin_buffer_halves_interval() {
        let response = live_response("2026-01-01T00:00:10Z");
        // buffer between one and two update periods: 0.5 * 2000ms
        assert_eq!(
            next_refresh_interval(&response, &standard(), 3_000, -1),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn near_empty_buffer_refreshes_at_a_third() {
        let response = live_response("2026-01-01T00:00:10Z");
        assert_eq!(
            next_refresh_interval(&response, &standard(), 1_800, -1),
            Duration::from_millis(600)
        );
    }

    #[test]
    fn interval_never_leaves_the_clamp_range() {
        let response = live_response("2026-01-01T00:00:10Z");
        for buffer in [-1i64, 0, 100, 1_000, 5_000, 20_000, 1_000_000] {
            let interval = next_refresh_interval(&response, &standard(), buffer, -1);
            assert!(interval >= MIN_REFRESH_INTERVAL, "buffer {buffer}");
            assert!(interval <= MAX_REFRESH_INTERVAL, "buffer {buffer}");
        }
    }

    #[test]
    fn huge_buffer_caps_at_max_interval() {
        let response = live_response("2026-01-01T00:00:10Z");
        assert_eq!(
            next_refresh_interval(&response, &standard(), 60_000, -1),
            MAX_REFRESH_INTERVAL
        );
    }

    #[test]
    fn event_stream_prefers_manifest_update_period() {
        let mut response = ManifestResponse::from_preprocessed(
            fixtures::event_manifest(),
            "http://example.com/m.mpd",
        );
        response.parse();
        // PT1S update period beats the 3s default.
        assert_eq!(
            next_refresh_interval(&response, &standard(), -1, -1),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn low_latency_ignores_buffer_shaping() {
        let response = ll_response();
        let mut profile = crate::low_latency::detect(response.mpd.as_ref().unwrap());
        assert!(profile.low_latency_mode);
        // Buffer of 5s would stretch a standard stream; low latency sticks to
        // the 2s update period.
        assert_eq!(
            next_refresh_interval(&response, &profile, 5_000, -1),
            Duration::from_millis(2_000)
        );
        // Empty buffer collapses to the floor.
        profile = crate::low_latency::detect(response.mpd.as_ref().unwrap());
        assert_eq!(
            next_refresh_interval(&response, &profile, 0, -1),
            MIN_REFRESH_INTERVAL
        );
    }

    #[test]
    fn content_ahead_relaxes_floor_polling() {
        let response = ll_response();
        let profile = crate::low_latency::detect(response.mpd.as_ref().unwrap());
        assert!(profile.low_latency_mode);
        // Fragments are 2s; with more than two of them still ahead of the
        // playhead the empty-buffer floor gives way to the 2s update period.
        assert_eq!(
            next_refresh_interval(&response, &profile, 0, 5_000),
            Duration::from_millis(2_000)
        );
        // At or below two fragments the floor stands.
        assert_eq!(
            next_refresh_interval(&response, &profile, 0, 3_000),
            MIN_REFRESH_INTERVAL
        );
        // An unknown delta never relaxes anything.
        assert_eq!(
            next_refresh_interval(&response, &profile, 0, -1),
            MIN_REFRESH_INTERVAL
        );
    }

    #[test]
    fn unchanged_publish_time_suppresses_push_twice() {
        let mut state = RefreshState::default();
        let response = live_response("2026-01-01T00:00:10Z");

        let first = state.evaluate(&response, &standard(), -1, -1);
        assert!(first.push);

        let second = state.evaluate(&response, &standard(), -1, -1);
        assert!(!second.push);
        assert_eq!(second.interval, MIN_REFRESH_INTERVAL);

        let third = state.evaluate(&response, &standard(), -1, -1);
        assert!(!third.push);
        assert_eq!(third.interval, MIN_REFRESH_INTERVAL);

        // Two minimal refreshes exhausted: normal cadence resumes.
        let fourth = state.evaluate(&response, &standard(), -1, -1);
        assert!(fourth.push);
        assert_eq!(fourth.interval, DEFAULT_REFRESH_INTERVAL);
    }

    #[test]
    fn new_publish_time_resets_minimal_counter() {
        let mut state = RefreshState::default();
        let old = live_response("2026-01-01T00:00:10Z");
        let new = live_response("2026-01-01T00:00:12Z");

        assert!(state.evaluate(&old, &standard(), -1, -1).push);
        assert!(!state.evaluate(&old, &standard(), -1, -1).push);

        let updated = state.evaluate(&new, &standard(), -1, -1);
        assert!(updated.push);

        // The counter starts over for the new publish time.
        assert!(!state.evaluate(&new, &standard(), -1, -1).push);
    }

    #[test]
    fn zero_publish_time_always_pushes() {
        let mut state = RefreshState::default();
        let mut response = live_response("2026-01-01T00:00:10Z");
        if let Some(mpd) = response.mpd.as_mut() {
            mpd.publishTime = None;
        }
        assert!(state.evaluate(&response, &standard(), -1, -1).push);
        assert!(state.evaluate(&response, &standard(), -1, -1).push);
    }
}
