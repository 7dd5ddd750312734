// Low-latency detection: runs once on the first successfully parsed live
// manifest, then the result is latched for the rest of the session.

use dash_mpd::{MPD, SegmentTemplate};
use std::time::Duration;
use tracing::{debug, info};

/// Low-latency service attributes read from the manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LowLatencyProfile {
    pub low_latency_mode: bool,
    /// Seconds a segment becomes addressable before it is complete.
    pub availability_time_offset: f64,
    pub availability_time_complete: bool,
    /// Nominal duration of one media segment.
    pub fragment_duration: Duration,
    /// Whether the duration came from a segment timeline entry rather than
    /// the template's flat duration attribute.
    pub timeline_based: bool,
}

fn fragment_duration(duration: f64, timescale: u64) -> Duration {
    if timescale == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(duration / timescale as f64)
}

/// Scan periods for the first segment template carrying an
/// `availabilityTimeOffset`; a positive offset marks the stream low-latency.
/// The template is taken from the period's first adaptation set, falling back
/// to that set's first representation.
pub fn detect(mpd: &MPD) -> LowLatencyProfile {
    let mut profile = LowLatencyProfile::default();

    for period in &mpd.periods {
        let Some(adaptation) = period.adaptations.first() else {
            continue;
        };
        let template: Option<&SegmentTemplate> = adaptation
            .SegmentTemplate
            .as_ref()
            .or_else(|| {
                adaptation
                    .representations
                    .first()
                    .and_then(|r| r.SegmentTemplate.as_ref())
            });
        let Some(template) = template else {
            continue;
        };
        let Some(offset) = template.availabilityTimeOffset else {
            continue;
        };

        profile.availability_time_offset = offset;
        profile.availability_time_complete = template.availabilityTimeComplete.unwrap_or(false);
        profile.low_latency_mode = offset > 0.0;
        info!(
            availability_time_offset = offset,
            availability_time_complete = profile.availability_time_complete,
            "Read low-latency availability attributes"
        );

        if profile.low_latency_mode {
            let timescale = template.timescale.unwrap_or(1);
            if let Some(timeline) = template.SegmentTimeline.as_ref() {
                if let Some(first) = timeline.segments.first() {
                    profile.fragment_duration = fragment_duration(first.d as f64, timescale);
                    profile.timeline_based = true;
                }
            } else if let Some(duration) = template.duration {
                profile.fragment_duration = fragment_duration(duration, timescale);
            }
            debug!(
                fragment_duration_ms = profile.fragment_duration.as_millis() as u64,
                timeline_based = profile.timeline_based,
                "Computed low-latency fragment duration"
            );
        }
        break;
    }

    if !profile.low_latency_mode {
        debug!("No positive availabilityTimeOffset found; standard latency");
    }
    profile
}
