//! Series player overlay
//!
//! Contains the playback state machine and the pieces it is built from.

mod controls;
mod media;
mod overlay;
mod scheduler;
pub mod view;

use crate::models::{CatalogEntry, EpisodeRef, MediaKind, ProgressKey};
use std::time::Duration;

// Re-export public types
pub use controls::{navigate, Control, Direction, NavOutcome};
pub use media::{FrameRef, MediaElement, MediaError, MediaEvent, VideoFrame};
pub use overlay::{
    NextPrompt, OverlayEvent, PlayerOverlay, PlayerState, Preview, RemoteKey, ScrubView, SessionHandle,
};
pub use scheduler::{Scheduler, TimerKind, TimerToken};

/// Prompt appears this long before the end at the latest
pub const CREDITS_TAIL_SECS: f64 = 90.0;
/// ...or at this share of the runtime, whichever comes first
pub const CREDITS_TAIL_RATIO: f64 = 0.12;

/// Everything needed to start one episode
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    pub url: String,
    pub kind: MediaKind,
    /// Resume position in seconds, 0 to start over
    pub start_at: f64,
    /// Grid tile the playback came from, focus returns there
    pub origin: EpisodeRef,
    pub progress_key: ProgressKey,
    pub credits_start: Option<f64>,
    pub title: String,
}

impl PlaybackRequest {
    pub fn for_episode(entry: &CatalogEntry, at: EpisodeRef, start_at: f64) -> Option<Self> {
        let episode = entry.episode(at)?;
        Some(Self {
            url: episode.url.clone(),
            kind: episode.kind,
            start_at: start_at.max(0.0),
            origin: at,
            progress_key: ProgressKey::new(&entry.id, at),
            credits_start: episode.credits_start,
            title: format!("{} · S{} {}", entry.title, at.season, episode.label),
        })
    }
}

/// Timings and thresholds of the overlay
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    pub autosave_every: Duration,
    pub idle_hide_after: Duration,
    pub countdown_from: u8,
    pub skip_grace: Duration,
    /// Seconds moved by one scrub step
    pub scrub_step: f64,
    pub preview_timeout: Duration,
    pub manifest_timeout: Duration,
    pub stall_poll: Duration,
    /// Consecutive stalled polls before recovery kicks in
    pub stall_strikes: u8,
    /// Recoveries allowed per episode before giving up
    pub max_recoveries: u8,
    pub advance_delay: Duration,
    /// Seconds below the credits offset that reset the prompt
    pub prompt_reset_margin: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            autosave_every: Duration::from_secs(5),
            idle_hide_after: Duration::from_secs(5),
            countdown_from: 8,
            skip_grace: Duration::from_secs(2),
            scrub_step: 10.0,
            preview_timeout: Duration::from_millis(1500),
            manifest_timeout: Duration::from_secs(8),
            stall_poll: Duration::from_secs(4),
            stall_strikes: 2,
            max_recoveries: 3,
            advance_delay: Duration::from_millis(1500),
            prompt_reset_margin: 3.0,
        }
    }
}

/// Where the next-episode prompt becomes eligible. An explicit offset wins;
/// otherwise the earlier of `duration - 90s` and `duration * 0.88`, ignoring
/// candidates that would land at or before the start.
pub fn credits_offset(duration: f64, explicit: Option<f64>) -> Option<f64> {
    if let Some(offset) = explicit.filter(|o| o.is_finite() && *o > 0.0) {
        return Some(offset);
    }
    if !duration.is_finite() || duration <= 0.0 {
        return None;
    }
    [duration - CREDITS_TAIL_SECS, duration * (1.0 - CREDITS_TAIL_RATIO)]
        .into_iter()
        .filter(|o| *o > 0.0)
        .reduce(f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credits_offset_prefers_earlier_candidate() {
        // 45 min: tail rule gives 2610, ratio gives 2376
        assert_eq!(credits_offset(2700.0, None), Some(2700.0 * (1.0 - CREDITS_TAIL_RATIO)));
        // 10 min: tail rule gives 510, ratio gives 528
        assert_eq!(credits_offset(600.0, None), Some(510.0));
    }

    #[test]
    fn test_credits_offset_short_and_explicit() {
        assert_eq!(credits_offset(60.0, None), Some(60.0 * (1.0 - CREDITS_TAIL_RATIO)));
        assert_eq!(credits_offset(2700.0, Some(2500.0)), Some(2500.0));
        assert_eq!(credits_offset(0.0, None), None);
    }
}
