use super::*;
use crate::models::{Artwork, Episode, ProgressKey, Season};
use crate::progress::MemoryProgressStore;
use std::thread;

const CLIP_SECS: f64 = 600.0;

/// Scripted media element. Time only moves when the test moves it.
struct FakeMedia {
    source: Option<String>,
    loads: Vec<String>,
    paused: bool,
    time: f64,
    duration: Option<f64>,
    muted: bool,
    reject_unmuted: bool,
    /// Backend without a decoder: every play fails
    no_backend: bool,
    /// Seeks complete silently
    drop_seeked: bool,
    seeks: Vec<f64>,
    events: Vec<MediaEvent>,
}

impl FakeMedia {
    fn new() -> Self {
        Self {
            source: None,
            loads: Vec::new(),
            paused: true,
            time: 0.0,
            duration: None,
            muted: false,
            reject_unmuted: false,
            no_backend: false,
            drop_seeked: false,
            seeks: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl MediaElement for FakeMedia {
    fn load(&mut self, url: &str) {
        self.source = Some(url.to_string());
        self.loads.push(url.to_string());
        self.paused = true;
        self.time = 0.0;
        self.duration = Some(CLIP_SECS);
        self.events.clear();
        self.events.push(MediaEvent::LoadedMetadata {
            duration: Some(CLIP_SECS),
        });
    }

    fn unload(&mut self) {
        self.source = None;
        self.duration = None;
        self.events.clear();
    }

    fn play(&mut self) -> Result<(), MediaError> {
        if self.no_backend {
            return Err(MediaError::Backend("no decoder".to_string()));
        }
        if self.source.is_none() {
            return Err(MediaError::NoSource);
        }
        if self.reject_unmuted && !self.muted {
            return Err(MediaError::PlayRejected("unmuted autoplay".to_string()));
        }
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn seek(&mut self, seconds: f64) {
        self.time = seconds;
        self.seeks.push(seconds);
        if !self.drop_seeked {
            self.events.push(MediaEvent::Seeked);
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn poll_events(&mut self) -> Vec<MediaEvent> {
        std::mem::take(&mut self.events)
    }

    fn latest_frame(&self) -> Option<FrameRef> {
        None
    }
}

/// Never answers within a test's lifetime
struct NeverLoader;

impl ManifestLoader for NeverLoader {
    fn load(&self, _url: &str) -> Result<String, StreamError> {
        thread::sleep(Duration::from_secs(60));
        Err(StreamError::Timeout)
    }
}

struct PlaylistLoader;

impl ManifestLoader for PlaylistLoader {
    fn load(&self, _url: &str) -> Result<String, StreamError> {
        Ok("#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg0.ts\n#EXT-X-ENDLIST\n".to_string())
    }
}

fn episode(number: u32, url: &str, kind: MediaKind) -> Episode {
    Episode {
        number,
        label: format!("E{}", number),
        thumbnail: None,
        url: url.to_string(),
        kind,
        credits_start: None,
    }
}

fn season(number: u32, episodes: Vec<Episode>) -> Season {
    Season {
        number,
        title: format!("Season {}", number),
        synopsis: None,
        art: None,
        episodes,
    }
}

fn series_with(seasons: Vec<Season>) -> Arc<CatalogEntry> {
    Arc::new(CatalogEntry {
        id: "demo".to_string(),
        title: "Demo".to_string(),
        background: Artwork::default(),
        genres: Vec::new(),
        age_rating: None,
        year: None,
        rating: None,
        synopsis: String::new(),
        season_count: seasons.len() as u32,
        seasons,
    })
}

fn demo_series() -> Arc<CatalogEntry> {
    series_with(vec![
        season(
            1,
            vec![
                episode(1, "http://media.test/s1e1.mp4", MediaKind::Mp4),
                episode(2, "http://media.test/s1e2.mp4", MediaKind::Mp4),
                episode(3, "http://media.test/s1e3.mp4", MediaKind::Mp4),
            ],
        ),
        season(2, vec![episode(1, "http://media.test/s2/master.m3u8", MediaKind::M3u8)]),
    ])
}

const S1E1: EpisodeRef = EpisodeRef { season: 1, episode: 1 };
const S1E2: EpisodeRef = EpisodeRef { season: 1, episode: 2 };
const S1E3: EpisodeRef = EpisodeRef { season: 1, episode: 3 };
const S2E1: EpisodeRef = EpisodeRef { season: 2, episode: 1 };

struct Harness {
    overlay: PlayerOverlay<FakeMedia>,
    store: Arc<MemoryProgressStore>,
    series: Arc<CatalogEntry>,
    now: Instant,
}

impl Harness {
    fn new() -> Self {
        Self::with(FakeMedia::new(), Arc::new(PlaylistLoader), demo_series())
    }

    fn with(media: FakeMedia, loader: Arc<dyn ManifestLoader>, series: Arc<CatalogEntry>) -> Self {
        let store = Arc::new(MemoryProgressStore::default());
        let mut overlay = PlayerOverlay::new(media, store.clone(), loader, OverlayConfig::default());
        overlay.set_series(Arc::clone(&series));
        Self {
            overlay,
            store,
            series,
            now: Instant::now(),
        }
    }

    fn open(&mut self, at: EpisodeRef, start_at: f64) -> SessionHandle {
        let request = PlaybackRequest::for_episode(&self.series, at, start_at).unwrap();
        let handle = self.overlay.open(request, self.now).unwrap();
        self.overlay.update(self.now);
        handle
    }

    /// Advance the clock; the playhead follows while playing
    fn tick(&mut self, secs: f64) {
        self.now += Duration::from_secs_f64(secs);
        if !self.overlay.media().paused {
            self.overlay.media_mut().time += secs;
        }
        self.overlay.update(self.now);
    }

    /// Advance the clock with the playhead stuck
    fn tick_frozen(&mut self, secs: f64) {
        self.now += Duration::from_secs_f64(secs);
        self.overlay.update(self.now);
    }

    /// Poll until the media has seen `count` loads (manifest threads are real)
    fn wait_for_loads(&mut self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.overlay.media().loads.len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
            self.overlay.update(self.now);
        }
        assert_eq!(self.overlay.media().loads.len(), count);
    }

    fn set_time(&mut self, time: f64) {
        self.overlay.media_mut().time = time;
        self.overlay.update(self.now);
    }

    fn key(&mut self, key: RemoteKey) -> bool {
        self.overlay.handle_key(key, self.now)
    }

    fn saved(&self, at: EpisodeRef) -> Option<f64> {
        self.store
            .get(ProgressKey::new("demo", at).as_str())
            .map(|r| r.time)
    }

    fn countdown(&self) -> Option<u8> {
        self.overlay.prompt().map(|p| p.countdown)
    }
}

#[test]
fn test_open_resumes_from_saved_position() {
    let mut h = Harness::new();
    h.open(S1E1, 42.0);

    assert_eq!(h.overlay.state(), PlayerState::Playing);
    assert_eq!(h.overlay.media().seeks, vec![42.0]);
    assert_eq!(h.overlay.current_time(), 42.0);
}

#[test]
fn test_open_ignores_start_outside_range() {
    let mut h = Harness::new();
    h.open(S1E1, 0.5);
    assert!(h.overlay.media().seeks.is_empty());

    h.open(S1E2, CLIP_SECS + 10.0);
    assert!(h.overlay.media().seeks.is_empty());
    assert_eq!(h.overlay.media().loads.len(), 2);
}

#[test]
fn test_autoplay_rejection_retries_muted() {
    let media = FakeMedia {
        reject_unmuted: true,
        ..FakeMedia::new()
    };
    let mut h = Harness::with(media, Arc::new(PlaylistLoader), demo_series());
    h.open(S1E1, 0.0);

    assert_eq!(h.overlay.state(), PlayerState::Playing);
    assert!(h.overlay.media().is_muted());
}

#[test]
fn test_scrub_round_trip_keeps_play_state() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.set_time(30.0);

    // Right on play/pause enters scrub mode
    assert!(h.key(RemoteKey::Right));
    assert!(h.overlay.is_scrubbing());
    assert_eq!(h.overlay.visible_controls(), vec![Control::SeekBar]);
    assert!(h.overlay.media().is_paused());

    assert!(h.key(RemoteKey::Enter));
    assert!(!h.overlay.is_scrubbing());
    assert_eq!(h.overlay.state(), PlayerState::Playing);
    assert_eq!(h.overlay.focus(), Control::PlayPause);
    // No movement, nothing written
    assert_eq!(h.saved(S1E1), None);

    h.overlay.toggle_pause(h.now);
    h.key(RemoteKey::Right);
    h.key(RemoteKey::Enter);
    assert_eq!(h.overlay.state(), PlayerState::Paused);
}

#[test]
fn test_scrub_steps_clamp_and_commit_on_exit() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.set_time(5.0);

    h.key(RemoteKey::Right);
    h.key(RemoteKey::Left);
    assert_eq!(h.overlay.scrub().unwrap().target, 0.0);
    h.key(RemoteKey::Right);
    h.key(RemoteKey::Right);
    assert_eq!(h.overlay.scrub().unwrap().target, 20.0);
    assert!(h.overlay.is_timer_armed(TimerKind::PreviewTimeout));

    // The seek lands and the preview settles
    h.tick_frozen(0.1);
    assert!(matches!(h.overlay.scrub().unwrap().preview, Preview::Ready { target, .. } if target == 20.0));
    assert!(!h.overlay.is_timer_armed(TimerKind::PreviewTimeout));

    h.key(RemoteKey::Enter);
    assert_eq!(h.saved(S1E1), Some(20.0));
    assert_eq!(h.overlay.state(), PlayerState::Playing);
}

#[test]
fn test_pause_persists_position() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.set_time(3.0);
    h.overlay.toggle_pause(h.now);
    // Below the minimum, nothing is stored
    assert_eq!(h.saved(S1E1), None);

    h.overlay.toggle_pause(h.now);
    h.set_time(73.0);
    h.overlay.toggle_pause(h.now);
    assert_eq!(h.saved(S1E1), Some(73.0));
    assert_eq!(h.overlay.state(), PlayerState::Paused);
}

#[test]
fn test_autosave_while_playing() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.tick(4.0);
    assert_eq!(h.saved(S1E1), None);
    h.tick(1.0);
    assert_eq!(h.saved(S1E1), Some(5.0));
}

#[test]
fn test_restart_leaves_store_alone() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.set_time(300.0);
    h.overlay.toggle_pause(h.now);
    assert_eq!(h.saved(S1E1), Some(300.0));

    h.overlay.restart(h.now);
    assert_eq!(h.overlay.current_time(), 0.0);
    assert_eq!(h.overlay.state(), PlayerState::Playing);
    assert_eq!(h.saved(S1E1), Some(300.0));
}

#[test]
fn test_countdown_runs_only_while_playing() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    // Credits offset of a 600s clip is 510s
    h.set_time(520.0);
    assert_eq!(h.countdown(), Some(8));
    assert_eq!(h.overlay.prompt().unwrap().next, S1E2);

    h.tick(1.0);
    assert_eq!(h.countdown(), Some(7));
    h.tick(1.0);
    assert_eq!(h.countdown(), Some(6));

    h.overlay.toggle_pause(h.now);
    h.tick(5.0);
    assert_eq!(h.countdown(), Some(6));

    h.overlay.toggle_pause(h.now);
    h.tick(1.0);
    assert_eq!(h.countdown(), Some(5));
}

#[test]
fn test_countdown_zero_advances() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.set_time(520.0);
    for _ in 0..8 {
        h.tick(1.0);
    }

    assert_eq!(h.overlay.request().unwrap().origin, S1E2);
    assert_eq!(h.overlay.media().loads.last().unwrap(), "http://media.test/s1e2.mp4");
    assert_eq!(h.saved(S1E1), None);
    assert!(h.overlay.take_events().contains(&OverlayEvent::ProgressReset(S1E1)));
}

#[test]
fn test_skip_keeps_playing_and_suppresses_prompt() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.set_time(520.0);
    assert!(h.overlay.visible_controls().contains(&Control::Skip));

    h.overlay.skip(h.now);
    assert_eq!(h.overlay.state(), PlayerState::Playing);
    assert!(h.overlay.prompt().unwrap().skipped);
    assert!(!h.overlay.is_timer_armed(TimerKind::Countdown));

    h.tick(2.0);
    assert!(h.overlay.prompt().is_none());
    // Stays gone for the rest of the episode
    h.tick(10.0);
    assert!(h.overlay.prompt().is_none());
    assert_eq!(h.overlay.request().unwrap().origin, S1E1);
}

#[test]
fn test_prompt_resets_after_seeking_back() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.set_time(520.0);
    h.tick(1.0);
    assert_eq!(h.countdown(), Some(7));

    // Within the margin: still shown
    h.set_time(508.0);
    assert!(h.overlay.prompt().is_some());

    h.set_time(500.0);
    assert!(h.overlay.prompt().is_none());
    assert!(!h.overlay.is_timer_armed(TimerKind::Countdown));

    h.set_time(515.0);
    assert_eq!(h.countdown(), Some(8));
}

#[test]
fn test_no_prompt_on_last_episode() {
    let mut h = Harness::new();
    h.open(S1E3, 0.0);
    h.set_time(590.0);
    // Next is S2E1, still a prompt
    assert_eq!(h.overlay.prompt().unwrap().next, S2E1);

    let single = series_with(vec![season(1, vec![episode(1, "http://media.test/only.mp4", MediaKind::Mp4)])]);
    let mut h = Harness::with(FakeMedia::new(), Arc::new(PlaylistLoader), single);
    h.open(S1E1, 0.0);
    h.set_time(590.0);
    assert!(h.overlay.prompt().is_none());
}

#[test]
fn test_ended_deletes_record_and_advances() {
    let mut h = Harness::new();
    h.store.put(ProgressRecord::new(&ProgressKey::new("demo", S1E2), 40.0, Some(CLIP_SECS), 1));
    h.open(S1E2, 40.0);
    h.overlay.take_events();

    h.overlay.media_mut().events.push(MediaEvent::Ended);
    h.tick_frozen(0.0);
    assert_eq!(h.saved(S1E2), None);
    assert!(h.overlay.is_timer_armed(TimerKind::AdvanceDelay));

    h.tick_frozen(1.5);
    assert_eq!(h.overlay.request().unwrap().origin, S1E3);
    assert_eq!(h.overlay.state(), PlayerState::Playing);
    assert_eq!(h.saved(S1E2), None);

    let events = h.overlay.take_events();
    assert!(events.contains(&OverlayEvent::ProgressReset(S1E2)));
    assert!(events.contains(&OverlayEvent::NowPlaying(S1E3)));
}

#[test]
fn test_ended_on_final_episode_closes() {
    let single = series_with(vec![season(1, vec![episode(1, "http://media.test/only.mp4", MediaKind::Mp4)])]);
    let mut h = Harness::with(FakeMedia::new(), Arc::new(PlaylistLoader), single);
    h.open(S1E1, 0.0);
    h.overlay.media_mut().events.push(MediaEvent::Ended);
    h.tick_frozen(0.0);

    assert_eq!(h.overlay.state(), PlayerState::Closed);
    assert!(h.overlay.take_events().contains(&OverlayEvent::Closed));
}

#[test]
fn test_manifest_timeout_falls_back_to_native() {
    let mut h = Harness::with(FakeMedia::new(), Arc::new(NeverLoader), demo_series());
    h.open(S2E1, 0.0);
    assert_eq!(h.overlay.state(), PlayerState::Opening);
    assert!(h.overlay.hls_attached());
    assert!(h.overlay.media().loads.is_empty());

    h.tick_frozen(7.0);
    assert_eq!(h.overlay.state(), PlayerState::Opening);

    h.tick_frozen(1.0);
    assert_eq!(h.overlay.state(), PlayerState::Playing);
    assert!(!h.overlay.hls_attached());
    assert_eq!(h.overlay.media().loads, vec!["http://media.test/s2/master.m3u8".to_string()]);
}

#[test]
fn test_manifest_ready_loads_playlist() {
    let mut h = Harness::new();
    h.open(S2E1, 0.0);

    let deadline = Instant::now() + Duration::from_secs(5);
    while h.overlay.media().loads.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
        h.overlay.update(h.now);
    }

    assert_eq!(h.overlay.media().loads, vec!["http://media.test/s2/master.m3u8".to_string()]);
    assert_eq!(h.overlay.state(), PlayerState::Playing);
    assert!(!h.overlay.is_timer_armed(TimerKind::ManifestTimeout));
}

#[test]
fn test_close_cancels_every_timer() {
    let mut h = Harness::new();
    let handle = h.open(S1E1, 0.0);
    h.set_time(520.0);
    h.overlay.enter_scrub(h.now);
    h.overlay.close(h.now);

    assert_eq!(h.overlay.state(), PlayerState::Closed);
    assert!(h.overlay.next_deadline().is_none());
    assert!(h.overlay.media().source.is_none());
    assert_eq!(h.saved(S1E1), Some(520.0));

    let events = h.overlay.take_events();
    assert!(events.contains(&OverlayEvent::FocusEpisode {
        episode: S1E1,
        highlight: true
    }));
    assert_eq!(events.last(), Some(&OverlayEvent::Closed));

    // Nothing fires afterwards
    h.tick_frozen(30.0);
    assert!(h.overlay.take_events().is_empty());
    assert!(!h.overlay.close_session(handle, h.now));
}

#[test]
fn test_stale_handle_does_not_close_newer_session() {
    let mut h = Harness::new();
    let first = h.open(S1E1, 0.0);
    let second = h.open(S1E2, 0.0);

    assert!(!h.overlay.close_session(first, h.now));
    assert!(h.overlay.is_open());
    assert!(h.overlay.close_session(second, h.now));
}

#[test]
fn test_back_closes_and_hidden_controls_wake_first() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.tick(6.0);
    assert!(!h.overlay.controls_visible());

    // First press only reveals
    assert!(h.key(RemoteKey::Down));
    assert!(h.overlay.controls_visible());
    assert_eq!(h.overlay.focus(), Control::PlayPause);

    h.key(RemoteKey::Down);
    assert_eq!(h.overlay.focus(), Control::Hide);

    assert!(h.key(RemoteKey::Back));
    assert_eq!(h.overlay.state(), PlayerState::Closed);
    assert!(!h.key(RemoteKey::Enter));
}

#[test]
fn test_hide_and_reveal_keep_session() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.set_time(50.0);
    h.overlay.take_events();

    h.overlay.activate(Control::Hide, h.now);
    assert!(!h.overlay.is_visible());
    assert_eq!(h.overlay.state(), PlayerState::Paused);
    assert_eq!(h.saved(S1E1), Some(50.0));
    assert_eq!(
        h.overlay.take_events(),
        vec![OverlayEvent::FocusEpisode {
            episode: S1E1,
            highlight: false
        }]
    );

    assert!(!h.overlay.reveal(S1E2, h.now));
    assert!(h.overlay.reveal(S1E1, h.now));
    assert!(h.overlay.is_visible());
    assert_eq!(h.overlay.state(), PlayerState::Playing);
    assert_eq!(h.overlay.media().loads.len(), 1);
}

#[test]
fn test_stall_reloads_and_resumes() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.set_time(30.0);

    // First poll records the position, two quiet ones trigger recovery
    h.tick_frozen(4.0);
    h.tick_frozen(4.0);
    assert_eq!(h.overlay.media().loads.len(), 1);
    h.tick_frozen(4.0);
    assert_eq!(h.overlay.media().loads.len(), 2);

    h.tick_frozen(0.0);
    assert_eq!(h.overlay.current_time(), 30.0);
    assert_eq!(h.overlay.state(), PlayerState::Playing);
}

#[test]
fn test_external_kind_is_handed_off() {
    let mut h = Harness::new();
    let request = PlaybackRequest {
        url: "https://ok.ru/video/123".to_string(),
        kind: MediaKind::Ok,
        start_at: 0.0,
        origin: S1E1,
        progress_key: ProgressKey::new("demo", S1E1),
        credits_start: None,
        title: "Demo".to_string(),
    };

    assert!(h.overlay.open(request, h.now).is_none());
    assert_eq!(h.overlay.state(), PlayerState::Closed);
    assert!(matches!(
        h.overlay.take_events().as_slice(),
        [OverlayEvent::LaunchExternal { url, .. }] if url == "https://ok.ru/video/123"
    ));
}

#[test]
fn test_hide_while_opening_defers_start_until_reveal() {
    let mut h = Harness::new();
    let request = PlaybackRequest::for_episode(&h.series, S2E1, 0.0).unwrap();
    h.overlay.open(request, h.now);
    assert_eq!(h.overlay.state(), PlayerState::Opening);
    h.overlay.activate(Control::Hide, h.now);
    assert!(!h.overlay.is_visible());

    h.wait_for_loads(1);
    assert!(!h.overlay.is_visible());
    assert_eq!(h.overlay.state(), PlayerState::Paused);
    assert!(h.overlay.media().paused);
    assert!(!h.overlay.is_timer_armed(TimerKind::Autosave));

    // Nothing moves while hidden
    h.tick(30.0);
    assert_eq!(h.overlay.state(), PlayerState::Paused);
    assert!(!h.overlay.is_visible());

    assert!(h.overlay.reveal(S2E1, h.now));
    assert!(h.overlay.is_visible());
    assert_eq!(h.overlay.state(), PlayerState::Playing);
    assert_eq!(h.overlay.media().loads.len(), 1);
}

#[test]
fn test_hide_during_advance_delay_stays_hidden() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.overlay.media_mut().events.push(MediaEvent::Ended);
    h.tick_frozen(0.0);
    assert!(h.overlay.is_timer_armed(TimerKind::AdvanceDelay));

    h.overlay.activate(Control::Hide, h.now);
    assert!(!h.overlay.is_timer_armed(TimerKind::AdvanceDelay));
    h.tick_frozen(3.0);
    assert!(!h.overlay.is_visible());
    assert_eq!(h.overlay.request().unwrap().origin, S1E1);

    // Coming back picks up where the countdown would have gone
    assert!(h.overlay.reveal(S1E1, h.now));
    assert!(h.overlay.is_visible());
    assert_eq!(h.overlay.request().unwrap().origin, S1E2);
    assert_eq!(h.overlay.state(), PlayerState::Playing);
}

#[test]
fn test_preview_settles_when_seek_never_reports() {
    let mut media = FakeMedia::new();
    media.drop_seeked = true;
    let mut h = Harness::with(media, Arc::new(PlaylistLoader), demo_series());
    h.open(S1E1, 0.0);
    h.set_time(100.0);

    h.overlay.enter_scrub(h.now);
    h.key(RemoteKey::Right);
    assert!(matches!(h.overlay.scrub().unwrap().preview, Preview::Pending { target } if target == 110.0));

    h.tick_frozen(1.0);
    assert!(matches!(h.overlay.scrub().unwrap().preview, Preview::Pending { .. }));
    h.tick_frozen(0.5);
    assert!(matches!(h.overlay.scrub().unwrap().preview, Preview::Ready { target, .. } if target == 110.0));
    assert!(!h.overlay.is_timer_armed(TimerKind::PreviewTimeout));
}

#[test]
fn test_media_error_reloads_from_last_position() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.set_time(75.0);

    h.overlay.media_mut().events.push(MediaEvent::Error("decoder reset".to_string()));
    h.tick_frozen(0.0);
    assert_eq!(h.overlay.media().loads.len(), 2);
    assert_eq!(h.overlay.last_error(), Some("decoder reset"));

    h.tick_frozen(0.0);
    assert_eq!(h.overlay.current_time(), 75.0);
    assert_eq!(h.overlay.state(), PlayerState::Playing);
}

#[test]
fn test_adaptive_recovery_reattaches_stream() {
    let mut h = Harness::new();
    h.open(S2E1, 0.0);
    h.wait_for_loads(1);
    let attaches = h.overlay.hls.as_ref().unwrap().attach_count();
    h.set_time(42.0);

    h.overlay.media_mut().events.push(MediaEvent::Error("segment 404".to_string()));
    h.tick_frozen(0.0);
    assert_eq!(h.overlay.state(), PlayerState::Opening);
    assert!(h.overlay.hls_attached());
    assert_eq!(h.overlay.hls.as_ref().unwrap().attach_count(), attaches + 1);
    assert!(h.overlay.is_timer_armed(TimerKind::ManifestTimeout));

    h.wait_for_loads(2);
    h.tick_frozen(0.0);
    assert_eq!(h.overlay.state(), PlayerState::Playing);
    assert_eq!(h.overlay.current_time(), 42.0);
    assert!(!h.overlay.is_timer_armed(TimerKind::ManifestTimeout));
}

#[test]
fn test_recovery_gives_up_after_limit() {
    let mut h = Harness::new();
    h.open(S1E1, 0.0);
    h.set_time(20.0);

    for attempt in 1..=3 {
        h.overlay.media_mut().events.push(MediaEvent::Error("broken".to_string()));
        h.tick_frozen(0.0);
        assert_eq!(h.overlay.media().loads.len(), 1 + attempt);
    }

    h.overlay.media_mut().events.push(MediaEvent::Error("broken".to_string()));
    h.tick_frozen(0.0);
    assert_eq!(h.overlay.media().loads.len(), 4);
    assert_eq!(h.overlay.state(), PlayerState::Paused);
    assert_eq!(h.overlay.last_error(), Some("Playback stalled"));
    assert!(!h.overlay.is_timer_armed(TimerKind::StallCheck));
}

#[test]
fn test_missing_backend_hands_off_to_external_player() {
    let mut media = FakeMedia::new();
    media.no_backend = true;
    let mut h = Harness::with(media, Arc::new(PlaylistLoader), demo_series());
    h.open(S1E2, 0.0);

    assert_eq!(h.overlay.state(), PlayerState::Closed);
    let events = h.overlay.take_events();
    assert!(events.contains(&OverlayEvent::Closed));
    assert!(matches!(
        events.last(),
        Some(OverlayEvent::LaunchExternal { url, .. }) if url == "http://media.test/s1e2.mp4"
    ));
}
