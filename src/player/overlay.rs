//! The player overlay state machine
//!
//! States: `Closed -> Opening -> Playing <-> Paused`, with two orthogonal
//! sub-states: scrub (seeking with a frame preview) and the next-episode
//! prompt. The overlay owns the only media element and the only HLS
//! session; `close` is the single cancellation point for every timer.
//!
//! The UI loop calls [`PlayerOverlay::update`] every frame with the current
//! instant, and forwards key presses to [`PlayerOverlay::handle_key`].

use super::controls::{navigate, Control, Direction, NavOutcome};
use super::media::{FrameRef, MediaElement, MediaError, MediaEvent};
use super::scheduler::{Scheduler, TimerKind, TimerToken};
use super::{credits_offset, OverlayConfig, PlaybackRequest};
use crate::hls::{HlsSession, ManifestLoader, SessionEvent, StreamError};
use crate::models::{CatalogEntry, EpisodeRef, MediaKind, ProgressRecord};
use crate::progress::{now_ms, ProgressStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Closed,
    Opening,
    Playing,
    Paused,
}

/// Remote-control style input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKey {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Back,
}

/// Notifications for the page hosting the overlay
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    /// Move grid focus to this tile, optionally flashing it
    FocusEpisode { episode: EpisodeRef, highlight: bool },
    /// The tile's progress indicator should be cleared
    ProgressReset(EpisodeRef),
    NowPlaying(EpisodeRef),
    /// Played outside the overlay: `ok` links, or no built-in decoder
    LaunchExternal { url: String, title: String },
    Closed,
}

/// Identifies one `open`; closing with a stale handle is a no-op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

#[derive(Debug, Clone, PartialEq)]
pub struct NextPrompt {
    pub next: EpisodeRef,
    pub countdown: u8,
    /// Skip was pressed, the prompt is on its way out
    pub skipped: bool,
}

#[derive(Debug, Clone)]
pub enum Preview {
    /// Waiting for the media to land on `target`
    Pending { target: f64 },
    Ready { target: f64, frame: Option<FrameRef> },
}

/// Read-only view of scrub mode for rendering
#[derive(Debug, Clone)]
pub struct ScrubView {
    pub target: f64,
    pub preview: Preview,
}

struct Scrub {
    resume_on_exit: bool,
    origin_time: f64,
    target: f64,
    preview: Preview,
    preview_token: Option<TimerToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Opening,
    Open,
}

struct Session {
    handle: SessionHandle,
    request: PlaybackRequest,
    /// Seek target applied once metadata arrives
    pending_start: Option<f64>,
    credits_offset: Option<f64>,
    /// Skip was used, no prompt for the rest of this session
    prompt_suppressed: bool,
    /// Ended or advanced: nothing more is saved for this episode
    finished: bool,
    native_fallback: bool,
    /// Source became ready while hidden; playback starts on reveal
    start_deferred: bool,
    last_known_time: f64,
    last_polled_time: f64,
    stall_strikes: u8,
    recoveries: u8,
}

impl Session {
    fn new(handle: SessionHandle, request: PlaybackRequest) -> Self {
        let pending_start = Some(request.start_at).filter(|s| *s > 0.0);
        Self {
            handle,
            request,
            pending_start,
            credits_offset: None,
            prompt_suppressed: false,
            finished: false,
            native_fallback: false,
            start_deferred: false,
            last_known_time: 0.0,
            last_polled_time: -1.0,
            stall_strikes: 0,
            recoveries: 0,
        }
    }
}

pub struct PlayerOverlay<M: MediaElement> {
    media: M,
    store: Arc<dyn ProgressStore>,
    loader: Arc<dyn ManifestLoader>,
    /// Created on the first adaptive stream
    hls: Option<HlsSession>,
    series: Option<Arc<CatalogEntry>>,
    config: OverlayConfig,
    scheduler: Scheduler,
    phase: Phase,
    visible: bool,
    controls_visible: bool,
    focus: Control,
    session: Option<Session>,
    handles_issued: u64,
    scrub: Option<Scrub>,
    prompt: Option<NextPrompt>,
    last_error: Option<String>,
    events: Vec<OverlayEvent>,
}

impl<M: MediaElement> PlayerOverlay<M> {
    pub fn new(
        media: M,
        store: Arc<dyn ProgressStore>,
        loader: Arc<dyn ManifestLoader>,
        config: OverlayConfig,
    ) -> Self {
        Self {
            media,
            store,
            loader,
            hls: None,
            series: None,
            config,
            scheduler: Scheduler::new(),
            phase: Phase::Closed,
            visible: false,
            controls_visible: false,
            focus: Control::PlayPause,
            session: None,
            handles_issued: 0,
            scrub: None,
            prompt: None,
            last_error: None,
            events: Vec::new(),
        }
    }

    /// Season/episode model used to find the next episode
    pub fn set_series(&mut self, series: Arc<CatalogEntry>) {
        self.series = Some(series);
    }

    // ----- accessors -----

    pub fn state(&self) -> PlayerState {
        match self.phase {
            Phase::Closed => PlayerState::Closed,
            Phase::Opening => PlayerState::Opening,
            Phase::Open if self.media.is_paused() => PlayerState::Paused,
            Phase::Open => PlayerState::Playing,
        }
    }

    pub fn is_open(&self) -> bool {
        self.phase != Phase::Closed
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn controls_visible(&self) -> bool {
        self.controls_visible
    }

    pub fn focus(&self) -> Control {
        self.focus
    }

    pub fn prompt(&self) -> Option<&NextPrompt> {
        self.prompt.as_ref()
    }

    pub fn scrub(&self) -> Option<ScrubView> {
        self.scrub.as_ref().map(|s| ScrubView {
            target: s.target,
            preview: s.preview.clone(),
        })
    }

    pub fn is_scrubbing(&self) -> bool {
        self.scrub.is_some()
    }

    pub fn request(&self) -> Option<&PlaybackRequest> {
        self.session.as_ref().map(|s| &s.request)
    }

    pub fn handle(&self) -> Option<SessionHandle> {
        self.session.as_ref().map(|s| s.handle)
    }

    pub fn current_time(&self) -> f64 {
        self.media.current_time()
    }

    pub fn duration(&self) -> Option<f64> {
        self.media.duration()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut M {
        &mut self.media
    }

    pub fn is_timer_armed(&self, kind: TimerKind) -> bool {
        self.scheduler.is_armed(kind)
    }

    pub fn hls_attached(&self) -> bool {
        self.hls.as_ref().is_some_and(HlsSession::is_attached)
    }

    /// When the UI should wake up next even without input
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn take_events(&mut self) -> Vec<OverlayEvent> {
        std::mem::take(&mut self.events)
    }

    fn skip_visible(&self) -> bool {
        self.prompt.as_ref().is_some_and(|p| !p.skipped)
    }

    /// Controls currently on screen; scrub mode keeps only the seek bar
    pub fn visible_controls(&self) -> Vec<Control> {
        if self.scrub.is_some() {
            return vec![Control::SeekBar];
        }
        let mut controls = vec![Control::Restart, Control::PlayPause, Control::SeekBar, Control::Hide];
        if self.skip_visible() {
            controls.push(Control::Skip);
        }
        controls
    }

    // ----- lifecycle -----

    /// Start playing `request`, replacing whatever was playing. `ok` links
    /// are handed to the host instead and return `None`.
    pub fn open(&mut self, request: PlaybackRequest, now: Instant) -> Option<SessionHandle> {
        if request.kind == MediaKind::Ok {
            info!(url = %request.url, "handing episode to external player");
            self.events.push(OverlayEvent::LaunchExternal {
                url: request.url,
                title: request.title,
            });
            return None;
        }

        self.teardown();

        self.handles_issued += 1;
        let handle = SessionHandle(self.handles_issued);
        info!(
            title = %request.title,
            url = %request.url,
            kind = %request.kind,
            start_at = request.start_at,
            "opening episode"
        );

        let origin = request.origin;
        let kind = request.kind;
        let url = request.url.clone();
        self.session = Some(Session::new(handle, request));
        self.phase = Phase::Opening;
        self.visible = true;
        self.focus = Control::PlayPause;
        self.last_error = None;
        self.media.set_muted(false);
        self.touch(now);
        self.events.push(OverlayEvent::NowPlaying(origin));

        match kind {
            MediaKind::M3u8 => {
                let loader = Arc::clone(&self.loader);
                self.hls
                    .get_or_insert_with(|| HlsSession::new(loader))
                    .attach(&url);
                self.scheduler
                    .once(TimerKind::ManifestTimeout, now, self.config.manifest_timeout);
            }
            _ => {
                self.media.load(&url);
                self.start_playback(now);
            }
        }

        Some(handle)
    }

    /// Close the overlay: persist, release the stream, stop every timer and
    /// return focus to the originating tile.
    pub fn close(&mut self, _now: Instant) {
        if self.phase == Phase::Closed {
            return;
        }
        let origin = self.session.as_ref().map(|s| s.request.origin);
        self.teardown();
        self.phase = Phase::Closed;
        self.visible = false;
        self.controls_visible = false;
        info!("player closed");

        if let Some(episode) = origin {
            self.events.push(OverlayEvent::FocusEpisode {
                episode,
                highlight: true,
            });
        }
        self.events.push(OverlayEvent::Closed);
    }

    /// Close only if `handle` is still the current session
    pub fn close_session(&mut self, handle: SessionHandle, now: Instant) -> bool {
        if self.handle() != Some(handle) {
            return false;
        }
        self.close(now);
        true
    }

    fn teardown(&mut self) {
        self.save_progress();
        if let Some(hls) = self.hls.as_mut() {
            hls.detach();
        }
        if self.session.is_some() {
            self.media.pause();
            self.media.unload();
        }
        self.scheduler.cancel_all();
        self.scrub = None;
        self.prompt = None;
        self.session = None;
    }

    /// Bring a hidden overlay back if it is still playing `origin`
    pub fn reveal(&mut self, origin: EpisodeRef, now: Instant) -> bool {
        let same_episode = self.session.as_ref().is_some_and(|s| s.request.origin == origin);
        if self.phase == Phase::Closed || self.visible || !same_episode {
            return false;
        }
        debug!(%origin, "revealing hidden player");
        self.visible = true;
        self.focus = Control::PlayPause;
        self.touch(now);

        let (deferred, finished) = match self.session.as_mut() {
            Some(session) => (std::mem::take(&mut session.start_deferred), session.finished),
            None => return false,
        };
        if finished {
            // Hidden during the advance delay
            self.advance(now);
        } else if deferred {
            self.start_playback(now);
        } else if self.phase == Phase::Open {
            self.resume(now);
        }
        // Still opening: playback starts once the stream is ready
        true
    }

    // ----- input -----

    /// Pointer or key activity: show the controls and restart the idle timer
    pub fn touch(&mut self, now: Instant) {
        self.controls_visible = true;
        self.scheduler
            .once(TimerKind::HideControls, now, self.config.idle_hide_after);
    }

    /// Returns whether the overlay consumed the key
    pub fn handle_key(&mut self, key: RemoteKey, now: Instant) -> bool {
        if self.phase == Phase::Closed || !self.visible {
            return false;
        }
        if key == RemoteKey::Back {
            self.close(now);
            return true;
        }

        let was_hidden = !self.controls_visible;
        self.touch(now);
        if was_hidden {
            // First press only wakes the controls
            return true;
        }

        if self.scrub.is_some() {
            match key {
                RemoteKey::Left => self.scrub_step(-self.config.scrub_step, now),
                RemoteKey::Right => self.scrub_step(self.config.scrub_step, now),
                RemoteKey::Enter => self.exit_scrub(now),
                _ => {}
            }
            return true;
        }

        let direction = match key {
            RemoteKey::Enter => {
                self.activate(self.focus, now);
                return true;
            }
            RemoteKey::Up => Direction::Up,
            RemoteKey::Down => Direction::Down,
            RemoteKey::Left => Direction::Left,
            RemoteKey::Right => Direction::Right,
            RemoteKey::Back => return true,
        };

        match navigate(self.focus, direction, self.skip_visible()) {
            NavOutcome::Focus(control) => self.focus = control,
            NavOutcome::EnterScrub => self.enter_scrub(now),
            NavOutcome::Stop => debug!(focus = ?self.focus, ?direction, "navigation dead end"),
        }
        true
    }

    /// Trigger a control directly (key activation or pointer click)
    pub fn activate(&mut self, control: Control, now: Instant) {
        if self.session.is_none() {
            return;
        }
        self.touch(now);
        match control {
            Control::PlayPause => self.toggle_pause(now),
            Control::Restart => self.restart(now),
            Control::Hide => self.hide_to_grid(now),
            Control::Skip => self.skip(now),
            Control::SeekBar => self.enter_scrub(now),
        }
    }

    pub fn toggle_pause(&mut self, now: Instant) {
        if self.session.is_none() {
            return;
        }
        if self.media.is_paused() {
            self.resume(now);
        } else {
            self.media.pause();
            self.on_paused();
        }
        // Saved position never lags the latest explicit pause/play
        self.save_progress();
    }

    /// Back to zero and play. The store is left alone until the next
    /// natural save point.
    pub fn restart(&mut self, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.pending_start = None;
        session.last_known_time = 0.0;
        self.media.seek(0.0);
        self.resume(now);
    }

    /// Pause, persist and give focus back to the grid without tearing the
    /// session down, so the same tile can bring it back instantly.
    pub fn hide_to_grid(&mut self, _now: Instant) {
        let Some(origin) = self.session.as_ref().map(|s| s.request.origin) else {
            return;
        };
        self.scrub = None;
        self.media.pause();
        self.on_paused();
        self.save_progress();
        self.visible = false;
        self.controls_visible = false;
        self.scheduler.cancel(TimerKind::HideControls);
        self.scheduler.cancel(TimerKind::AdvanceDelay);
        self.events.push(OverlayEvent::FocusEpisode {
            episode: origin,
            highlight: false,
        });
    }

    /// Cancel the auto-advance for the rest of this session. Never touches
    /// playback.
    pub fn skip(&mut self, now: Instant) {
        let Some(prompt) = self.prompt.as_mut() else {
            return;
        };
        if prompt.skipped {
            return;
        }
        prompt.skipped = true;
        if let Some(session) = self.session.as_mut() {
            session.prompt_suppressed = true;
        }
        self.scheduler.cancel(TimerKind::Countdown);
        self.scheduler.once(TimerKind::SkipGrace, now, self.config.skip_grace);
        if self.focus == Control::Skip {
            self.focus = Control::PlayPause;
        }
        info!("next episode skipped");
    }

    // ----- scrub mode -----

    pub fn enter_scrub(&mut self, now: Instant) {
        if self.session.is_none() || self.scrub.is_some() {
            return;
        }
        let resume_on_exit = !self.media.is_paused();
        if resume_on_exit {
            self.media.pause();
            self.on_paused();
        }
        let time = self.media.current_time();
        self.scrub = Some(Scrub {
            resume_on_exit,
            origin_time: time,
            target: time,
            preview: Preview::Ready {
                target: time,
                frame: self.media.latest_frame(),
            },
            preview_token: None,
        });
        self.focus = Control::SeekBar;
        self.touch(now);
        debug!(time, resume_on_exit, "scrub mode entered");
    }

    fn scrub_step(&mut self, delta: f64, now: Instant) {
        let duration = self.media.duration();
        let Some(scrub) = self.scrub.as_mut() else {
            return;
        };
        let mut target = (scrub.target + delta).max(0.0);
        if let Some(d) = duration {
            target = target.min(d);
        }
        scrub.target = target;
        self.media.seek(target);

        if let Some(token) = scrub.preview_token.take() {
            self.scheduler.cancel_token(token);
        }
        scrub.preview = Preview::Pending { target };
        scrub.preview_token = Some(self.scheduler.once(
            TimerKind::PreviewTimeout,
            now,
            self.config.preview_timeout,
        ));
    }

    pub fn exit_scrub(&mut self, now: Instant) {
        let Some(scrub) = self.scrub.take() else {
            return;
        };
        if let Some(token) = scrub.preview_token {
            self.scheduler.cancel_token(token);
        }
        self.focus = Control::PlayPause;
        if (scrub.target - scrub.origin_time).abs() > f64::EPSILON {
            if let Some(session) = self.session.as_mut() {
                session.last_known_time = scrub.target;
            }
            self.save_progress();
        }
        if scrub.resume_on_exit {
            self.resume(now);
        }
        self.touch(now);
        debug!(target = scrub.target, "scrub mode left");
    }

    /// Land a pending preview on whatever frame the media shows now
    fn settle_preview(&mut self) {
        let Some(scrub) = self.scrub.as_mut() else {
            return;
        };
        if let Preview::Pending { target } = scrub.preview {
            scrub.preview = Preview::Ready {
                target,
                frame: self.media.latest_frame(),
            };
        }
        if let Some(token) = scrub.preview_token.take() {
            self.scheduler.cancel_token(token);
        }
    }

    // ----- playback -----

    /// First play of a source: retried muted once if autoplay is refused
    fn start_playback(&mut self, now: Instant) {
        self.phase = Phase::Open;
        if !self.visible {
            if let Some(session) = self.session.as_mut() {
                session.start_deferred = true;
            }
            debug!("source ready while hidden, start deferred");
            self.media.pause();
            self.on_paused();
            return;
        }
        match self.media.play() {
            Ok(()) => self.on_resumed(now),
            Err(MediaError::PlayRejected(reason)) => {
                debug!(%reason, "autoplay rejected, retrying muted");
                self.media.set_muted(true);
                match self.media.play() {
                    Ok(()) => self.on_resumed(now),
                    Err(e) => {
                        debug!(error = %e, "muted autoplay rejected as well");
                        self.on_paused();
                    }
                }
            }
            Err(MediaError::Backend(reason)) => {
                warn!(%reason, "built-in player unavailable, handing off");
                self.hand_off(now);
            }
            Err(e) => {
                warn!(error = %e, "playback could not start");
                self.last_error = Some(e.to_string());
                self.on_paused();
            }
        }
    }

    /// Give the current episode to the external player and close
    fn hand_off(&mut self, now: Instant) {
        let Some((url, title)) = self
            .session
            .as_ref()
            .map(|s| (s.request.url.clone(), s.request.title.clone()))
        else {
            return;
        };
        self.close(now);
        self.events.push(OverlayEvent::LaunchExternal { url, title });
    }

    fn resume(&mut self, now: Instant) {
        match self.media.play() {
            Ok(()) => self.on_resumed(now),
            Err(e) => {
                warn!(error = %e, "resume failed");
                self.last_error = Some(e.to_string());
            }
        }
    }

    fn on_resumed(&mut self, now: Instant) {
        if !self.scheduler.is_armed(TimerKind::Autosave) {
            self.scheduler.every(TimerKind::Autosave, now, self.config.autosave_every);
        }
        if !self.scheduler.is_armed(TimerKind::StallCheck) {
            if let Some(session) = self.session.as_mut() {
                session.last_polled_time = -1.0;
                session.stall_strikes = 0;
            }
            self.scheduler.every(TimerKind::StallCheck, now, self.config.stall_poll);
        }
        if self.skip_visible() && !self.scheduler.is_armed(TimerKind::Countdown) {
            self.scheduler.every(TimerKind::Countdown, now, COUNTDOWN_TICK);
        }
    }

    fn on_paused(&mut self) {
        self.scheduler.cancel(TimerKind::Autosave);
        self.scheduler.cancel(TimerKind::Countdown);
        self.scheduler.cancel(TimerKind::StallCheck);
    }

    /// Write the current position. The store drops anything under its
    /// minimum.
    fn save_progress(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        if session.finished || self.phase != Phase::Open {
            return false;
        }
        let record = ProgressRecord::new(
            &session.request.progress_key,
            self.media.current_time(),
            self.media.duration(),
            now_ms(),
        );
        self.store.set(record)
    }

    // ----- event loop -----

    pub fn update(&mut self, now: Instant) {
        if self.phase == Phase::Closed {
            return;
        }
        let handle = self.handle();

        self.poll_stream(now);

        for event in self.media.poll_events() {
            self.on_media_event(event, now);
            if self.handle() != handle {
                return;
            }
        }

        if let Some(session) = self.session.as_mut() {
            let time = self.media.current_time();
            if time > 0.0 && self.phase == Phase::Open {
                session.last_known_time = time;
            }
        }
        self.check_prompt(now);

        for kind in self.scheduler.due(now) {
            self.on_timer(kind, now);
            if self.handle() != handle {
                return;
            }
        }
    }

    fn poll_stream(&mut self, now: Instant) {
        let Some(event) = self.hls.as_mut().and_then(HlsSession::poll) else {
            return;
        };
        match event {
            SessionEvent::Ready { playback_url, .. } => {
                self.scheduler.cancel(TimerKind::ManifestTimeout);
                info!(url = %playback_url, "manifest ready");
                self.media.load(&playback_url);
                self.start_playback(now);
            }
            SessionEvent::Failed(e) => self.fall_back_to_native(e, now),
        }
    }

    fn fall_back_to_native(&mut self, reason: StreamError, now: Instant) {
        self.scheduler.cancel(TimerKind::ManifestTimeout);
        if let Some(hls) = self.hls.as_mut() {
            hls.detach();
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        warn!(error = %reason, url = %session.request.url, "adaptive stream unavailable, playing natively");
        session.native_fallback = true;
        let url = session.request.url.clone();
        self.media.load(&url);
        self.start_playback(now);
    }

    fn on_media_event(&mut self, event: MediaEvent, now: Instant) {
        match event {
            MediaEvent::LoadedMetadata { duration } => self.on_metadata(duration),
            MediaEvent::Playing => {
                if self.phase == Phase::Open {
                    self.on_resumed(now);
                }
            }
            MediaEvent::Paused => self.on_paused(),
            MediaEvent::Seeked => self.settle_preview(),
            MediaEvent::Ended => {
                if self.scrub.is_none() {
                    self.on_ended(now);
                }
            }
            MediaEvent::Error(message) => {
                warn!(%message, "media error");
                self.last_error = Some(message);
                self.recover(now);
            }
        }
    }

    fn on_metadata(&mut self, duration: Option<f64>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(start) = session.pending_start.take() {
            // Never replay from exactly zero or jump past the end
            let in_range = start > 1.0 && duration.map_or(true, |d| start < d);
            if in_range {
                debug!(start, "seeking to saved position");
                self.media.seek(start);
            }
        }
        session.credits_offset = duration.and_then(|d| credits_offset(d, session.request.credits_start));
        debug!(?duration, offset = ?session.credits_offset, "metadata loaded");
    }

    fn next_request(&self, after: EpisodeRef) -> Option<PlaybackRequest> {
        let series = self.series.as_ref()?;
        let next = series.next_episode(after)?;
        let key = crate::models::ProgressKey::new(&series.id, next);
        let start_at = self.store.get(key.as_str()).map(|r| r.time).unwrap_or(0.0);
        PlaybackRequest::for_episode(series, next, start_at)
    }

    fn check_prompt(&mut self, now: Instant) {
        if self.scrub.is_some() || self.phase != Phase::Open {
            return;
        }
        let Some((offset, suppressed, finished, origin)) = self.session.as_ref().and_then(|s| {
            s.credits_offset
                .map(|o| (o, s.prompt_suppressed, s.finished, s.request.origin))
        }) else {
            return;
        };
        let time = self.media.current_time();

        match self.prompt.as_ref().map(|p| p.skipped) {
            None => {
                if suppressed || finished || time < offset {
                    return;
                }
                let Some(next) = self.series.as_ref().and_then(|s| s.next_episode(origin)) else {
                    return;
                };
                info!(%next, countdown = self.config.countdown_from, "next episode prompt shown");
                self.prompt = Some(NextPrompt {
                    next,
                    countdown: self.config.countdown_from,
                    skipped: false,
                });
                if !self.media.is_paused() {
                    self.scheduler.every(TimerKind::Countdown, now, COUNTDOWN_TICK);
                }
            }
            Some(false) if time < offset - self.config.prompt_reset_margin => {
                debug!(time, offset, "playback moved back before the credits, prompt reset");
                self.hide_prompt();
            }
            Some(_) => {}
        }
    }

    fn hide_prompt(&mut self) {
        self.prompt = None;
        self.scheduler.cancel(TimerKind::Countdown);
        if self.focus == Control::Skip {
            self.focus = Control::PlayPause;
        }
    }

    fn on_timer(&mut self, kind: TimerKind, now: Instant) {
        match kind {
            TimerKind::Autosave => {
                self.save_progress();
            }
            TimerKind::HideControls => {
                if self.scrub.is_some() {
                    self.touch(now);
                } else {
                    self.controls_visible = false;
                }
            }
            TimerKind::Countdown => self.tick_countdown(now),
            TimerKind::SkipGrace => {
                if self.prompt.as_ref().is_some_and(|p| p.skipped) {
                    self.hide_prompt();
                }
            }
            TimerKind::PreviewTimeout => {
                debug!("preview seek did not report back, using current frame");
                self.settle_preview();
            }
            TimerKind::ManifestTimeout => self.fall_back_to_native(StreamError::Timeout, now),
            TimerKind::StallCheck => self.check_stall(now),
            TimerKind::AdvanceDelay => self.advance(now),
        }
    }

    fn tick_countdown(&mut self, now: Instant) {
        // Frozen, not reset, while paused
        if self.media.is_paused() {
            return;
        }
        let Some(prompt) = self.prompt.as_mut() else {
            self.scheduler.cancel(TimerKind::Countdown);
            return;
        };
        if prompt.skipped {
            return;
        }
        prompt.countdown = prompt.countdown.saturating_sub(1);
        if prompt.countdown == 0 {
            info!(next = %prompt.next, "countdown finished, advancing");
            self.advance(now);
        }
    }

    fn on_ended(&mut self, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.finished {
            return;
        }
        session.finished = true;
        let origin = session.request.origin;
        info!(%origin, "episode finished");

        // A finished episode has no resume point
        self.store.delete(session.request.progress_key.as_str());
        self.events.push(OverlayEvent::ProgressReset(origin));
        self.on_paused();
        self.hide_prompt();

        if self.next_request(origin).is_some() {
            self.scheduler.once(TimerKind::AdvanceDelay, now, self.config.advance_delay);
        } else {
            self.close(now);
        }
    }

    /// Drop the current episode's progress and play the next one, or close
    /// when the series is over.
    fn advance(&mut self, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let origin = session.request.origin;
        if !session.finished {
            session.finished = true;
            self.store.delete(session.request.progress_key.as_str());
            self.events.push(OverlayEvent::ProgressReset(origin));
        }

        match self.next_request(origin) {
            Some(request) => {
                self.open(request, now);
            }
            None => self.close(now),
        }
    }

    fn check_stall(&mut self, now: Instant) {
        if self.media.is_paused() || self.scrub.is_some() {
            return;
        }
        let time = self.media.current_time();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if (time - session.last_polled_time).abs() < 0.01 {
            session.stall_strikes += 1;
        } else {
            session.stall_strikes = 0;
        }
        session.last_polled_time = time;

        // Two quiet polls in a row before acting, so a short buffering
        // pause is not mistaken for a stall
        if session.stall_strikes >= self.config.stall_strikes {
            warn!(time, "playback stalled");
            self.recover(now);
        }
    }

    /// Reattach the adaptive session or reload the native source and resume
    /// from the last known position.
    fn recover(&mut self, now: Instant) {
        let current = self.media.current_time();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.finished {
            return;
        }
        if session.recoveries >= self.config.max_recoveries {
            warn!(recoveries = session.recoveries, "giving up on recovery");
            self.media.pause();
            self.on_paused();
            self.last_error = Some("Playback stalled".to_string());
            return;
        }
        session.recoveries += 1;
        session.stall_strikes = 0;
        let resume_at = session.last_known_time.max(current);
        session.pending_start = Some(resume_at);
        let url = session.request.url.clone();
        let adaptive = session.request.kind == MediaKind::M3u8 && !session.native_fallback;
        info!(resume_at, adaptive, attempt = session.recoveries, "recovering playback");

        self.on_paused();
        if adaptive {
            self.phase = Phase::Opening;
            let loader = Arc::clone(&self.loader);
            self.hls
                .get_or_insert_with(|| HlsSession::new(loader))
                .attach(&url);
            self.scheduler
                .once(TimerKind::ManifestTimeout, now, self.config.manifest_timeout);
        } else {
            self.media.load(&url);
            self.start_playback(now);
        }
    }
}

#[cfg(test)]
#[path = "overlay_tests.rs"]
mod overlay_tests;
