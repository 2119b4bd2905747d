// Native media backend using ffmpeg-next
// Requires FFmpeg libraries: libavcodec, libavformat, libavutil, libswscale
//
// To install FFmpeg development libraries:
// - Ubuntu/Debian: sudo apt install libavcodec-dev libavformat-dev libavutil-dev libswscale-dev libavdevice-dev
// - Fedora: sudo dnf install ffmpeg-devel
// - macOS: brew install ffmpeg
// - Windows: Download from https://ffmpeg.org and set FFMPEG_DIR environment variable

/// Frames this close to a seek target count as landing on it
const SEEK_TOLERANCE: f64 = 0.02;

/// Whether a decoded frame at `position` still precedes the pending seek.
/// Container seeks land on the keyframe at or before the target, so those
/// frames are decoded and dropped until the target is reached.
fn before_seek_target(position: f64, target: Option<f64>) -> bool {
    target.is_some_and(|target| position + SEEK_TOLERANCE < target)
}

#[cfg(feature = "internal-player")]
mod backend_impl {
    use super::before_seek_target;
    use crate::player::{FrameRef, MediaElement, MediaError, MediaEvent, VideoFrame};
    use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use std::thread;
    use std::time::{Duration, Instant};
    use tracing::{debug, info, warn};

    extern crate ffmpeg_next as ffmpeg;
    use ffmpeg::format::Pixel;
    use ffmpeg::media::Type;
    use ffmpeg::software::scaling::{context::Context as ScalingContext, flag::Flags};
    use ffmpeg::util::frame::video::Video as DecodedFrame;

    /// `AV_TIME_BASE`, container-level timestamps are in microseconds
    const TIME_BASE: f64 = 1_000_000.0;
    const MAX_WIDTH: u32 = 1280;
    const MAX_HEIGHT: u32 = 720;

    /// Commands to send to the decode thread
    enum Command {
        Stop,
        Pause,
        Resume,
        Seek(f64),
    }

    /// State shared with the decode thread
    #[derive(Default)]
    struct Shared {
        paused: bool,
        position: f64,
        duration: Option<f64>,
        frame: Option<FrameRef>,
        serial: u64,
    }

    fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
        shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Media element decoding video frames on a background thread
    pub struct FfmpegMedia {
        shared: Arc<Mutex<Shared>>,
        command_sender: Option<Sender<Command>>,
        event_receiver: Option<Receiver<MediaEvent>>,
        source: Option<String>,
        user_agent: String,
        muted: bool,
    }

    impl FfmpegMedia {
        pub fn new(user_agent: &str) -> Self {
            if let Err(e) = ffmpeg::init() {
                warn!(error = %e, "ffmpeg init failed");
            }

            Self {
                shared: Arc::new(Mutex::new(Shared {
                    paused: true,
                    ..Shared::default()
                })),
                command_sender: None,
                event_receiver: None,
                source: None,
                user_agent: user_agent.to_string(),
                muted: false,
            }
        }

        fn send(&self, command: Command) {
            if let Some(ref sender) = self.command_sender {
                let _ = sender.send(command);
            }
        }

        fn decode_thread(
            url: String,
            user_agent: String,
            shared: Arc<Mutex<Shared>>,
            cmd_rx: Receiver<Command>,
            event_tx: Sender<MediaEvent>,
        ) {
            let mut pipeline = match Pipeline::open(&url, &user_agent) {
                Ok(p) => p,
                Err(e) => {
                    warn!(%url, error = %e, "failed to open media");
                    let _ = event_tx.send(MediaEvent::Error(e));
                    return;
                }
            };

            lock(&shared).duration = pipeline.duration;
            let _ = event_tx.send(MediaEvent::LoadedMetadata {
                duration: pipeline.duration,
            });
            info!(%url, duration = ?pipeline.duration, "media opened");

            let mut paused = true;
            let mut ended = false;
            // Decode up to the seek target even while paused so the preview
            // shows it
            let mut seek_target: Option<f64> = None;
            let mut clock_start = Instant::now();
            let mut clock_base = 0.0;

            loop {
                let command = if paused && seek_target.is_none() {
                    match cmd_rx.recv_timeout(Duration::from_millis(50)) {
                        Ok(c) => Some(c),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                } else {
                    match cmd_rx.try_recv() {
                        Ok(c) => Some(c),
                        Err(TryRecvError::Empty) => None,
                        Err(TryRecvError::Disconnected) => break,
                    }
                };

                match command {
                    Some(Command::Stop) => break,
                    Some(Command::Pause) => {
                        paused = true;
                        lock(&shared).paused = true;
                        let _ = event_tx.send(MediaEvent::Paused);
                    }
                    Some(Command::Resume) => {
                        if !ended {
                            paused = false;
                            clock_start = Instant::now();
                            clock_base = lock(&shared).position;
                            let _ = event_tx.send(MediaEvent::Playing);
                        }
                    }
                    Some(Command::Seek(seconds)) => match pipeline.seek(seconds) {
                        Ok(()) => {
                            ended = false;
                            seek_target = Some(seconds.max(0.0));
                            clock_start = Instant::now();
                            clock_base = seconds;
                        }
                        Err(e) => {
                            debug!(seconds, error = %e, "seek failed");
                            let _ = event_tx.send(MediaEvent::Error(e));
                        }
                    },
                    None => {}
                }

                if (paused && seek_target.is_none()) || ended {
                    continue;
                }

                match pipeline.next_frame() {
                    Some(frame) => {
                        let position = frame.position;
                        if before_seek_target(position, seek_target) {
                            continue;
                        }
                        {
                            let mut state = lock(&shared);
                            state.serial += 1;
                            state.position = position;
                            state.frame = Some(FrameRef {
                                serial: state.serial,
                                frame: Arc::new(frame),
                            });
                        }

                        if seek_target.take().is_some() {
                            let _ = event_tx.send(MediaEvent::Seeked);
                            continue;
                        }

                        // Pace by presentation time
                        let due = clock_start + Duration::from_secs_f64((position - clock_base).max(0.0));
                        if let Some(wait) = due.checked_duration_since(Instant::now()) {
                            thread::sleep(wait.min(Duration::from_millis(250)));
                        }
                    }
                    None => {
                        ended = true;
                        paused = true;
                        if seek_target.take().is_some() {
                            let _ = event_tx.send(MediaEvent::Seeked);
                        }
                        lock(&shared).paused = true;
                        let _ = event_tx.send(MediaEvent::Ended);
                        debug!(%url, "end of stream");
                    }
                }
            }
        }
    }

    /// Demuxer, decoder and scaler of one source
    struct Pipeline {
        input: ffmpeg::format::context::Input,
        stream_index: usize,
        time_base: f64,
        decoder: ffmpeg::decoder::Video,
        scaler: ScalingContext,
        width: u32,
        height: u32,
        duration: Option<f64>,
        eof_sent: bool,
    }

    impl Pipeline {
        fn open(url: &str, user_agent: &str) -> Result<Self, String> {
            // Options for network streams
            let mut options = ffmpeg::Dictionary::new();
            options.set("user_agent", user_agent);
            options.set("reconnect", "1");
            options.set("reconnect_streamed", "1");
            options.set("reconnect_delay_max", "5");
            options.set("timeout", "5000000");

            let input = ffmpeg::format::input_with_dictionary(&url, options)
                .map_err(|e| format!("Failed to open stream: {}", e))?;

            let stream = input
                .streams()
                .best(Type::Video)
                .ok_or_else(|| "No video stream found".to_string())?;
            let stream_index = stream.index();
            let time_base = f64::from(stream.time_base());

            let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| format!("Failed to read codec parameters: {}", e))?;
            let decoder = context
                .decoder()
                .video()
                .map_err(|e| format!("Failed to create decoder: {}", e))?;

            // Scale down anything larger than 720p
            let (src_width, src_height) = (decoder.width(), decoder.height());
            let (width, height) = if src_width > MAX_WIDTH || src_height > MAX_HEIGHT {
                let scale = f64::min(
                    MAX_WIDTH as f64 / src_width as f64,
                    MAX_HEIGHT as f64 / src_height as f64,
                );
                ((src_width as f64 * scale) as u32, (src_height as f64 * scale) as u32)
            } else {
                (src_width, src_height)
            };

            let scaler = ScalingContext::get(
                decoder.format(),
                src_width,
                src_height,
                Pixel::RGB24,
                width,
                height,
                Flags::BILINEAR,
            )
            .map_err(|e| format!("Failed to create scaler: {}", e))?;

            let duration = Some(input.duration())
                .filter(|d| *d > 0)
                .map(|d| d as f64 / TIME_BASE);

            Ok(Self {
                input,
                stream_index,
                time_base,
                decoder,
                scaler,
                width,
                height,
                duration,
                eof_sent: false,
            })
        }

        fn seek(&mut self, seconds: f64) -> Result<(), String> {
            let ts = (seconds.max(0.0) * TIME_BASE) as i64;
            self.input
                .seek(ts, ..ts)
                .map_err(|e| format!("Seek failed: {}", e))?;
            self.decoder.flush();
            self.eof_sent = false;
            Ok(())
        }

        /// Decode until the next video frame, `None` at end of stream
        fn next_frame(&mut self) -> Option<VideoFrame> {
            let mut decoded = DecodedFrame::empty();
            loop {
                if self.decoder.receive_frame(&mut decoded).is_ok() {
                    if let Some(frame) = self.convert(&decoded) {
                        return Some(frame);
                    }
                    continue;
                }
                if self.eof_sent {
                    return None;
                }

                match self.input.packets().next() {
                    Some((stream, packet)) => {
                        if stream.index() != self.stream_index {
                            continue;
                        }
                        // Corrupt packets are skipped
                        let _ = self.decoder.send_packet(&packet);
                    }
                    None => {
                        let _ = self.decoder.send_eof();
                        self.eof_sent = true;
                    }
                }
            }
        }

        fn convert(&mut self, decoded: &DecodedFrame) -> Option<VideoFrame> {
            let mut rgb = DecodedFrame::empty();
            self.scaler.run(decoded, &mut rgb).ok()?;

            let data = rgb.data(0);
            let stride = rgb.stride(0);
            let row_len = self.width as usize * 3;

            // Copy row by row, the stride may be padded
            let mut frame_data = Vec::with_capacity(row_len * self.height as usize);
            for y in 0..self.height as usize {
                let row_start = y * stride;
                frame_data.extend_from_slice(&data[row_start..row_start + row_len]);
            }

            let pts = decoded.timestamp().or(decoded.pts()).unwrap_or(0);
            Some(VideoFrame {
                width: self.width,
                height: self.height,
                data: frame_data,
                position: pts as f64 * self.time_base,
            })
        }
    }

    impl MediaElement for FfmpegMedia {
        fn load(&mut self, url: &str) {
            self.unload();

            let (cmd_tx, cmd_rx) = channel();
            let (event_tx, event_rx) = channel();
            self.command_sender = Some(cmd_tx);
            self.event_receiver = Some(event_rx);
            self.source = Some(url.to_string());

            let url = url.to_string();
            let user_agent = self.user_agent.clone();
            let shared = Arc::clone(&self.shared);

            let spawned = thread::Builder::new()
                .name("media-decode".to_string())
                .spawn(move || Self::decode_thread(url, user_agent, shared, cmd_rx, event_tx));
            if let Err(e) = spawned {
                warn!(error = %e, "could not start decode thread");
                self.command_sender = None;
                self.event_receiver = None;
            }
        }

        fn unload(&mut self) {
            self.send(Command::Stop);
            self.command_sender = None;
            self.event_receiver = None;
            self.source = None;
            // Fresh state; the old thread keeps its own handle until it exits
            self.shared = Arc::new(Mutex::new(Shared {
                paused: true,
                ..Shared::default()
            }));
        }

        fn play(&mut self) -> Result<(), MediaError> {
            if self.command_sender.is_none() {
                return Err(MediaError::NoSource);
            }
            self.send(Command::Resume);
            lock(&self.shared).paused = false;
            Ok(())
        }

        fn pause(&mut self) {
            self.send(Command::Pause);
            lock(&self.shared).paused = true;
        }

        fn is_paused(&self) -> bool {
            lock(&self.shared).paused
        }

        fn current_time(&self) -> f64 {
            lock(&self.shared).position
        }

        fn duration(&self) -> Option<f64> {
            lock(&self.shared).duration
        }

        fn seek(&mut self, seconds: f64) {
            self.send(Command::Seek(seconds));
            lock(&self.shared).position = seconds.max(0.0);
        }

        fn set_muted(&mut self, muted: bool) {
            self.muted = muted;
        }

        fn is_muted(&self) -> bool {
            self.muted
        }

        fn poll_events(&mut self) -> Vec<MediaEvent> {
            let mut events = Vec::new();
            if let Some(ref receiver) = self.event_receiver {
                loop {
                    match receiver.try_recv() {
                        Ok(event) => events.push(event),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            self.event_receiver = None;
                            break;
                        }
                    }
                }
            }
            events
        }

        fn latest_frame(&self) -> Option<FrameRef> {
            lock(&self.shared).frame.clone()
        }
    }

    impl Drop for FfmpegMedia {
        fn drop(&mut self) {
            self.send(Command::Stop);
        }
    }
}

// Stub implementation when internal-player feature is disabled
#[cfg(not(feature = "internal-player"))]
mod backend_impl {
    use crate::player::{FrameRef, MediaElement, MediaError, MediaEvent};

    pub struct FfmpegMedia {
        source: Option<String>,
        muted: bool,
    }

    impl FfmpegMedia {
        pub fn new(_user_agent: &str) -> Self {
            Self {
                source: None,
                muted: false,
            }
        }
    }

    impl MediaElement for FfmpegMedia {
        fn load(&mut self, url: &str) {
            self.source = Some(url.to_string());
        }

        fn unload(&mut self) {
            self.source = None;
        }

        fn play(&mut self) -> Result<(), MediaError> {
            if self.source.is_none() {
                return Err(MediaError::NoSource);
            }
            Err(MediaError::Backend(
                "Internal player not enabled. Build with --features internal-player".to_string(),
            ))
        }

        fn pause(&mut self) {}
        fn is_paused(&self) -> bool { true }
        fn current_time(&self) -> f64 { 0.0 }
        fn duration(&self) -> Option<f64> { None }
        fn seek(&mut self, _seconds: f64) {}
        fn set_muted(&mut self, muted: bool) { self.muted = muted; }
        fn is_muted(&self) -> bool { self.muted }
        fn poll_events(&mut self) -> Vec<MediaEvent> { Vec::new() }
        fn latest_frame(&self) -> Option<FrameRef> { None }
    }
}

// Re-export
pub use backend_impl::*;
