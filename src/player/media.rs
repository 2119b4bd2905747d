//! The media element the overlay drives

use std::sync::Arc;
use thiserror::Error;

/// Decoded RGB24 frame for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Presentation time in seconds
    pub position: f64,
}

/// Latest frame plus a counter that changes whenever a new frame lands
#[derive(Debug, Clone)]
pub struct FrameRef {
    pub serial: u64,
    pub frame: Arc<VideoFrame>,
}

/// Notifications from the backend, drained by [`MediaElement::poll_events`]
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    LoadedMetadata { duration: Option<f64> },
    Playing,
    Paused,
    /// A requested seek completed
    Seeked,
    Ended,
    Error(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MediaError {
    /// Playback refused by policy (e.g. unmuted autoplay)
    #[error("playback rejected: {0}")]
    PlayRejected(String),
    #[error("no source loaded")]
    NoSource,
    #[error("media backend error: {0}")]
    Backend(String),
}

/// A single playback surface. Implementations must not block.
pub trait MediaElement {
    /// Replace the current source
    fn load(&mut self, url: &str);
    fn unload(&mut self);
    fn play(&mut self) -> Result<(), MediaError>;
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    /// Seconds elapsed
    fn current_time(&self) -> f64;
    /// Known once metadata has arrived
    fn duration(&self) -> Option<f64>;
    fn seek(&mut self, seconds: f64);
    fn set_muted(&mut self, muted: bool);
    fn is_muted(&self) -> bool;
    fn poll_events(&mut self) -> Vec<MediaEvent>;
    fn latest_frame(&self) -> Option<FrameRef>;
}
