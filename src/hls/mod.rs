//! HLS (adaptive streaming) support
//!
//! Manifest parsing plus the single streaming session the player attaches
//! and detaches per playback.

mod manifest;
mod session;

use thiserror::Error;

// Re-export public types
pub use manifest::{parse_manifest, Manifest, Segment, Variant};
pub use session::{HlsSession, HttpManifestLoader, ManifestLoader, SessionEvent};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StreamError {
    #[error("manifest request failed: {0}")]
    Http(String),
    #[error("invalid manifest: {0}")]
    Manifest(String),
    #[error("manifest did not arrive in time")]
    Timeout,
}
