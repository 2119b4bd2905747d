//! The adaptive streaming session
//!
//! At most one session is attached at a time: `attach` always detaches the
//! previous one first, and a detached session's late manifest result is
//! dropped with its channel, so nothing fires after teardown.

use super::{parse_manifest, Manifest, StreamError};
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fetches manifest text. Runs on a background thread.
pub trait ManifestLoader: Send + Sync {
    fn load(&self, url: &str) -> Result<String, StreamError>;
}

/// Manifest loader over HTTP(S)
pub struct HttpManifestLoader {
    agent: ureq::Agent,
    user_agent: String,
}

impl HttpManifestLoader {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .timeout_connect(Some(timeout))
            .max_idle_connections(4)
            .max_idle_connections_per_host(2)
            .build()
            .new_agent();
        Self {
            agent,
            user_agent: user_agent.to_string(),
        }
    }
}

impl ManifestLoader for HttpManifestLoader {
    fn load(&self, url: &str) -> Result<String, StreamError> {
        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| StreamError::Http(e.to_string()))?;

        if response.status() != 200 {
            return Err(StreamError::Http(format!("HTTP error: {}", response.status())));
        }

        response
            .body_mut()
            .read_to_string()
            .map_err(|e| StreamError::Http(e.to_string()))
    }
}

/// Outcome of a manifest fetch
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Ready {
        playback_url: String,
        manifest: Manifest,
    },
    Failed(StreamError),
}

struct Attached {
    source_url: String,
    receiver: Option<Receiver<Result<Manifest, StreamError>>>,
    ready: bool,
}

pub struct HlsSession {
    loader: Arc<dyn ManifestLoader>,
    attached: Option<Attached>,
    attach_count: u64,
}

impl HlsSession {
    pub fn new(loader: Arc<dyn ManifestLoader>) -> Self {
        Self {
            loader,
            attached: None,
            attach_count: 0,
        }
    }

    /// Start loading `url`, tearing down any previous session first
    pub fn attach(&mut self, url: &str) {
        self.detach();

        let (tx, rx) = channel();
        let loader = Arc::clone(&self.loader);
        let manifest_url = url.to_string();
        let spawned = thread::Builder::new()
            .name("hls-manifest".to_string())
            .spawn(move || {
                let result = loader
                    .load(&manifest_url)
                    .and_then(|body| parse_manifest(&body, &manifest_url));
                // The session may be gone by now, that's fine
                let _ = tx.send(result);
            });

        let receiver = match spawned {
            Ok(_) => Some(rx),
            Err(e) => {
                warn!(error = %e, "could not start manifest loader");
                None
            }
        };

        self.attach_count += 1;
        info!(url, attach = self.attach_count, "hls session attached");
        self.attached = Some(Attached {
            source_url: url.to_string(),
            receiver,
            ready: false,
        });
    }

    /// Release the current session. Returns whether one was attached.
    pub fn detach(&mut self) -> bool {
        match self.attached.take() {
            Some(session) => {
                debug!(url = %session.source_url, "hls session detached");
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.attached.as_ref().is_some_and(|a| a.ready)
    }

    pub fn source_url(&self) -> Option<&str> {
        self.attached.as_ref().map(|a| a.source_url.as_str())
    }

    /// How many times a session was attached over this object's lifetime
    pub fn attach_count(&self) -> u64 {
        self.attach_count
    }

    /// Non-blocking check for the manifest result
    pub fn poll(&mut self) -> Option<SessionEvent> {
        let attached = self.attached.as_mut()?;
        let result = match attached.receiver.as_ref() {
            Some(receiver) => match receiver.try_recv() {
                Ok(result) => result,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    Err(StreamError::Http("manifest loader stopped".to_string()))
                }
            },
            None => Err(StreamError::Http("manifest loader unavailable".to_string())),
        };
        attached.receiver = None;

        match result {
            Ok(manifest) => match manifest.playback_url(&attached.source_url) {
                Some(playback_url) => {
                    attached.ready = true;
                    Some(SessionEvent::Ready {
                        playback_url,
                        manifest,
                    })
                }
                None => Some(SessionEvent::Failed(StreamError::Manifest(
                    "no playable variant".to_string(),
                ))),
            },
            Err(e) => Some(SessionEvent::Failed(e)),
        }
    }
}

impl Drop for HlsSession {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct StaticLoader(Result<String, StreamError>);

    impl ManifestLoader for StaticLoader {
        fn load(&self, _url: &str) -> Result<String, StreamError> {
            self.0.clone()
        }
    }

    fn wait_for(session: &mut HlsSession) -> Option<SessionEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(event) = session.poll() {
                return Some(event);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_attach_resolves_variant() {
        let body = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=100\nlow.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=900\nhigh.m3u8\n";
        let mut session = HlsSession::new(Arc::new(StaticLoader(Ok(body.to_string()))));
        session.attach("http://cdn.example.com/a/master.m3u8");

        match wait_for(&mut session) {
            Some(SessionEvent::Ready { playback_url, .. }) => {
                assert_eq!(playback_url, "http://cdn.example.com/a/high.m3u8");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(session.is_ready());
        assert!(session.poll().is_none());
    }

    #[test]
    fn test_attach_detaches_previous() {
        let mut session = HlsSession::new(Arc::new(StaticLoader(Err(StreamError::Http("boom".into())))));
        session.attach("http://a/1.m3u8");
        session.attach("http://a/2.m3u8");

        assert_eq!(session.source_url(), Some("http://a/2.m3u8"));
        assert_eq!(session.attach_count(), 2);
        assert!(matches!(wait_for(&mut session), Some(SessionEvent::Failed(_))));

        assert!(session.detach());
        assert!(!session.detach());
        assert!(session.poll().is_none());
    }
}
