//! HLS manifest parser (master and media playlists)

use super::StreamError;
use std::collections::HashMap;
use url::Url;

/// One rendition listed by a master playlist
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub uri: String,
    pub bandwidth: u64,
    pub resolution: Option<(u32, u32)>,
    pub codecs: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Master {
        variants: Vec<Variant>,
    },
    Media {
        target_duration: Option<f64>,
        segments: Vec<Segment>,
        /// `#EXT-X-ENDLIST` seen, i.e. VOD rather than live
        ended: bool,
    },
}

impl Manifest {
    /// URL the media backend should open: the highest-bandwidth variant of
    /// a master playlist, or the playlist itself for a media playlist.
    pub fn playback_url(&self, manifest_url: &str) -> Option<String> {
        match self {
            Manifest::Master { variants } => variants
                .iter()
                .max_by_key(|v| v.bandwidth)
                .map(|v| v.uri.clone()),
            Manifest::Media { .. } => Some(manifest_url.to_string()),
        }
    }

    /// Total duration of a media playlist
    pub fn total_duration(&self) -> Option<f64> {
        match self {
            Manifest::Media { segments, .. } => Some(segments.iter().map(|s| s.duration).sum()),
            Manifest::Master { .. } => None,
        }
    }
}

/// Parse manifest text; relative URIs are resolved against `base_url`
pub fn parse_manifest(content: &str, base_url: &str) -> Result<Manifest, StreamError> {
    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next() {
        Some(first) if first.starts_with("#EXTM3U") => {}
        _ => return Err(StreamError::Manifest("missing #EXTM3U header".to_string())),
    }

    let base = Url::parse(base_url).ok();
    let mut variants = Vec::new();
    let mut segments = Vec::new();
    let mut target_duration = None;
    let mut ended = false;
    let mut pending_variant: Option<HashMap<String, String>> = None;
    let mut pending_duration: Option<f64> = None;

    for line in lines {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending_variant = Some(parse_attr_list(attrs));
        } else if let Some(info) = line.strip_prefix("#EXTINF:") {
            // "#EXTINF:<duration>,[<title>]"
            let duration = info.split(',').next().unwrap_or_default().trim();
            pending_duration = duration.parse().ok();
        } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = value.trim().parse().ok();
        } else if line.starts_with("#EXT-X-ENDLIST") {
            ended = true;
        } else if line.starts_with('#') {
            continue;
        } else if let Some(attrs) = pending_variant.take() {
            variants.push(Variant {
                uri: resolve(base.as_ref(), line),
                bandwidth: attrs
                    .get("bandwidth")
                    .or_else(|| attrs.get("average-bandwidth"))
                    .and_then(|b| b.parse().ok())
                    .unwrap_or(0),
                resolution: attrs.get("resolution").and_then(|r| parse_resolution(r)),
                codecs: attrs.get("codecs").cloned(),
            });
        } else if let Some(duration) = pending_duration.take() {
            segments.push(Segment {
                uri: resolve(base.as_ref(), line),
                duration,
            });
        }
    }

    if !variants.is_empty() {
        Ok(Manifest::Master { variants })
    } else if !segments.is_empty() {
        Ok(Manifest::Media {
            target_duration,
            segments,
            ended,
        })
    } else {
        Err(StreamError::Manifest("no variants or segments".to_string()))
    }
}

fn resolve(base: Option<&Url>, uri: &str) -> String {
    match base.and_then(|b| b.join(uri).ok()) {
        Some(url) => url.to_string(),
        None => uri.to_string(),
    }
}

fn parse_resolution(raw: &str) -> Option<(u32, u32)> {
    let (w, h) = raw.split_once(['x', 'X'])?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Parse an HLS attribute list: `KEY=value,KEY="quoted, value"`.
/// Keys are lowercased.
fn parse_attr_list(raw: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut chars = raw.chars().peekable();

    while chars.peek().is_some() {
        // Skip separators
        while let Some(&c) = chars.peek() {
            if c == ',' || c.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }

        let mut key = String::new();
        while let Some(c) = chars.next() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_lowercase();

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                value.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        if !key.is_empty() {
            attrs.insert(key, value.trim().to_string());
        }
    }

    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_playlist_picks_highest_bandwidth() {
        let content = r#"#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS="avc1.4d401e,mp4a.40.2"
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720
/hd/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1400000,RESOLUTION=842x480
https://other.example.com/mid.m3u8
"#;
        let manifest = parse_manifest(content, "https://cdn.example.com/show/master.m3u8").unwrap();

        let Manifest::Master { variants } = &manifest else {
            panic!("expected master playlist");
        };
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0].uri, "https://cdn.example.com/show/low/index.m3u8");
        assert_eq!(variants[0].codecs.as_deref(), Some("avc1.4d401e,mp4a.40.2"));
        assert_eq!(variants[1].uri, "https://cdn.example.com/hd/index.m3u8");
        assert_eq!(variants[1].resolution, Some((1280, 720)));
        assert_eq!(variants[2].uri, "https://other.example.com/mid.m3u8");

        assert_eq!(
            manifest.playback_url("https://cdn.example.com/show/master.m3u8").as_deref(),
            Some("https://cdn.example.com/hd/index.m3u8")
        );
    }

    #[test]
    fn test_media_playlist() {
        let content = r#"#EXTM3U
#EXT-X-TARGETDURATION:10
#EXTINF:9.009,
seg0.ts
#EXTINF:9.009,
seg1.ts
#EXTINF:3.003,
seg2.ts
#EXT-X-ENDLIST
"#;
        let url = "http://cdn.example.com/ep1/index.m3u8";
        let manifest = parse_manifest(content, url).unwrap();

        match &manifest {
            Manifest::Media { target_duration, segments, ended } => {
                assert_eq!(*target_duration, Some(10.0));
                assert_eq!(segments.len(), 3);
                assert_eq!(segments[2].uri, "http://cdn.example.com/ep1/seg2.ts");
                assert!(*ended);
            }
            other => panic!("unexpected manifest {:?}", other),
        }
        assert_eq!(manifest.playback_url(url).as_deref(), Some(url));
        assert!((manifest.total_duration().unwrap() - 21.021).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_non_manifest() {
        assert!(parse_manifest("<html>404</html>", "http://x/").is_err());
        assert!(parse_manifest("#EXTM3U\n#EXT-X-VERSION:3\n", "http://x/").is_err());
    }
}
