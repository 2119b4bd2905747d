//! Data models for the series player

use serde::{Deserialize, Serialize};
use std::fmt;

/// How an episode's media is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Mp4,
    M3u8,
    /// Link handed off to an external player
    Ok,
}

impl MediaKind {
    /// Parse the `type` field used by catalog entries
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mp4" | "video" | "native" => Some(MediaKind::Mp4),
            "m3u8" | "hls" => Some(MediaKind::M3u8),
            "ok" | "okru" | "external" => Some(MediaKind::Ok),
            _ => None,
        }
    }

    /// Guess the transport from the media URL when the catalog doesn't say
    pub fn infer(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or_default();
        if path.ends_with(".m3u8") {
            MediaKind::M3u8
        } else if lower.contains("ok.ru/") {
            MediaKind::Ok
        } else {
            MediaKind::Mp4
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Mp4 => write!(f, "mp4"),
            MediaKind::M3u8 => write!(f, "m3u8"),
            MediaKind::Ok => write!(f, "ok"),
        }
    }
}

/// Season/episode coordinates, both 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub season: u32,
    pub episode: u32,
}

impl EpisodeRef {
    pub fn new(season: u32, episode: u32) -> Self {
        Self { season, episode }
    }
}

impl fmt::Display for EpisodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}E{}", self.season, self.episode)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    pub number: u32,
    /// Display label, e.g. "E3"
    pub label: String,
    pub thumbnail: Option<String>,
    pub url: String,
    pub kind: MediaKind,
    /// Explicit offset (seconds) where the credits start
    pub credits_start: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Season {
    pub number: u32,
    pub title: String,
    pub synopsis: Option<String>,
    pub art: Option<String>,
    pub episodes: Vec<Episode>,
}

impl Season {
    pub fn episode(&self, number: u32) -> Option<&Episode> {
        self.episodes.iter().find(|e| e.number == number)
    }
}

/// Background art variants
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artwork {
    pub desktop: Option<String>,
    pub mobile: Option<String>,
}

/// One series from the catalog, normalized
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub background: Artwork,
    pub genres: Vec<String>,
    pub age_rating: Option<String>,
    pub year: Option<u32>,
    /// 0-5 scale as stored in the catalog
    pub rating: Option<f32>,
    pub synopsis: String,
    pub season_count: u32,
    pub seasons: Vec<Season>,
}

impl CatalogEntry {
    /// Rating rescaled to 0-10 for display
    pub fn display_rating(&self) -> Option<String> {
        self.rating.map(|r| format!("{:.1}", (r * 2.0).clamp(0.0, 10.0)))
    }

    pub fn season(&self, number: u32) -> Option<&Season> {
        self.seasons.iter().find(|s| s.number == number)
    }

    pub fn episode(&self, at: EpisodeRef) -> Option<&Episode> {
        self.season(at.season)?.episode(at.episode)
    }

    pub fn first_episode(&self) -> Option<EpisodeRef> {
        self.seasons.iter().find_map(|s| {
            s.episodes.first().map(|e| EpisodeRef::new(s.number, e.number))
        })
    }

    /// The episode after `at`: next in the same season, otherwise the first
    /// episode of the following non-empty season.
    pub fn next_episode(&self, at: EpisodeRef) -> Option<EpisodeRef> {
        let season_pos = self.seasons.iter().position(|s| s.number == at.season)?;
        let season = &self.seasons[season_pos];
        let episode_pos = season.episodes.iter().position(|e| e.number == at.episode)?;

        if let Some(next) = season.episodes.get(episode_pos + 1) {
            return Some(EpisodeRef::new(season.number, next.number));
        }

        self.seasons[season_pos + 1..].iter().find_map(|s| {
            s.episodes.first().map(|e| EpisodeRef::new(s.number, e.number))
        })
    }
}

/// Store key of one episode: `<series>::S<season>::E<episode>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgressKey(String);

impl ProgressKey {
    pub fn new(series_id: &str, at: EpisodeRef) -> Self {
        Self(format!("{}::S{}::E{}", series_id, at.season, at.episode))
    }

    /// Split a stored key into its series id and episode coordinates
    pub fn split(id: &str) -> Option<(&str, EpisodeRef)> {
        let mut parts = id.rsplitn(3, "::");
        let episode = parts.next()?.strip_prefix('E')?.parse().ok()?;
        let season = parts.next()?.strip_prefix('S')?.parse().ok()?;
        let series = parts.next()?;
        Some((series, EpisodeRef::new(season, episode)))
    }

    /// Recover the episode coordinates from a stored key
    pub fn parse_episode(id: &str) -> Option<EpisodeRef> {
        Self::split(id).map(|(_, at)| at)
    }

    /// Whether `id` is an episode key of exactly `series_id`. Ids may
    /// contain `::`, so a plain prefix match is not enough.
    pub fn belongs_to(id: &str, series_id: &str) -> bool {
        Self::split(id).is_some_and(|(series, _)| series == series_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Saved playback position of one episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: String,
    /// Seconds elapsed
    pub time: f64,
    /// Seconds, 0 when unknown
    #[serde(default)]
    pub duration: f64,
    /// Unix epoch milliseconds of the last write
    pub updated: i64,
}

impl ProgressRecord {
    pub fn new(key: &ProgressKey, time: f64, duration: Option<f64>, updated: i64) -> Self {
        Self {
            id: key.as_str().to_string(),
            time,
            duration: duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0),
            updated,
        }
    }

    /// Watched fraction for the grid indicator
    pub fn fraction(&self) -> Option<f32> {
        if self.duration > 0.0 {
            Some((self.time / self.duration).clamp(0.0, 1.0) as f32)
        } else {
            None
        }
    }
}

/// Last season/episode the user looked at, kept apart from progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastSelection {
    pub series_id: String,
    pub season: u32,
    pub episode: u32,
    #[serde(default)]
    pub updated: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(number: u32) -> Episode {
        Episode {
            number,
            label: format!("E{}", number),
            thumbnail: None,
            url: format!("http://example.com/{}.mp4", number),
            kind: MediaKind::Mp4,
            credits_start: None,
        }
    }

    fn season(number: u32, episodes: u32) -> Season {
        Season {
            number,
            title: format!("Season {}", number),
            synopsis: None,
            art: None,
            episodes: (1..=episodes).map(episode).collect(),
        }
    }

    fn entry(seasons: Vec<Season>) -> CatalogEntry {
        CatalogEntry {
            id: "show".to_string(),
            title: "Show".to_string(),
            background: Artwork::default(),
            genres: Vec::new(),
            age_rating: None,
            year: None,
            rating: Some(4.3),
            synopsis: String::new(),
            season_count: seasons.len() as u32,
            seasons,
        }
    }

    #[test]
    fn test_next_episode_crosses_season() {
        let show = entry(vec![season(1, 2), season(2, 1)]);
        assert_eq!(show.next_episode(EpisodeRef::new(1, 1)), Some(EpisodeRef::new(1, 2)));
        assert_eq!(show.next_episode(EpisodeRef::new(1, 2)), Some(EpisodeRef::new(2, 1)));
        assert_eq!(show.next_episode(EpisodeRef::new(2, 1)), None);
    }

    #[test]
    fn test_next_episode_skips_empty_season() {
        let show = entry(vec![season(1, 1), season(2, 0), season(3, 2)]);
        assert_eq!(show.next_episode(EpisodeRef::new(1, 1)), Some(EpisodeRef::new(3, 1)));
    }

    #[test]
    fn test_progress_key_roundtrip() {
        let key = ProgressKey::new("the::show", EpisodeRef::new(2, 11));
        assert_eq!(key.as_str(), "the::show::S2::E11");
        assert_eq!(ProgressKey::parse_episode(key.as_str()), Some(EpisodeRef::new(2, 11)));
        assert_eq!(ProgressKey::parse_episode("garbage"), None);
    }

    #[test]
    fn test_progress_key_series_is_exact() {
        let key = ProgressKey::new("the::show", EpisodeRef::new(1, 1));
        assert!(ProgressKey::belongs_to(key.as_str(), "the::show"));
        assert!(!ProgressKey::belongs_to(key.as_str(), "the"));
        assert!(!ProgressKey::belongs_to("the::show::notes", "the"));
    }

    #[test]
    fn test_media_kind_infer() {
        assert_eq!(MediaKind::infer("https://cdn.example.com/a/master.m3u8?token=1"), MediaKind::M3u8);
        assert_eq!(MediaKind::infer("https://ok.ru/video/123"), MediaKind::Ok);
        assert_eq!(MediaKind::infer("https://cdn.example.com/ep1.mp4"), MediaKind::Mp4);
        assert_eq!(MediaKind::parse("HLS"), Some(MediaKind::M3u8));
    }

    #[test]
    fn test_display_rating_scales_to_ten() {
        assert_eq!(entry(Vec::new()).display_rating().as_deref(), Some("8.6"));
    }
}
