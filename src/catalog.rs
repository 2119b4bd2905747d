//! Catalog loading and normalization
//!
//! The catalog is a JSON array of series entries. Entries come in two
//! shapes: a structured `seasons` array, or flat `urlsea{S}epi{E}` /
//! `imgsea{S}epi{E}` keys. Both normalize into [`CatalogEntry`].

use crate::models::{Artwork, CatalogEntry, Episode, MediaKind, Season};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound of episodes scanned per season in the flat shape
pub const MAX_FLAT_EPISODES: u32 = 50;
/// Upper bound of seasons scanned when the count is not given
pub const MAX_FLAT_SEASONS: u32 = 30;
/// Consecutive missing episodes (after E1) that end a season scan
pub const FLAT_MISS_LIMIT: u32 = 6;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("catalog is not an array")]
    NotArray,
}

/// Fetch the catalog from the first candidate source that yields a JSON
/// array. Sources are URLs (http/https) or filesystem paths.
pub fn fetch_catalog(sources: &[String], user_agent: &str) -> Option<Vec<Value>> {
    let agent = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(30)))
        .timeout_connect(Some(Duration::from_secs(10)))
        .build()
        .new_agent();

    for source in sources {
        match load_source(&agent, source, user_agent) {
            Ok(entries) => {
                info!(source = %source, entries = entries.len(), "catalog loaded");
                return Some(entries);
            }
            Err(e) => warn!(source = %source, error = %e, "catalog source rejected"),
        }
    }
    None
}

fn load_source(agent: &ureq::Agent, source: &str, user_agent: &str) -> Result<Vec<Value>, CatalogError> {
    let body = if source.starts_with("http://") || source.starts_with("https://") {
        let mut response = agent
            .get(source)
            .header("User-Agent", user_agent)
            .call()
            .map_err(|e| CatalogError::Http(e.to_string()))?;
        if response.status() != 200 {
            return Err(CatalogError::Http(format!("HTTP error: {}", response.status())));
        }
        response
            .body_mut()
            .read_to_string()
            .map_err(|e| CatalogError::Http(e.to_string()))?
    } else {
        std::fs::read_to_string(Path::new(source))?
    };
    parse_catalog(&body)
}

pub fn parse_catalog(body: &str) -> Result<Vec<Value>, CatalogError> {
    match serde_json::from_str::<Value>(body)? {
        Value::Array(entries) => Ok(entries),
        _ => Err(CatalogError::NotArray),
    }
}

/// Exact id match, first hit wins. Numeric ids compare by string form.
pub fn find_entry<'a>(catalog: &'a [Value], series_id: &str) -> Option<&'a Value> {
    catalog
        .iter()
        .find(|entry| id_of(entry).as_deref() == Some(series_id))
}

fn id_of(entry: &Value) -> Option<String> {
    match entry.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Normalize one raw catalog entry
pub fn normalize_entry(raw: &Value) -> Option<CatalogEntry> {
    let id = id_of(raw)?;
    let title = text(raw, &["title", "name"]).unwrap_or_else(|| id.clone());
    let declared_seasons = number(raw, &["season_count", "seasons_count"])
        .map(|n| n.max(0.0) as u32);

    let seasons = match raw.get("seasons") {
        Some(Value::Array(list)) => structured_seasons(list),
        _ => flat_seasons(raw, declared_seasons),
    };
    debug!(id = %id, seasons = seasons.len(), "catalog entry normalized");

    Some(CatalogEntry {
        season_count: declared_seasons.unwrap_or(seasons.len() as u32),
        background: Artwork {
            desktop: text(raw, &["background", "bg", "backdrop"]),
            mobile: text(raw, &["background_mobile", "bg_mobile", "backdrop_mobile"]),
        },
        genres: genres(raw),
        age_rating: text(raw, &["age_rating", "age", "rated"]),
        year: number(raw, &["year"]).map(|y| y as u32),
        rating: number(raw, &["rating"]).map(|r| r.clamp(0.0, 5.0) as f32),
        synopsis: text(raw, &["synopsis", "description", "plot"]).unwrap_or_default(),
        id,
        title,
        seasons,
    })
}

fn structured_seasons(list: &[Value]) -> Vec<Season> {
    list.iter()
        .enumerate()
        .map(|(index, raw)| {
            let season_number = number(raw, &["season", "number"])
                .map(|n| n as u32)
                .unwrap_or(index as u32 + 1);
            let episodes = raw
                .get("episodes")
                .and_then(Value::as_array)
                .map(|eps| {
                    eps.iter()
                        .enumerate()
                        .filter_map(|(i, ep)| structured_episode(ep, i as u32 + 1))
                        .collect()
                })
                .unwrap_or_default();
            Season {
                number: season_number,
                title: text(raw, &["title", "name"]).unwrap_or_else(|| format!("Season {}", season_number)),
                synopsis: text(raw, &["synopsis", "description"]),
                art: text(raw, &["image", "art", "poster"]),
                episodes,
            }
        })
        .collect()
}

fn structured_episode(raw: &Value, fallback_number: u32) -> Option<Episode> {
    let url = text(raw, &["url", "src", "video"])?;
    let episode_number = number(raw, &["episode", "number"])
        .map(|n| n as u32)
        .unwrap_or(fallback_number);
    let kind = text(raw, &["type", "kind"])
        .and_then(|t| MediaKind::parse(&t))
        .unwrap_or_else(|| MediaKind::infer(&url));
    Some(Episode {
        number: episode_number,
        label: text(raw, &["label", "title"]).unwrap_or_else(|| format!("E{}", episode_number)),
        thumbnail: text(raw, &["thumbnail", "thumb", "img", "image"]),
        credits_start: number(raw, &["credits_start", "credits", "intro_end"]).filter(|c| *c > 0.0),
        url,
        kind,
    })
}

/// Scan the flat `urlsea{S}epi{E}` shape. With a declared season count every
/// season is scanned to the episode bound; otherwise seasons are probed until
/// one comes back empty and each scan stops after [`FLAT_MISS_LIMIT`]
/// consecutive misses beyond episode 1.
fn flat_seasons(raw: &Value, declared: Option<u32>) -> Vec<Season> {
    let inferred = declared.is_none();
    let season_limit = declared.unwrap_or(MAX_FLAT_SEASONS);
    let mut seasons = Vec::new();

    for s in 1..=season_limit {
        let mut episodes = Vec::new();
        let mut misses = 0;

        for e in 1..=MAX_FLAT_EPISODES {
            let Some(url) = text(raw, &[format!("urlsea{}epi{}", s, e).as_str()]) else {
                if e > 1 {
                    misses += 1;
                    if inferred && misses >= FLAT_MISS_LIMIT {
                        break;
                    }
                }
                continue;
            };
            misses = 0;
            let kind = text(raw, &[format!("typesea{}epi{}", s, e).as_str()])
                .and_then(|t| MediaKind::parse(&t))
                .unwrap_or_else(|| MediaKind::infer(&url));
            episodes.push(Episode {
                number: e,
                label: format!("E{}", e),
                thumbnail: text(raw, &[format!("imgsea{}epi{}", s, e).as_str()]),
                credits_start: number(raw, &[format!("creditssea{}epi{}", s, e).as_str()]).filter(|c| *c > 0.0),
                url,
                kind,
            });
        }

        if inferred && episodes.is_empty() {
            break;
        }
        seasons.push(Season {
            number: s,
            title: text(raw, &[format!("titlesea{}", s).as_str()]).unwrap_or_else(|| format!("Season {}", s)),
            synopsis: text(raw, &[format!("synopsissea{}", s).as_str()]),
            art: text(raw, &[format!("imgsea{}", s).as_str()]),
            episodes,
        });
    }
    seasons
}

fn genres(raw: &Value) -> Vec<String> {
    match raw.get("genres").or_else(|| raw.get("genre")) {
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// First non-empty string (or number rendered as string) among `keys`
fn text(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First numeric value among `keys`, accepting numeric strings
fn number(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match raw.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod catalog_tests;
