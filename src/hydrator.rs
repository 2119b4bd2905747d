//! Series page state: season selector, episode grid and directional focus
//!
//! Focus moves top action row -> seasons row -> episode grid. The grid is a
//! flat list laid out in `columns` columns, so Left/Right wrap across grid
//! rows on their own.

use crate::models::{CatalogEntry, EpisodeRef, LastSelection, ProgressKey};
use crate::player::{Direction, PlaybackRequest};
use crate::progress::{now_ms, retention_ms, ProgressStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopAction {
    /// Most recently watched episode, from its saved position
    Resume,
    /// First episode from zero
    StartOver,
}

impl TopAction {
    pub fn label(&self) -> &'static str {
        match self {
            TopAction::Resume => "▶ Resume",
            TopAction::StartOver => "⟲ Start over",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Top(TopAction),
    /// Index into the season list
    Season(usize),
    /// Index into the selected season's episodes
    Episode(usize),
}

pub struct SeriesPage {
    entry: Arc<CatalogEntry>,
    store: Arc<dyn ProgressStore>,
    columns: usize,
    season_index: usize,
    focus: Focus,
    highlight: Option<(EpisodeRef, Instant)>,
}

impl SeriesPage {
    /// Build the page for `entry`: drop expired progress of this series and
    /// restore the last viewed season/episode when it still exists.
    pub fn hydrate(
        entry: Arc<CatalogEntry>,
        store: Arc<dyn ProgressStore>,
        last_selections: &[LastSelection],
        columns: usize,
        retention_days: i64,
    ) -> Self {
        let swept = store.sweep(&entry.id, now_ms(), retention_ms(retention_days));
        if swept > 0 {
            info!(series = %entry.id, swept, "expired progress removed");
        }

        let mut page = Self {
            entry,
            store,
            columns: columns.max(1),
            season_index: 0,
            focus: Focus::Top(TopAction::Resume),
            highlight: None,
        };

        let restored = last_selections
            .iter()
            .find(|s| s.series_id == page.entry.id)
            .map(|s| EpisodeRef::new(s.season, s.episode));
        if let Some(at) = restored {
            if page.focus_episode(at) {
                debug!(%at, "restored last selection");
            }
        }
        page
    }

    pub fn entry(&self) -> &Arc<CatalogEntry> {
        &self.entry
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn season_index(&self) -> usize {
        self.season_index
    }

    fn episode_count(&self) -> usize {
        self.entry
            .seasons
            .get(self.season_index)
            .map_or(0, |s| s.episodes.len())
    }

    /// Episode coordinates of a grid index in the selected season
    pub fn episode_at(&self, index: usize) -> Option<EpisodeRef> {
        let season = self.entry.seasons.get(self.season_index)?;
        let episode = season.episodes.get(index)?;
        Some(EpisodeRef::new(season.number, episode.number))
    }

    /// Select a season by list index; grid focus is dropped
    pub fn select_season(&mut self, index: usize) {
        if index < self.entry.seasons.len() {
            self.season_index = index;
            if matches!(self.focus, Focus::Episode(_)) {
                self.focus = Focus::Season(index);
            }
        }
    }

    /// Move focus to `at`, switching season if needed
    pub fn focus_episode(&mut self, at: EpisodeRef) -> bool {
        let Some(season_index) = self.entry.seasons.iter().position(|s| s.number == at.season) else {
            return false;
        };
        let Some(index) = self.entry.seasons[season_index]
            .episodes
            .iter()
            .position(|e| e.number == at.episode)
        else {
            return false;
        };
        self.season_index = season_index;
        self.focus = Focus::Episode(index);
        true
    }

    /// Pointer selection; out-of-range targets are ignored
    pub fn set_focus(&mut self, focus: Focus) {
        let valid = match focus {
            Focus::Top(_) => true,
            Focus::Season(i) => i < self.entry.seasons.len(),
            Focus::Episode(i) => i < self.episode_count(),
        };
        if valid {
            if let Focus::Season(i) = focus {
                self.season_index = i;
            }
            self.focus = focus;
        }
    }

    /// Focus `at` and flash it until `until`
    pub fn highlight(&mut self, at: EpisodeRef, until: Instant) {
        if self.focus_episode(at) {
            self.highlight = Some((at, until));
        }
    }

    /// End of a running highlight, so the host can repaint when it fades
    pub fn highlight_ends(&self, now: Instant) -> Option<Instant> {
        self.highlight.map(|(_, until)| until).filter(|until| now < *until)
    }

    pub fn is_highlighted(&self, at: EpisodeRef, now: Instant) -> bool {
        self.highlight.is_some_and(|(h, until)| h == at && now < until)
    }

    /// Apply a directional press. Returns whether focus moved.
    pub fn navigate(&mut self, direction: Direction) -> bool {
        let count = self.episode_count();
        let seasons = self.entry.seasons.len();
        let columns = self.columns;

        let next = match (self.focus, direction) {
            (Focus::Top(TopAction::Resume), Direction::Right) => Some(Focus::Top(TopAction::StartOver)),
            (Focus::Top(TopAction::StartOver), Direction::Left) => Some(Focus::Top(TopAction::Resume)),
            (Focus::Top(_), Direction::Down) if seasons > 0 => Some(Focus::Season(self.season_index)),
            (Focus::Top(_), _) => None,

            (Focus::Season(i), Direction::Left) if i > 0 => Some(Focus::Season(i - 1)),
            (Focus::Season(i), Direction::Right) if i + 1 < seasons => Some(Focus::Season(i + 1)),
            (Focus::Season(_), Direction::Up) => Some(Focus::Top(TopAction::Resume)),
            (Focus::Season(_), Direction::Down) if count > 0 => Some(Focus::Episode(0)),
            (Focus::Season(_), _) => None,

            (Focus::Episode(i), Direction::Left) if i > 0 => Some(Focus::Episode(i - 1)),
            (Focus::Episode(i), Direction::Right) if i + 1 < count => Some(Focus::Episode(i + 1)),
            (Focus::Episode(i), Direction::Up) if i < columns => Some(Focus::Season(self.season_index)),
            (Focus::Episode(i), Direction::Up) => Some(Focus::Episode(i - columns)),
            (Focus::Episode(i), Direction::Down) if i / columns < (count.saturating_sub(1)) / columns => {
                Some(Focus::Episode((i + columns).min(count - 1)))
            }
            (Focus::Episode(_), _) => None,
        };

        match next {
            Some(focus) => {
                // The season row selects as focus moves along it
                if let Focus::Season(i) = focus {
                    self.season_index = i;
                }
                self.focus = focus;
                true
            }
            None => false,
        }
    }

    /// Activate the focused item. Episodes and top actions yield the
    /// request to play; seasons only select.
    pub fn activate(&mut self) -> Option<PlaybackRequest> {
        match self.focus {
            Focus::Top(TopAction::Resume) => {
                let (at, start_at) = self.resume_target()?;
                self.focus_episode(at);
                PlaybackRequest::for_episode(&self.entry, at, start_at)
            }
            Focus::Top(TopAction::StartOver) => {
                let at = self.entry.first_episode()?;
                self.focus_episode(at);
                PlaybackRequest::for_episode(&self.entry, at, 0.0)
            }
            Focus::Season(i) => {
                self.select_season(i);
                None
            }
            Focus::Episode(i) => {
                let at = self.episode_at(i)?;
                self.request_for(at)
            }
        }
    }

    /// Request for `at` starting from its saved position
    pub fn request_for(&self, at: EpisodeRef) -> Option<PlaybackRequest> {
        PlaybackRequest::for_episode(&self.entry, at, self.saved_time(at))
    }

    pub fn saved_time(&self, at: EpisodeRef) -> f64 {
        self.store
            .get(ProgressKey::new(&self.entry.id, at).as_str())
            .map_or(0.0, |r| r.time)
    }

    /// Watched fraction of `at`, for the tile indicator
    pub fn episode_progress(&self, at: EpisodeRef) -> Option<f32> {
        self.store
            .get(ProgressKey::new(&self.entry.id, at).as_str())
            .and_then(|r| r.fraction())
    }

    /// Most recently updated episode of this series with its position,
    /// falling back to the first episode from zero
    pub fn resume_target(&self) -> Option<(EpisodeRef, f64)> {
        let latest = self
            .store
            .get_all()
            .into_iter()
            .filter_map(|r| {
                let (series, at) = ProgressKey::split(&r.id)?;
                if series != self.entry.id {
                    return None;
                }
                self.entry.episode(at)?;
                Some((at, r.time, r.updated))
            })
            .max_by_key(|(_, _, updated)| *updated);

        match latest {
            Some((at, time, _)) => Some((at, time)),
            None => self.entry.first_episode().map(|at| (at, 0.0)),
        }
    }

    /// Current grid selection, for persisting across restarts
    pub fn selection(&self) -> Option<LastSelection> {
        let Focus::Episode(i) = self.focus else {
            return None;
        };
        let at = self.episode_at(i)?;
        Some(LastSelection {
            series_id: self.entry.id.clone(),
            season: at.season,
            episode: at.episode,
            updated: now_ms(),
        })
    }
}
