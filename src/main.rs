//! Series Player - Rust Edition
//! Season/episode browser with a resumable built-in player

// Hide console window on Windows release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

// Use mimalloc for faster memory allocation (Linux, macOS)
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use eframe::egui;
use std::process::Child;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod catalog;
mod config;
mod external;
mod ffmpeg_player;
mod hls;
mod hydrator;
mod models;
mod player;
mod progress;

use config::{AppConfig, DEFAULT_USER_AGENT};
use ffmpeg_player::FfmpegMedia;
use hls::HttpManifestLoader;
use hydrator::{Focus, SeriesPage, TopAction};
use models::{CatalogEntry, LastSelection};
use player::view::PlayerView;
use player::{Direction, MediaElement, OverlayEvent, PlayerOverlay, RemoteKey};
use progress::JsonProgressStore;

/// How long a tile flashes after the player closes
const HIGHLIGHT_FOR: Duration = Duration::from_millis(1500);

/// Load application icon: play triangle over a film strip
fn load_icon() -> egui::IconData {
    let size: usize = 64;
    let mut rgba = vec![0u8; size * size * 4];

    for y in 0..size {
        for x in 0..size {
            let idx = (y * size + x) * 4;
            let nx = x as f32 / size as f32;
            let ny = y as f32 / size as f32;

            // Film strip band with sprocket holes top and bottom
            let in_band = (0.12..=0.88).contains(&ny);
            let in_hole = (ny < 0.22 || ny > 0.78) && ((nx * 8.0).fract() - 0.5).abs() < 0.2;

            // Play triangle
            let px = nx - 0.38;
            let py = ny - 0.5;
            let in_play = (0.0..=0.3).contains(&px) && py.abs() <= (0.3 - px) * 0.6;

            let color: [u8; 4] = if !in_band {
                [0, 0, 0, 0]
            } else if in_play {
                [255, 255, 255, 255]
            } else if in_hole {
                [26, 26, 46, 255]
            } else {
                // Red to orange gradient
                let t = nx * 0.5 + ny * 0.5;
                [(220.0 + 20.0 * t) as u8, (50.0 + 90.0 * t) as u8, 60, 255]
            };
            rgba[idx..idx + 4].copy_from_slice(&color);
        }
    }

    egui::IconData {
        rgba,
        width: size as u32,
        height: size as u32,
    }
}

/// Register a system emoji font so control glyphs render
fn install_emoji_font(ctx: &egui::Context) {
    #[cfg(target_os = "windows")]
    let candidates: &[&str] = &["C:\\Windows\\Fonts\\seguiemj.ttf"];
    #[cfg(target_os = "linux")]
    let candidates: &[&str] = &[
        "/usr/share/fonts/truetype/noto/NotoColorEmoji.ttf",
        "/usr/share/fonts/noto-emoji/NotoColorEmoji.ttf",
        "/usr/share/fonts/google-noto-emoji/NotoColorEmoji.ttf",
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    ];
    #[cfg(target_os = "macos")]
    let candidates: &[&str] = &["/System/Library/Fonts/Apple Color Emoji.ttc"];
    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    let candidates: &[&str] = &[];

    let mut fonts = egui::FontDefinitions::default();
    if let Some(font_data) = candidates.iter().find_map(|path| std::fs::read(path).ok()) {
        fonts
            .font_data
            .insert("emoji".to_owned(), egui::FontData::from_owned(font_data).into());
        fonts
            .families
            .entry(egui::FontFamily::Proportional)
            .or_default()
            .push("emoji".to_owned());
    }
    ctx.set_fonts(fonts);
}

/// Background task messages
enum TaskResult {
    CatalogLoaded(Box<CatalogEntry>),
    Error(String),
    PlayerLog(String),
}

fn main() -> Result<(), eframe::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::load();
    info!(series = %config.series_id, sources = ?config.catalog_sources, "starting");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1250.0, 720.0])
            .with_min_inner_size([800.0, 500.0])
            .with_icon(load_icon()),
        vsync: true,
        hardware_acceleration: eframe::HardwareAcceleration::Preferred,
        ..Default::default()
    };

    eframe::run_native(
        "Series Player - Rust Edition",
        options,
        Box::new(|cc| {
            install_emoji_font(&cc.egui_ctx);
            cc.egui_ctx.set_visuals(if config.dark_mode {
                egui::Visuals::dark()
            } else {
                egui::Visuals::light()
            });
            Ok(Box::new(SeriesApp::new(config)))
        }),
    )
}

struct SeriesApp {
    config: AppConfig,
    store: Arc<JsonProgressStore>,

    // Background task channel
    task_receiver: Receiver<TaskResult>,
    task_sender: Sender<TaskResult>,

    status_message: String,
    loading: bool,

    page: Option<SeriesPage>,
    last_selections: Vec<LastSelection>,

    overlay: PlayerOverlay<FfmpegMedia>,
    view: PlayerView,
    external_player: Option<Child>,
}

impl SeriesApp {
    fn new(config: AppConfig) -> Self {
        let (task_sender, task_receiver) = channel();
        let store = Arc::new(JsonProgressStore::open(JsonProgressStore::default_path()));
        let user_agent = Self::user_agent(&config);
        let loader = Arc::new(HttpManifestLoader::new(
            &user_agent,
            Duration::from_secs(config.manifest_timeout_secs),
        ));
        let overlay = PlayerOverlay::new(
            FfmpegMedia::new(&user_agent),
            store.clone(),
            loader,
            config.overlay_config(),
        );

        let mut app = Self {
            config,
            store,
            task_receiver,
            task_sender,
            status_message: String::new(),
            loading: false,
            page: None,
            last_selections: config::load_last_selections(),
            overlay,
            view: PlayerView::new(),
            external_player: None,
        };
        app.load_catalog();
        app
    }

    fn user_agent(config: &AppConfig) -> String {
        if config.user_agent.trim().is_empty() {
            DEFAULT_USER_AGENT.to_string()
        } else {
            config.user_agent.clone()
        }
    }

    fn load_catalog(&mut self) {
        self.loading = true;
        self.status_message = "Loading catalog...".to_string();

        let sources = self.config.catalog_sources.clone();
        let series_id = self.config.series_id.clone();
        let user_agent = Self::user_agent(&self.config);
        let sender = self.task_sender.clone();

        thread::spawn(move || {
            let result = match catalog::fetch_catalog(&sources, &user_agent) {
                None => TaskResult::Error("No catalog source could be loaded".to_string()),
                Some(entries) => {
                    // No configured id: the first series in the catalog
                    let raw = if series_id.is_empty() {
                        entries.first()
                    } else {
                        catalog::find_entry(&entries, &series_id)
                    };
                    match raw.and_then(catalog::normalize_entry) {
                        Some(entry) => TaskResult::CatalogLoaded(Box::new(entry)),
                        None => TaskResult::Error(format!("Series '{}' not found in catalog", series_id)),
                    }
                }
            };
            let _ = sender.send(result);
        });
    }

    fn process_tasks(&mut self) {
        while let Ok(result) = self.task_receiver.try_recv() {
            match result {
                TaskResult::CatalogLoaded(entry) => {
                    let entry: Arc<CatalogEntry> = Arc::from(entry);
                    info!(series = %entry.id, seasons = entry.seasons.len(), "series ready");
                    self.status_message = format!("{} · {} seasons", entry.title, entry.seasons.len());
                    self.overlay.set_series(Arc::clone(&entry));
                    self.page = Some(SeriesPage::hydrate(
                        entry,
                        self.store.clone(),
                        &self.last_selections,
                        self.config.grid_columns,
                        self.config.retention_days,
                    ));
                    self.loading = false;
                }
                TaskResult::Error(msg) => {
                    error!(%msg, "catalog unavailable");
                    self.status_message = format!("Error: {}", msg);
                    self.loading = false;
                }
                TaskResult::PlayerLog(line) => {
                    debug!(target: "external_player", "{}", line);
                }
            }
        }

        if let Some(child) = self.external_player.as_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                if !status.success() {
                    warn!(code = ?status.code(), "external player exited with error");
                    self.status_message = format!("External player exited ({:?})", status.code());
                }
                self.external_player = None;
            }
        }
    }

    fn remember_selection(&mut self) {
        let Some(selection) = self.page.as_ref().and_then(SeriesPage::selection) else {
            return;
        };
        let unchanged = self
            .last_selections
            .iter()
            .any(|s| s.series_id == selection.series_id && s.season == selection.season && s.episode == selection.episode);
        if !unchanged {
            config::remember_selection(&mut self.last_selections, selection);
            config::save_last_selections(&self.last_selections);
        }
    }

    /// Play whatever the page's focused item resolves to
    fn activate_page(&mut self, now: Instant) {
        let Some(request) = self.page.as_mut().and_then(SeriesPage::activate) else {
            return;
        };
        self.remember_selection();
        // The same tile brings back a hidden player
        if self.overlay.reveal(request.origin, now) {
            return;
        }
        self.overlay.open(request, now);
    }

    fn launch_external(&mut self, url: &str, title: &str) {
        if let Some(ref mut child) = self.external_player {
            external::stop(child);
        }
        let sender = self.task_sender.clone();
        self.external_player = external::launch(
            &self.config.external_player,
            url,
            title,
            &Self::user_agent(&self.config),
            move |line| {
                let _ = sender.send(TaskResult::PlayerLog(line));
            },
        );
        self.status_message = match self.external_player {
            Some(_) => format!("Playing in {}: {}", self.config.external_player, title),
            None => format!("Could not start {}", self.config.external_player),
        };
    }

    fn handle_overlay_events(&mut self, now: Instant) {
        for event in self.overlay.take_events() {
            match event {
                OverlayEvent::FocusEpisode { episode, highlight } => {
                    if let Some(page) = self.page.as_mut() {
                        if highlight {
                            page.highlight(episode, now + HIGHLIGHT_FOR);
                        } else {
                            page.focus_episode(episode);
                        }
                    }
                }
                OverlayEvent::NowPlaying(episode) => {
                    if let Some(page) = self.page.as_mut() {
                        page.focus_episode(episode);
                    }
                    self.remember_selection();
                }
                OverlayEvent::ProgressReset(episode) => {
                    debug!(%episode, "tile progress cleared");
                }
                OverlayEvent::LaunchExternal { url, title } => self.launch_external(&url, &title),
                OverlayEvent::Closed => self.view.clear(),
            }
        }
    }

    fn handle_keys(&mut self, ctx: &egui::Context, now: Instant) {
        let keys: Vec<RemoteKey> = ctx.input(|i| {
            [
                (egui::Key::ArrowUp, RemoteKey::Up),
                (egui::Key::ArrowDown, RemoteKey::Down),
                (egui::Key::ArrowLeft, RemoteKey::Left),
                (egui::Key::ArrowRight, RemoteKey::Right),
                (egui::Key::Enter, RemoteKey::Enter),
                (egui::Key::Escape, RemoteKey::Back),
                (egui::Key::Backspace, RemoteKey::Back),
            ]
            .into_iter()
            .filter(|(key, _)| i.key_pressed(*key))
            .map(|(_, remote)| remote)
            .collect()
        });

        for key in keys {
            if self.overlay.handle_key(key, now) {
                continue;
            }
            let Some(page) = self.page.as_mut() else {
                continue;
            };
            let direction = match key {
                RemoteKey::Up => Direction::Up,
                RemoteKey::Down => Direction::Down,
                RemoteKey::Left => Direction::Left,
                RemoteKey::Right => Direction::Right,
                RemoteKey::Enter => {
                    self.activate_page(now);
                    continue;
                }
                RemoteKey::Back => continue,
            };
            if page.navigate(direction) {
                self.remember_selection();
            }
        }
    }

    fn show_series_page(&mut self, ui: &mut egui::Ui, now: Instant) {
        if self.page.is_none() {
            ui.vertical_centered(|ui| {
                ui.add_space(120.0);
                if self.loading {
                    ui.spinner();
                }
                ui.label(&self.status_message);
                if !self.loading && ui.button("Retry").clicked() {
                    self.load_catalog();
                }
            });
            return;
        }
        let Some(page) = self.page.as_ref() else {
            return;
        };

        let entry = Arc::clone(page.entry());
        let focus = page.focus();
        let season_index = page.season_index();
        let columns = page.columns();
        let focus_stroke = egui::Stroke::new(2.0, egui::Color32::WHITE);
        let stroke_if = |focused: bool| if focused { focus_stroke } else { egui::Stroke::NONE };
        let mut clicked: Option<Focus> = None;

        // Header
        ui.heading(&entry.title);
        ui.horizontal(|ui| {
            if let Some(year) = entry.year {
                ui.label(year.to_string());
            }
            if let Some(ref age) = entry.age_rating {
                ui.label(egui::RichText::new(age).strong());
            }
            if let Some(rating) = entry.display_rating() {
                ui.label(format!("★ {}", rating));
            }
            if !entry.genres.is_empty() {
                ui.label(entry.genres.join(" · "));
            }
        });
        let synopsis = entry
            .seasons
            .get(season_index)
            .and_then(|s| s.synopsis.as_deref())
            .unwrap_or(&entry.synopsis);
        ui.label(synopsis);
        ui.add_space(8.0);

        // Top actions
        ui.horizontal(|ui| {
            for action in [TopAction::Resume, TopAction::StartOver] {
                let button = egui::Button::new(action.label()).stroke(stroke_if(focus == Focus::Top(action)));
                if ui.add(button).clicked() {
                    clicked = Some(Focus::Top(action));
                }
            }
        });
        ui.add_space(8.0);

        // Seasons row
        ui.horizontal_wrapped(|ui| {
            for (i, season) in entry.seasons.iter().enumerate() {
                let button = egui::Button::new(season.title.as_str())
                    .selected(i == season_index)
                    .stroke(stroke_if(focus == Focus::Season(i)));
                if ui.add(button).clicked() {
                    clicked = Some(Focus::Season(i));
                }
            }
        });
        ui.separator();

        // Episode grid
        egui::ScrollArea::vertical().show(ui, |ui| {
            let Some(season) = entry.seasons.get(season_index) else {
                return;
            };
            egui::Grid::new("episode_grid")
                .num_columns(columns)
                .spacing([12.0, 12.0])
                .show(ui, |ui| {
                    for (i, episode) in season.episodes.iter().enumerate() {
                        let at = models::EpisodeRef::new(season.number, episode.number);
                        let focused = focus == Focus::Episode(i);
                        let stroke = if page.is_highlighted(at, now) {
                            egui::Stroke::new(3.0, egui::Color32::GOLD)
                        } else {
                            stroke_if(focused)
                        };

                        let response = egui::Frame::group(ui.style())
                            .stroke(stroke)
                            .show(ui, |ui| {
                                ui.set_width(180.0);
                                ui.label(egui::RichText::new(&episode.label).strong());
                                ui.small(episode.kind.to_string());
                                if let Some(fraction) = page.episode_progress(at) {
                                    ui.add(egui::ProgressBar::new(fraction).desired_height(4.0));
                                }
                            })
                            .response
                            .interact(egui::Sense::click());
                        if focused {
                            response.scroll_to_me(None);
                        }
                        if response.clicked() {
                            clicked = Some(Focus::Episode(i));
                        }

                        if (i + 1) % columns == 0 {
                            ui.end_row();
                        }
                    }
                });
        });

        if let Some(target) = clicked {
            if let Some(page) = self.page.as_mut() {
                page.set_focus(target);
            }
            self.activate_page(now);
        }
    }
}

impl eframe::App for SeriesApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();

        // Process background task results (non-blocking)
        self.process_tasks();

        self.handle_keys(ctx, now);
        self.overlay.update(now);
        self.handle_overlay_events(now);

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(&self.status_message);
                if let Some(request) = self.overlay.request() {
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        ui.label(format!("{:?} · {}", self.overlay.state(), request.title));
                    });
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.overlay.is_visible() {
                self.view.show(ctx, ui, &mut self.overlay, now);
            } else {
                self.show_series_page(ui, now);
            }
        });

        // Clicks inside the view may have produced events
        self.handle_overlay_events(now);

        // Repaint continuously while frames arrive, otherwise at the next
        // timer or when a tile highlight runs out
        let highlight_ends = self.page.as_ref().and_then(|p| p.highlight_ends(now));
        let next_wake = match (self.overlay.next_deadline(), highlight_ends) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if self.overlay.is_visible() && !self.overlay.media().is_paused() {
            ctx.request_repaint();
        } else if let Some(deadline) = next_wake {
            ctx.request_repaint_after(deadline.saturating_duration_since(now));
        } else if self.loading {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
    }
}

impl Drop for SeriesApp {
    fn drop(&mut self) {
        self.overlay.close(Instant::now());
        if !self.store.flush() {
            warn!("progress may not have been written before exit");
        }
        if let Some(ref mut child) = self.external_player {
            external::stop(child);
        }
    }
}
