//! egui rendering of the player overlay

use super::{Control, FrameRef, MediaElement, PlayerOverlay, PlayerState, Preview};
use std::time::Instant;

const FOCUS_STROKE: egui::Stroke = egui::Stroke {
    width: 2.0,
    color: egui::Color32::WHITE,
};

/// Texture cache for the video surface and the scrub preview
#[derive(Default)]
pub struct PlayerView {
    video: Option<(u64, egui::TextureHandle)>,
    preview: Option<(u64, egui::TextureHandle)>,
}

/// Upload `frame` unless the cached texture already shows it
fn refresh(
    ctx: &egui::Context,
    slot: &mut Option<(u64, egui::TextureHandle)>,
    name: &str,
    frame: &FrameRef,
) {
    if slot.as_ref().is_some_and(|(serial, _)| *serial == frame.serial) {
        return;
    }
    let image = egui::ColorImage::from_rgb(
        [frame.frame.width as usize, frame.frame.height as usize],
        &frame.frame.data,
    );
    let texture = ctx.load_texture(name, image, egui::TextureOptions::LINEAR);
    *slot = Some((frame.serial, texture));
}

/// Fit `texture` in `available`, keeping its aspect ratio
fn fitted(texture: &egui::TextureHandle, available: egui::Vec2, fill: f32) -> egui::Vec2 {
    let tex_size = texture.size_vec2();
    let aspect = tex_size.x / tex_size.y.max(1.0);
    if available.x / available.y.max(1.0) > aspect {
        egui::vec2(available.y * aspect * fill, available.y * fill)
    } else {
        egui::vec2(available.x * fill, available.x / aspect * fill)
    }
}

/// `m:ss`, or `h:mm:ss` past an hour
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() { seconds.max(0.0) as u64 } else { 0 };
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

impl PlayerView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop cached textures, e.g. after the overlay closed
    pub fn clear(&mut self) {
        self.video = None;
        self.preview = None;
    }

    /// Render the overlay into `ui`. Pointer clicks go straight to
    /// [`PlayerOverlay::activate`].
    pub fn show<M: MediaElement>(
        &mut self,
        ctx: &egui::Context,
        ui: &mut egui::Ui,
        overlay: &mut PlayerOverlay<M>,
        now: Instant,
    ) {
        if let Some(frame) = overlay.media().latest_frame() {
            refresh(ctx, &mut self.video, "video_frame", &frame);
        }

        let title = overlay
            .request()
            .map(|r| r.title.clone())
            .unwrap_or_default();
        let paused = overlay.media().is_paused();

        if ui.ui_contains_pointer() && ui.input(|i| i.pointer.delta() != egui::Vec2::ZERO) {
            overlay.touch(now);
        }

        ui.vertical_centered(|ui| {
            let controls_height = if overlay.controls_visible() { 110.0 } else { 0.0 };
            let available = ui.available_size() - egui::vec2(0.0, controls_height);

            if let Some((_, ref texture)) = self.video {
                ui.image((texture.id(), fitted(texture, available, 0.95)));
            } else {
                ui.add_space(available.y * 0.4);
                match overlay.state() {
                    PlayerState::Opening => {
                        ui.spinner();
                        ui.label("Connecting to stream...");
                    }
                    _ => {
                        if let Some(error) = overlay.last_error() {
                            ui.colored_label(egui::Color32::RED, format!("Error: {}", error));
                        } else {
                            ui.spinner();
                        }
                    }
                }
                ui.add_space(available.y * 0.4);
            }
        });

        if let Some(prompt) = overlay.prompt().cloned() {
            egui::Area::new(egui::Id::new("next_episode_prompt"))
                .anchor(egui::Align2::RIGHT_BOTTOM, egui::vec2(-24.0, -140.0))
                .show(ctx, |ui| {
                    egui::Frame::popup(ui.style()).show(ui, |ui| {
                        if prompt.skipped {
                            ui.label("Autoplay cancelled");
                        } else {
                            ui.label(format!("Next: {}", prompt.next));
                            ui.heading(format!("Starting in {}", prompt.countdown));
                        }
                    });
                });
        }

        if !overlay.controls_visible() {
            return;
        }

        let duration = overlay.duration().unwrap_or(0.0);
        let focus = overlay.focus();
        let visible = overlay.visible_controls();
        let focused = |control: Control| if focus == control { FOCUS_STROKE } else { egui::Stroke::NONE };

        ui.separator();

        if let Some(scrub) = overlay.scrub() {
            let (target, frame) = match scrub.preview {
                Preview::Pending { target } => (target, None),
                Preview::Ready { target, frame } => (target, frame),
            };
            match frame {
                Some(frame) => {
                    refresh(ctx, &mut self.preview, "scrub_preview", &frame);
                    if let Some((_, ref texture)) = self.preview {
                        ui.image((texture.id(), fitted(texture, egui::vec2(240.0, 135.0), 1.0)));
                    }
                }
                None => {
                    ui.spinner();
                }
            }
            let fraction = if duration > 0.0 { (target / duration) as f32 } else { 0.0 };
            ui.add(
                egui::ProgressBar::new(fraction)
                    .text(format!("{} / {}", format_clock(target), format_clock(duration))),
            );
            ui.small("◀ ▶ to seek, Enter to confirm");
            return;
        }

        let mut clicked = None;
        ui.horizontal(|ui| {
            ui.vertical(|ui| {
                for control in [Control::Restart, Control::PlayPause, Control::Hide] {
                    let button = egui::Button::new(control.label(paused)).stroke(focused(control));
                    if ui.add(button).clicked() {
                        clicked = Some(control);
                    }
                }
            });

            let position = overlay.current_time();
            let fraction = if duration > 0.0 { (position / duration) as f32 } else { 0.0 };
            let bar = egui::ProgressBar::new(fraction.clamp(0.0, 1.0))
                .desired_width(ui.available_width() - 120.0)
                .text(format!("{} / {}", format_clock(position), format_clock(duration)));
            let response = ui.add(bar).interact(egui::Sense::click());
            if focus == Control::SeekBar {
                ui.painter().rect_stroke(response.rect, 2.0, FOCUS_STROKE, egui::StrokeKind::Outside);
            }
            if response.clicked() {
                clicked = Some(Control::SeekBar);
            }

            if visible.contains(&Control::Skip) {
                let button = egui::Button::new(Control::Skip.label(paused)).stroke(focused(Control::Skip));
                if ui.add(button).clicked() {
                    clicked = Some(Control::Skip);
                }
            }
        });
        ui.label(title);

        if let Some(control) = clicked {
            overlay.activate(control, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0.0), "0:00");
        assert_eq!(format_clock(75.9), "1:15");
        assert_eq!(format_clock(3725.0), "1:02:05");
        assert_eq!(format_clock(f64::NAN), "0:00");
    }
}
