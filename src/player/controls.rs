//! On-screen transport controls and their directional navigation
//!
//! Layout (remote-control oriented):
//!
//! ```text
//!   [Restart]
//!   [Play/Pause] ==== seek bar ====            [Skip]
//!   [Hide]
//! ```
//!
//! Navigation is an explicit table, not a ring. Pairs that map to
//! [`NavOutcome::Stop`] are dead-ends and do nothing.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    PlayPause,
    SeekBar,
    Restart,
    /// Pause and hand focus back to the episode grid
    Hide,
    /// Only present while the next-episode prompt is up
    Skip,
}

impl Control {
    pub fn label(&self, paused: bool) -> &'static str {
        match self {
            Control::PlayPause if paused => "▶ Play",
            Control::PlayPause => "⏸ Pause",
            Control::SeekBar => "Seek",
            Control::Restart => "⟲ Restart",
            Control::Hide => "☰ Episodes",
            Control::Skip => "Skip ⏭",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavOutcome {
    Focus(Control),
    /// Right on play/pause enters scrub mode instead of moving focus
    EnterScrub,
    /// Intentional dead-end
    Stop,
}

/// Resolve a directional press. `skip_visible` reflects whether the skip
/// control currently exists.
pub fn navigate(from: Control, direction: Direction, skip_visible: bool) -> NavOutcome {
    use Control::*;
    use Direction::*;

    match (from, direction) {
        (PlayPause, Left) => NavOutcome::Stop,
        (PlayPause, Right) => NavOutcome::EnterScrub,
        (PlayPause, Up) => NavOutcome::Focus(Restart),
        (PlayPause, Down) => NavOutcome::Focus(Hide),

        (Restart, Down) => NavOutcome::Focus(PlayPause),
        (Restart, Up | Left | Right) => NavOutcome::Stop,

        (Hide, Up) => NavOutcome::Focus(PlayPause),
        (Hide, Right) if skip_visible => NavOutcome::Focus(Skip),
        (Hide, Down | Left | Right) => NavOutcome::Stop,

        (Skip, Left) => NavOutcome::Focus(PlayPause),
        (Skip, Up | Down | Right) => NavOutcome::Stop,

        // Seek bar input is owned by scrub mode
        (SeekBar, _) => NavOutcome::Stop,
    }
}
