//! Deadline scheduler driving every player timer
//!
//! Time is passed in by the caller, so the player is driven from the UI loop
//! and tests can step a virtual clock. Each kind holds at most one deadline:
//! scheduling a kind replaces the old one, which rules out duplicate
//! concurrent timers. Tokens carry a generation so a cancelled deadline is
//! never mistaken for its replacement.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Periodic progress save while playing
    Autosave,
    /// Idle timeout for the on-screen controls
    HideControls,
    /// Next-episode countdown tick
    Countdown,
    /// Delay before a skipped prompt disappears
    SkipGrace,
    /// Fallback when a preview seek never reports back
    PreviewTimeout,
    /// Bounded wait for the HLS manifest
    ManifestTimeout,
    /// Playback stall poll
    StallCheck,
    /// Pause between an episode ending and the next one starting
    AdvanceDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    kind: TimerKind,
    generation: u64,
}

impl TimerToken {
    pub fn kind(&self) -> TimerKind {
        self.kind
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    period: Option<Duration>,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    slots: HashMap<TimerKind, Deadline>,
    generation: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire once after `delay`
    pub fn once(&mut self, kind: TimerKind, now: Instant, delay: Duration) -> TimerToken {
        self.arm(kind, now + delay, None)
    }

    /// Fire every `period`, first after one period
    pub fn every(&mut self, kind: TimerKind, now: Instant, period: Duration) -> TimerToken {
        self.arm(kind, now + period, Some(period))
    }

    fn arm(&mut self, kind: TimerKind, at: Instant, period: Option<Duration>) -> TimerToken {
        self.generation += 1;
        self.slots.insert(
            kind,
            Deadline {
                at,
                period,
                generation: self.generation,
            },
        );
        TimerToken {
            kind,
            generation: self.generation,
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.slots.remove(&kind).is_some()
    }

    /// Cancel only if the deadline behind `token` is still the armed one
    pub fn cancel_token(&mut self, token: TimerToken) -> bool {
        match self.slots.get(&token.kind) {
            Some(d) if d.generation == token.generation => {
                self.slots.remove(&token.kind);
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&mut self) {
        self.slots.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots.contains_key(&kind)
    }

    pub fn armed_count(&self) -> usize {
        self.slots.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().map(|d| d.at).min()
    }

    /// Collect the kinds due at `now`, earliest first. One-shot deadlines are
    /// removed; repeating ones move to their next future slot and fire at
    /// most once per call.
    pub fn due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut fired: Vec<(Instant, TimerKind)> = Vec::new();

        self.slots.retain(|kind, deadline| {
            if deadline.at > now {
                return true;
            }
            fired.push((deadline.at, *kind));
            match deadline.period {
                Some(period) if !period.is_zero() => {
                    while deadline.at <= now {
                        deadline.at += period;
                    }
                    true
                }
                _ => false,
            }
        });

        fired.sort_by_key(|(at, _)| *at);
        fired.into_iter().map(|(_, kind)| kind).collect()
    }
}
