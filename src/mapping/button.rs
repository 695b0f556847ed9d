//! Button-Entprellung und Unterscheidung kurzer/langer Druck
//!
//! Die Firmware meldet gedrückte Buttons wiederholt ("E Button Clicked") und
//! nicht immer ein Loslassen. Ein Zyklus beginnt mit dem ersten Down, wiederholte
//! Downs erneuern nur `last_seen_at`, und ein fehlendes Up wird nach
//! `button_timeout` synthetisiert.
//!
//! ```text
//! Idle ──Down──► Pressed ──Up / Timeout──► Short | Long ──► Idle
//!                  ▲   │
//!                  └───┘ Down (refresh)
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonSettings {
    pub long_press_threshold: Duration,
    pub button_timeout: Duration,
    pub debounce: Duration,
}

impl Default for ButtonSettings {
    fn default() -> Self {
        Self {
            long_press_threshold: Duration::from_millis(200),
            button_timeout: Duration::from_millis(150),
            debounce: Duration::from_millis(100),
        }
    }
}

/// Laufender Druckzyklus eines Buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonTrack {
    pub pressed_at: Instant,
    pub last_seen_at: Instant,
    /// Schwelle für langen Druck bereits erreicht (nur für das Log)
    pub long_press_fired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressKind {
    Short,
    Long,
}

/// Abgeschlossener Zyklus, genau einer pro Down…Up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPress {
    pub button: String,
    pub kind: PressKind,
    pub held_for: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownOutcome {
    /// Neuer Zyklus begonnen
    Started,
    /// Wiederholung eines laufenden Zyklus
    Refreshed,
    /// Nachzügler kurz nach dem Ende des letzten Zyklus
    Debounced,
}

#[derive(Debug, Default)]
pub struct ButtonTracker {
    settings: ButtonSettings,
    tracks: HashMap<String, ButtonTrack>,
    resolved_at: HashMap<String, Instant>,
}

impl ButtonTracker {
    pub fn new(settings: ButtonSettings) -> Self {
        Self {
            settings,
            tracks: HashMap::new(),
            resolved_at: HashMap::new(),
        }
    }

    pub fn on_down(&mut self, button: &str, now: Instant) -> DownOutcome {
        if let Some(track) = self.tracks.get_mut(button) {
            track.last_seen_at = now;
            return DownOutcome::Refreshed;
        }

        if let Some(resolved) = self.resolved_at.get(button) {
            if now.saturating_duration_since(*resolved) < self.settings.debounce {
                debug!("Ignoring trailing {} after resolved press", button);
                return DownOutcome::Debounced;
            }
        }

        debug!("{} pressed", button);
        self.tracks.insert(
            button.to_string(),
            ButtonTrack {
                pressed_at: now,
                last_seen_at: now,
                long_press_fired: false,
            },
        );
        DownOutcome::Started
    }

    /// Ends the cycle of `button`; `None` if it was not pressed
    pub fn on_up(&mut self, button: &str, now: Instant) -> Option<ResolvedPress> {
        let Some(track) = self.tracks.remove(button) else {
            debug!("Ignoring release of idle {}", button);
            return None;
        };
        Some(self.resolve(button, track, now))
    }

    fn resolve(&mut self, button: &str, track: ButtonTrack, now: Instant) -> ResolvedPress {
        let held_for = now.saturating_duration_since(track.pressed_at);
        let kind = if held_for >= self.settings.long_press_threshold {
            PressKind::Long
        } else {
            PressKind::Short
        };

        self.resolved_at.insert(button.to_string(), now);
        debug!("{} resolved as {:?} after {:?}", button, kind, held_for);
        ResolvedPress {
            button: button.to_string(),
            kind,
            held_for,
        }
    }

    /// Synthesizes Up for buttons silent longer than `button_timeout`
    pub fn sweep(&mut self, now: Instant) -> Vec<ResolvedPress> {
        let threshold = self.settings.long_press_threshold;
        for (button, track) in self.tracks.iter_mut() {
            if !track.long_press_fired && now.saturating_duration_since(track.pressed_at) >= threshold
            {
                track.long_press_fired = true;
                info!("{} held past long press threshold", button);
            }
        }

        let timeout = self.settings.button_timeout;
        let mut expired: Vec<String> = self
            .tracks
            .iter()
            .filter(|(_, track)| now.saturating_duration_since(track.last_seen_at) > timeout)
            .map(|(button, _)| button.clone())
            .collect();
        expired.sort();

        let mut resolved = Vec::with_capacity(expired.len());
        for button in expired {
            if let Some(track) = self.tracks.remove(&button) {
                resolved.push(self.resolve(&button, track, now));
            }
        }
        resolved
    }

    pub fn is_pressed(&self, button: &str) -> bool {
        self.tracks.contains_key(button)
    }

    pub fn track(&self, button: &str) -> Option<&ButtonTrack> {
        self.tracks.get(button)
    }

    /// Resolves every pending cycle as if its button timeout had run out
    pub fn flush(&mut self) -> Vec<ResolvedPress> {
        let timeout = self.settings.button_timeout;
        let mut pending: Vec<(String, ButtonTrack)> = self.tracks.drain().collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));

        pending
            .into_iter()
            .map(|(button, track)| {
                let at = track.last_seen_at + timeout;
                self.resolve(&button, track, at)
            })
            .collect()
    }

    /// Drops all pending cycles without resolving them; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.tracks.len();
        self.tracks.clear();
        dropped
    }
}
