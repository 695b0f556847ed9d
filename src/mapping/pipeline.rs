//! Key pipeline: decoded serial lines in, ledger operations out
//!
//! Owns the per-connection state (filter history, button cycles) and the ledger.
//! All methods take `now` explicitly so the timing rules can be driven from tests
//! without sleeping.

use crate::controller::event_classifier::{classify, ButtonPhase, NormalizedToken};
use crate::controller::line_decoder::decode_line;
use crate::mapping::button::{ButtonSettings, ButtonTracker, DownOutcome, PressKind, ResolvedPress};
use crate::mapping::deadzone::{direction_label, DeadzoneFilter, FilterSettings};
use crate::mapping::injector::KeyInjector;
use crate::mapping::keys::{join_keys, LogicalKey};
use crate::mapping::ledger::{KeyClass, KeyLedger, KeyTimeouts};
use crate::mapping::profile::{ActionMapping, LabelAction};
use crate::mapping::MappingError;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub filter: FilterSettings,
    pub buttons: ButtonSettings,
    pub timeouts: KeyTimeouts,
    pub sanity_bound: i32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            filter: FilterSettings::default(),
            buttons: ButtonSettings::default(),
            timeouts: KeyTimeouts::default(),
            sanity_bound: crate::controller::event_classifier::DEFAULT_SANITY_BOUND,
        }
    }
}

/// Zähler für die periodische Statuszeile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub lines: u64,
    pub empty: u64,
    pub positions: u64,
    pub labels: u64,
    pub buttons: u64,
    pub ignorable: u64,
    pub unknown: u64,
    pub errors: u64,
    pub short_presses: u64,
    pub long_presses: u64,
}

impl PipelineStats {
    fn count(&mut self, token: &NormalizedToken) {
        match token {
            NormalizedToken::Position { .. } => self.positions += 1,
            NormalizedToken::DirectionLabel { .. } => self.labels += 1,
            NormalizedToken::Button { .. } => self.buttons += 1,
            NormalizedToken::Ignorable => self.ignorable += 1,
            NormalizedToken::Unknown { .. } => self.unknown += 1,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "lines={} positions={} labels={} buttons={} (short={} long={}) ignorable={} unknown={} errors={}",
            self.lines,
            self.positions,
            self.labels,
            self.buttons,
            self.short_presses,
            self.long_presses,
            self.ignorable,
            self.unknown,
            self.errors
        )
    }
}

pub struct KeyPipeline {
    mapping: Arc<ActionMapping>,
    settings: PipelineSettings,
    filter: DeadzoneFilter,
    buttons: ButtonTracker,
    ledger: KeyLedger,
    stats: PipelineStats,
}

impl KeyPipeline {
    pub fn new(
        mapping: Arc<ActionMapping>,
        settings: PipelineSettings,
        injector: Box<dyn KeyInjector>,
    ) -> Result<Self, MappingError> {
        mapping.validate()?;
        let filter = DeadzoneFilter::new(settings.filter)?;

        Ok(Self {
            mapping,
            settings,
            filter,
            buttons: ButtonTracker::new(settings.buttons),
            ledger: KeyLedger::new(injector),
            stats: PipelineStats::default(),
        })
    }

    pub fn mapping(&self) -> &Arc<ActionMapping> {
        &self.mapping
    }

    pub fn ledger(&self) -> &KeyLedger {
        &self.ledger
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Decodes, classifies and applies one raw serial line
    pub fn handle_line(&mut self, raw: &str, now: Instant) -> Option<NormalizedToken> {
        self.stats.lines += 1;

        let Some(payload) = decode_line(raw) else {
            self.stats.empty += 1;
            return None;
        };

        match classify(payload, &self.mapping, self.settings.sanity_bound) {
            Ok(token) => {
                self.stats.count(&token);
                self.handle_token(&token, now);
                Some(token)
            }
            Err(e) => {
                self.stats.errors += 1;
                warn!("Dropping line: {}", e);
                None
            }
        }
    }

    pub fn handle_token(&mut self, token: &NormalizedToken, now: Instant) {
        match token {
            NormalizedToken::Position { x, y } => self.apply_position(*x, *y, now),
            NormalizedToken::DirectionLabel { name } => self.apply_label(name, now),
            NormalizedToken::Button { name, phase } => self.apply_button(name, *phase, now),
            NormalizedToken::Ignorable => {}
            NormalizedToken::Unknown { raw } => debug!("Unmapped event: {}", raw),
        }
    }

    fn apply_position(&mut self, x: i32, y: i32, now: Instant) {
        let ledger = &self.ledger;
        let plan = self
            .filter
            .plan(x, y, &self.mapping.directions, |key| ledger.is_held(key));

        for key in &plan.release {
            self.ledger.release(key);
        }
        for key in plan.press.iter().chain(plan.keep.iter()) {
            self.ledger.press(key, KeyClass::Direction, now);
        }

        if !plan.is_noop() {
            debug!(
                "Stick X={} Y={} -> {}",
                x,
                y,
                direction_label(&self.mapping.directions, &plan.target)
            );
        }
    }

    fn apply_label(&mut self, label: &str, now: Instant) {
        let Some(action) = self.mapping.label_action(label).cloned() else {
            return;
        };

        match action {
            LabelAction::Hold(keys) => self.hold_directions(&keys, now),
            LabelAction::Recenter => {
                let released = self.ledger.release_class(KeyClass::Direction);
                if !released.is_empty() {
                    debug!("{}: released {}", label, join_keys(&released));
                }
            }
            LabelAction::Nothing => {}
        }
    }

    /// Makes `target` the held direction set
    fn hold_directions(&mut self, target: &[LogicalKey], now: Instant) {
        let stale: Vec<LogicalKey> = self
            .mapping
            .directions
            .all()
            .into_iter()
            .filter(|key| !target.contains(key))
            .cloned()
            .collect();
        for key in &stale {
            self.ledger.release(key);
        }
        for key in target {
            self.ledger.press(key, KeyClass::Direction, now);
        }
    }

    fn apply_button(&mut self, name: &str, phase: ButtonPhase, now: Instant) {
        match phase {
            ButtonPhase::Down => {
                if self.buttons.on_down(name, now) == DownOutcome::Refreshed {
                    // Hold keys of an already resolved long press stay down while reported
                    self.refresh_hold_keys(name, now);
                }
            }
            ButtonPhase::Up => {
                if let Some(press) = self.buttons.on_up(name, now) {
                    self.fire(press, now);
                }
            }
            ButtonPhase::Unknown => debug!("{} without phase, ignored", name),
        }
    }

    fn refresh_hold_keys(&mut self, name: &str, now: Instant) {
        let Some(binding) = self.mapping.button(name) else {
            return;
        };
        for key in binding.hold_keys() {
            if self
                .ledger
                .state(key)
                .is_some_and(|state| state.held && state.class == KeyClass::Hold)
            {
                self.ledger.press(key, KeyClass::Hold, now);
            }
        }
    }

    fn fire(&mut self, press: ResolvedPress, now: Instant) {
        let Some(binding) = self.mapping.button(&press.button).cloned() else {
            return;
        };

        match press.kind {
            PressKind::Short => {
                self.stats.short_presses += 1;
                info!("{} short press -> {}", press.button, join_keys(&binding.tap));
                for key in &binding.tap {
                    self.ledger.tap(key, now);
                }
            }
            PressKind::Long => {
                self.stats.long_presses += 1;
                let keys = binding.hold_keys();
                info!(
                    "{} long press ({:?}) -> {}",
                    press.button,
                    press.held_for,
                    join_keys(keys)
                );
                for key in keys {
                    self.ledger.press(key, KeyClass::Hold, now);
                }
            }
        }
    }

    /// Timer-driven work: synthesized button releases, then key timeouts
    pub fn tick(&mut self, now: Instant) {
        for press in self.buttons.sweep(now) {
            self.fire(press, now);
        }
        self.ledger.sweep(now, &self.settings.timeouts);
    }

    /// Source lost: nothing may stay held, pending button cycles are dropped
    pub fn on_disconnect(&mut self) {
        let dropped = self.buttons.clear();
        if dropped > 0 {
            debug!("Discarded {} pending button presses", dropped);
        }
        self.filter.reset();
        self.ledger.release_all();
    }

    /// Finite source ended: open button cycles still fire, then nothing stays held
    pub fn finish(&mut self, now: Instant) {
        for press in self.buttons.flush() {
            self.fire(press, now);
        }
        self.on_disconnect();
    }

    pub fn release_all(&mut self) -> Vec<LogicalKey> {
        self.ledger.release_all()
    }

    /// Switches to another profile; held keys of the old one are released first
    pub fn switch_profile(&mut self, mapping: Arc<ActionMapping>) -> Result<(), MappingError> {
        mapping.validate()?;
        self.on_disconnect();
        info!("Switched profile '{}' -> '{}'", self.mapping.name, mapping.name);
        self.mapping = mapping;
        Ok(())
    }
}
