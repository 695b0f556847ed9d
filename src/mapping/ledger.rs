//! Key Ledger - single source of truth for which synthetic keys are held
//!
//! Every press and release goes through the ledger, which makes both operations
//! idempotent: the injector sees exactly one press per up-to-down edge and one
//! release per down-to-up edge. Keys carry a [`KeyClass`] that decides how long
//! they stay held without a refresh.

use crate::mapping::injector::KeyInjector;
use crate::mapping::keys::LogicalKey;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Why a key is held, and therefore which timeout applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    /// Stick direction, refreshed by every position sample or label
    Direction,
    /// Long press, released after the hold timeout
    Hold,
    /// Short press, released after the pulse length
    Pulse,
    /// Never times out, only an explicit release drops it
    Latched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTimeouts {
    pub direction: Duration,
    pub hold: Duration,
    pub pulse: Duration,
}

impl Default for KeyTimeouts {
    fn default() -> Self {
        Self {
            direction: Duration::from_millis(150),
            hold: Duration::from_millis(150),
            pulse: Duration::from_millis(50),
        }
    }
}

impl KeyTimeouts {
    pub fn for_class(&self, class: KeyClass) -> Option<Duration> {
        match class {
            KeyClass::Direction => Some(self.direction),
            KeyClass::Hold => Some(self.hold),
            KeyClass::Pulse => Some(self.pulse),
            KeyClass::Latched => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyState {
    pub held: bool,
    pub last_refresh: Option<Instant>,
    pub class: KeyClass,
}

pub struct KeyLedger {
    injector: Box<dyn KeyInjector>,
    keys: HashMap<LogicalKey, KeyState>,
    failed_injections: u64,
}

impl KeyLedger {
    pub fn new(injector: Box<dyn KeyInjector>) -> Self {
        info!("Key ledger using injector '{}'", injector.name());
        Self {
            injector,
            keys: HashMap::new(),
            failed_injections: 0,
        }
    }

    pub fn injector_name(&self) -> &str {
        self.injector.name()
    }

    /// Presses `key` unless it is already held.
    ///
    /// A held key gets its timestamp refreshed and takes over `class`. Returns
    /// true if the injector was called and accepted the press. A rejected press
    /// leaves the key released so the next natural press retries it.
    pub fn press(&mut self, key: &LogicalKey, class: KeyClass, now: Instant) -> bool {
        if let Some(state) = self.keys.get_mut(key) {
            if state.held {
                state.last_refresh = Some(now);
                state.class = class;
                return false;
            }
        }

        match self.injector.press(key) {
            Ok(()) => {
                debug!("Key down: {} ({:?})", key, class);
                self.keys.insert(
                    key.clone(),
                    KeyState {
                        held: true,
                        last_refresh: Some(now),
                        class,
                    },
                );
                true
            }
            Err(e) => {
                self.failed_injections += 1;
                warn!("Press of {} rejected: {}", key, e);
                self.keys.insert(
                    key.clone(),
                    KeyState {
                        held: false,
                        last_refresh: None,
                        class,
                    },
                );
                false
            }
        }
    }

    /// Short press: pressed now, released by [`KeyLedger::sweep`] after the pulse length.
    ///
    /// A key that is already held stays as it is; a tap never shortens a hold.
    pub fn tap(&mut self, key: &LogicalKey, now: Instant) -> bool {
        if self.is_held(key) {
            debug!("Tap on {} skipped, key already held", key);
            return false;
        }
        self.press(key, KeyClass::Pulse, now)
    }

    /// Releases `key` if held. Returns true if a release was injected.
    ///
    /// The key counts as released even if the injector fails.
    pub fn release(&mut self, key: &LogicalKey) -> bool {
        let Some(state) = self.keys.get_mut(key) else {
            return false;
        };
        if !state.held {
            return false;
        }
        state.held = false;
        state.last_refresh = None;

        if let Err(e) = self.injector.release(key) {
            self.failed_injections += 1;
            warn!("Release of {} rejected: {}", key, e);
        } else {
            debug!("Key up: {}", key);
        }
        true
    }

    /// Releases every held key, modifiers last
    pub fn release_all(&mut self) -> Vec<LogicalKey> {
        let mut held = self.held_keys();
        held.sort_by_key(|key| key.is_modifier());

        for key in &held {
            self.release(key);
        }
        if !held.is_empty() {
            info!("Released all keys ({})", held.len());
        }
        held
    }

    pub fn release_class(&mut self, class: KeyClass) -> Vec<LogicalKey> {
        let keys: Vec<LogicalKey> = self
            .keys
            .iter()
            .filter(|(_, state)| state.held && state.class == class)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            self.release(key);
        }
        keys
    }

    /// Releases keys whose class timeout has elapsed since their last refresh
    pub fn sweep(&mut self, now: Instant, timeouts: &KeyTimeouts) -> Vec<LogicalKey> {
        let expired: Vec<LogicalKey> = self
            .keys
            .iter()
            .filter(|(_, state)| state.held)
            .filter_map(|(key, state)| {
                let timeout = timeouts.for_class(state.class)?;
                let since = state.last_refresh?;
                (now.saturating_duration_since(since) > timeout).then(|| key.clone())
            })
            .collect();

        for key in &expired {
            debug!("Key {} timed out", key);
            self.release(key);
        }
        expired
    }

    pub fn is_held(&self, key: &LogicalKey) -> bool {
        self.keys.get(key).is_some_and(|state| state.held)
    }

    pub fn state(&self, key: &LogicalKey) -> Option<&KeyState> {
        self.keys.get(key)
    }

    /// Held keys in sorted order
    pub fn held_keys(&self) -> Vec<LogicalKey> {
        let mut held: Vec<LogicalKey> = self
            .keys
            .iter()
            .filter(|(_, state)| state.held)
            .map(|(key, _)| key.clone())
            .collect();
        held.sort();
        held
    }

    pub fn failed_injections(&self) -> u64 {
        self.failed_injections
    }
}

impl Drop for KeyLedger {
    fn drop(&mut self) {
        let held = self.held_keys();
        if !held.is_empty() {
            info!("Releasing {} held keys on shutdown", held.len());
            self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::injector::testing::{Call, RecordingInjector};

    fn key(name: &str) -> LogicalKey {
        LogicalKey::parse(name).unwrap()
    }

    fn ledger() -> (KeyLedger, RecordingInjector) {
        let recorder = RecordingInjector::new();
        (KeyLedger::new(Box::new(recorder.clone())), recorder)
    }

    #[test]
    fn press_and_release_are_idempotent() {
        let (mut ledger, recorder) = ledger();
        let now = Instant::now();

        assert!(ledger.press(&key("w"), KeyClass::Direction, now));
        assert!(!ledger.press(&key("w"), KeyClass::Direction, now));
        assert!(ledger.release(&key("w")));
        assert!(!ledger.release(&key("w")));
        assert!(!ledger.release(&key("s")));

        assert_eq!(
            recorder.calls(),
            vec![Call::Press("w".into()), Call::Release("w".into())]
        );
    }

    #[test]
    fn repeated_press_refreshes_timestamp() {
        let (mut ledger, _recorder) = ledger();
        let start = Instant::now();
        ledger.press(&key("w"), KeyClass::Direction, start);
        let later = start + Duration::from_millis(100);
        ledger.press(&key("w"), KeyClass::Direction, later);
        assert_eq!(ledger.state(&key("w")).unwrap().last_refresh, Some(later));
    }

    #[test]
    fn rejected_press_is_retried_on_next_press() {
        let (mut ledger, recorder) = ledger();
        let now = Instant::now();
        recorder.fail_on("w");

        assert!(!ledger.press(&key("w"), KeyClass::Direction, now));
        assert!(!ledger.is_held(&key("w")));
        assert_eq!(ledger.failed_injections(), 1);

        recorder.heal("w");
        assert!(ledger.press(&key("w"), KeyClass::Direction, now));
        assert!(ledger.is_held(&key("w")));
        assert_eq!(recorder.presses_of("w"), 1);
    }

    #[test]
    fn rejected_release_still_marks_key_released() {
        let (mut ledger, recorder) = ledger();
        let now = Instant::now();
        ledger.press(&key("w"), KeyClass::Direction, now);
        ledger.press(&key("shift"), KeyClass::Hold, now);
        recorder.fail_release_on("w");

        assert!(ledger.release(&key("w")));
        assert!(!ledger.is_held(&key("w")));
        assert_eq!(ledger.failed_injections(), 1);
        assert_eq!(recorder.releases_of("w"), 0);

        // Nothing left to release, the injector is not called again
        assert!(!ledger.release(&key("w")));
        assert_eq!(ledger.failed_injections(), 1);

        assert_eq!(ledger.release_all(), vec![key("shift")]);
        assert!(ledger.held_keys().is_empty());
    }

    #[test]
    fn direction_key_times_out_after_silence() {
        let (mut ledger, recorder) = ledger();
        let timeouts = KeyTimeouts::default();
        let start = Instant::now();
        ledger.press(&key("w"), KeyClass::Direction, start);

        assert!(ledger
            .sweep(start + Duration::from_millis(100), &timeouts)
            .is_empty());
        assert!(ledger.is_held(&key("w")));

        let released = ledger.sweep(start + Duration::from_millis(200), &timeouts);
        assert_eq!(released, vec![key("w")]);
        assert_eq!(recorder.releases_of("w"), 1);
    }

    #[test]
    fn pulse_releases_before_direction() {
        let (mut ledger, _recorder) = ledger();
        let timeouts = KeyTimeouts::default();
        let start = Instant::now();
        ledger.press(&key("w"), KeyClass::Direction, start);
        assert!(ledger.tap(&key("e"), start));

        let released = ledger.sweep(start + Duration::from_millis(60), &timeouts);
        assert_eq!(released, vec![key("e")]);
        assert!(ledger.is_held(&key("w")));
    }

    #[test]
    fn latched_keys_never_time_out() {
        let (mut ledger, _recorder) = ledger();
        let start = Instant::now();
        ledger.press(&key("shift"), KeyClass::Latched, start);
        let released = ledger.sweep(start + Duration::from_secs(60), &KeyTimeouts::default());
        assert!(released.is_empty());
        assert!(ledger.is_held(&key("shift")));
    }

    #[test]
    fn tap_does_not_touch_held_key() {
        let (mut ledger, recorder) = ledger();
        let now = Instant::now();
        ledger.press(&key("space"), KeyClass::Hold, now);
        assert!(!ledger.tap(&key("space"), now));
        assert_eq!(
            ledger.state(&key("space")).unwrap().class,
            KeyClass::Hold
        );
        assert_eq!(recorder.presses_of("space"), 1);
    }

    #[test]
    fn release_all_releases_modifiers_last() {
        let (mut ledger, recorder) = ledger();
        let now = Instant::now();
        ledger.press(&key("shift"), KeyClass::Hold, now);
        ledger.press(&key("w"), KeyClass::Direction, now);
        ledger.press(&key("a"), KeyClass::Direction, now);
        recorder.clear();

        let released = ledger.release_all();
        assert_eq!(released.len(), 3);
        assert!(ledger.held_keys().is_empty());
        assert_eq!(recorder.calls().last(), Some(&Call::Release("shift".into())));
    }

    #[test]
    fn release_class_only_touches_that_class() {
        let (mut ledger, _recorder) = ledger();
        let now = Instant::now();
        ledger.press(&key("w"), KeyClass::Direction, now);
        ledger.press(&key("shift"), KeyClass::Hold, now);

        assert_eq!(ledger.release_class(KeyClass::Direction), vec![key("w")]);
        assert_eq!(ledger.held_keys(), vec![key("shift")]);
    }

    #[test]
    fn dropping_the_ledger_releases_everything() {
        let recorder = RecordingInjector::new();
        {
            let mut ledger = KeyLedger::new(Box::new(recorder.clone()));
            ledger.press(&key("w"), KeyClass::Direction, Instant::now());
            ledger.press(&key("d"), KeyClass::Direction, Instant::now());
        }
        assert_eq!(recorder.releases_of("w"), 1);
        assert_eq!(recorder.releases_of("d"), 1);
    }
}
