//! Dead zone and hysteresis filter for position samples
//!
//! Converts a continuous stick reading into at most one key per axis. Inside the
//! dead zone box (`|x| <= D` and `|y| <= D`) nothing is held. Once the stick is
//! outside the box, an axis whose key is already held releases only below
//! `deadzone - hysteresis`, so a diagonal hovering at the threshold of one axis
//! does not toggle that key.
//!
//! ```text
//!  |v| ──0────────(D-H)──────D──────────►   (other axis outside D)
//!        released  │ held stays held │ pressed
//! ```

use crate::mapping::keys::LogicalKey;
use crate::mapping::profile::DirectionKeys;
use crate::mapping::MappingError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Number of samples kept for the return-to-center trend
pub const HISTORY_LEN: usize = 3;

/// Sign convention of the Y axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum YAxis {
    /// Negative Y means up (`Y: -96` presses the up key)
    #[default]
    UpNegative,
    UpPositive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSettings {
    pub deadzone: i32,
    pub hysteresis: i32,
    pub y_axis: YAxis,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            deadzone: 10,
            hysteresis: 2,
            y_axis: YAxis::UpNegative,
        }
    }
}

impl FilterSettings {
    /// A hysteresis equal to or above the dead zone lets a held key never release
    pub fn validate(&self) -> Result<(), MappingError> {
        if self.deadzone <= 0 {
            return Err(MappingError::ConfigError(format!(
                "Dead zone must be positive, got {}",
                self.deadzone
            )));
        }
        if self.hysteresis < 0 || self.hysteresis >= self.deadzone {
            return Err(MappingError::ConfigError(format!(
                "Hysteresis must be in 0..{}, got {}",
                self.deadzone, self.hysteresis
            )));
        }
        Ok(())
    }
}

/// Bounded FIFO of the most recent raw samples
#[derive(Debug, Clone, Default)]
pub struct PositionHistory {
    samples: VecDeque<(i32, i32)>,
}

impl PositionHistory {
    pub fn push(&mut self, x: i32, y: i32) {
        if self.samples.len() == HISTORY_LEN {
            self.samples.pop_front();
        }
        self.samples.push_back((x, y));
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// True when the newest sample is clearly closer to center than the one before,
    /// and the one before was outside the dead zone.
    pub fn returning_to_center(&self, deadzone: i32) -> bool {
        let n = self.samples.len();
        if n < 2 {
            return false;
        }
        let (px, py) = self.samples[n - 2];
        let (cx, cy) = self.samples[n - 1];

        let magnitude = |x: i32, y: i32| i64::from(x).abs() + i64::from(y).abs();
        let previous = magnitude(px, py);
        let current = magnitude(cx, cy);
        let previous_outside = px.saturating_abs() > deadzone || py.saturating_abs() > deadzone;

        // current < 80 % of previous
        previous_outside && current * 5 < previous * 4
    }
}

/// Key changes derived from one position sample
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectionPlan {
    pub release: Vec<LogicalKey>,
    pub press: Vec<LogicalKey>,
    /// Held keys that stay in the target and only need a refresh
    pub keep: Vec<LogicalKey>,
    pub target: Vec<LogicalKey>,
    pub returning: bool,
}

impl DirectionPlan {
    pub fn is_noop(&self) -> bool {
        self.release.is_empty() && self.press.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DeadzoneFilter {
    settings: FilterSettings,
    history: PositionHistory,
}

impl DeadzoneFilter {
    pub fn new(settings: FilterSettings) -> Result<Self, MappingError> {
        settings.validate()?;
        Ok(Self {
            settings,
            history: PositionHistory::default(),
        })
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Computes the target key set for a sample given which keys are held now
    pub fn target(
        &self,
        x: i32,
        y: i32,
        keys: &DirectionKeys,
        is_held: impl Fn(&LogicalKey) -> bool,
    ) -> Vec<LogicalKey> {
        let deadzone = self.settings.deadzone;
        if x.saturating_abs() <= deadzone && y.saturating_abs() <= deadzone {
            return Vec::new();
        }

        let up_amount = match self.settings.y_axis {
            YAxis::UpNegative => y.saturating_neg(),
            YAxis::UpPositive => y,
        };

        let mut target = Vec::with_capacity(2);
        let vertical = if up_amount > 0 { &keys.up } else { &keys.down };
        if self.selects(up_amount, is_held(vertical)) {
            target.push(vertical.clone());
        }

        let horizontal = if x > 0 { &keys.right } else { &keys.left };
        if self.selects(x, is_held(horizontal)) {
            target.push(horizontal.clone());
        }
        target
    }

    fn selects(&self, value: i32, held: bool) -> bool {
        let threshold = if held {
            self.settings.deadzone - self.settings.hysteresis
        } else {
            self.settings.deadzone
        };
        value.saturating_abs() > threshold
    }

    /// Records the sample and plans releases and presses for the direction keys
    pub fn plan(
        &mut self,
        x: i32,
        y: i32,
        keys: &DirectionKeys,
        is_held: impl Fn(&LogicalKey) -> bool,
    ) -> DirectionPlan {
        self.history.push(x, y);

        let target = self.target(x, y, keys, &is_held);
        let returning = self.history.returning_to_center(self.settings.deadzone);

        let mut plan = DirectionPlan {
            returning,
            ..Default::default()
        };

        for key in keys.all() {
            let held = is_held(key);
            let wanted = target.contains(key);
            match (held, wanted) {
                (true, false) => plan.release.push(key.clone()),
                (true, true) => plan.keep.push(key.clone()),
                (false, true) if returning => {
                    debug!("Stick returning to center, not pressing {}", key);
                }
                (false, true) => plan.press.push(key.clone()),
                (false, false) => {}
            }
        }

        plan.target = target;
        plan
    }
}

/// Presentational label such as `up+left`
pub fn direction_label(keys: &DirectionKeys, target: &[LogicalKey]) -> String {
    let mut parts = Vec::new();
    if target.contains(&keys.up) {
        parts.push("up");
    }
    if target.contains(&keys.down) {
        parts.push("down");
    }
    if target.contains(&keys.left) {
        parts.push("left");
    }
    if target.contains(&keys.right) {
        parts.push("right");
    }

    if parts.is_empty() {
        "center".to_string()
    } else {
        parts.join("+")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::profile::ActionMapping;
    use std::collections::HashSet;

    fn wasd() -> DirectionKeys {
        ActionMapping::wasd().directions
    }

    fn names(keys: &[LogicalKey]) -> Vec<&str> {
        keys.iter().map(LogicalKey::as_str).collect()
    }

    /// Applies plans to a plain set and counts toggles per key
    struct Sim {
        filter: DeadzoneFilter,
        held: HashSet<LogicalKey>,
        presses: usize,
        releases: usize,
    }

    impl Sim {
        fn new(settings: FilterSettings) -> Self {
            Self {
                filter: DeadzoneFilter::new(settings).unwrap(),
                held: HashSet::new(),
                presses: 0,
                releases: 0,
            }
        }

        fn feed(&mut self, x: i32, y: i32) -> DirectionPlan {
            let held = self.held.clone();
            let plan = self.filter.plan(x, y, &wasd(), |k| held.contains(k));
            for key in &plan.release {
                self.held.remove(key);
                self.releases += 1;
            }
            for key in &plan.press {
                self.held.insert(key.clone());
                self.presses += 1;
            }
            plan
        }

        fn held_names(&self) -> Vec<String> {
            let mut v: Vec<String> = self.held.iter().map(|k| k.to_string()).collect();
            v.sort();
            v
        }
    }

    #[test]
    fn settings_require_deadzone_above_hysteresis() {
        let bad = FilterSettings {
            deadzone: 5,
            hysteresis: 5,
            y_axis: YAxis::UpNegative,
        };
        assert!(bad.validate().is_err());
        assert!(DeadzoneFilter::new(bad).is_err());
        assert!(FilterSettings::default().validate().is_ok());
    }

    #[test]
    fn full_up_presses_only_up_key() {
        let mut sim = Sim::new(FilterSettings::default());
        let plan = sim.feed(0, -96);
        assert_eq!(names(&plan.press), vec!["w"]);
        assert!(plan.release.is_empty());
    }

    #[test]
    fn inside_deadzone_is_always_centered() {
        let filter = DeadzoneFilter::new(FilterSettings::default()).unwrap();
        let keys = wasd();
        for x in -10..=10 {
            for y in -10..=10 {
                assert!(
                    filter.target(x, y, &keys, |_| false).is_empty(),
                    "({x},{y}) should be centered"
                );
                assert!(
                    filter.target(x, y, &keys, |_| true).is_empty(),
                    "({x},{y}) should be centered with keys held"
                );
            }
        }
    }

    #[test]
    fn diagonal_selects_one_key_per_axis() {
        let mut sim = Sim::new(FilterSettings::default());
        let plan = sim.feed(-50, -50);
        assert_eq!(sim.held_names(), vec!["a", "w"]);
        assert_eq!(direction_label(&wasd(), &plan.target), "up+left");
    }

    #[test]
    fn up_positive_convention_flips_vertical_keys() {
        let settings = FilterSettings {
            y_axis: YAxis::UpPositive,
            ..Default::default()
        };
        let mut sim = Sim::new(settings);
        sim.feed(0, -96);
        assert_eq!(sim.held_names(), vec!["s"]);
    }

    #[test]
    fn return_to_center_releases_once() {
        let mut sim = Sim::new(FilterSettings::default());
        for y in [-80, -60, -40, -8] {
            sim.feed(0, y);
        }
        assert_eq!(sim.presses, 1);
        assert_eq!(sim.releases, 1);
        assert!(sim.held.is_empty());
    }

    #[test]
    fn return_ending_just_inside_deadzone_releases() {
        let mut sim = Sim::new(FilterSettings::default());
        for y in [-80, -60, -40, -9] {
            sim.feed(0, y);
        }
        assert_eq!(sim.presses, 1);
        assert_eq!(sim.releases, 1);
        assert!(sim.held.is_empty());
    }

    #[test]
    fn hovering_at_threshold_does_not_chatter() {
        let settings = FilterSettings::default();
        let d = settings.deadzone;
        let mut sim = Sim::new(settings);

        // Stick pushed up, right axis hovering around D
        for _ in 0..10 {
            sim.feed(d + 1, -50);
            sim.feed(d - 1, -50);
        }
        assert_eq!(sim.presses, 2);
        assert_eq!(sim.releases, 0);
        assert_eq!(sim.held_names(), vec!["d", "w"]);

        // Genuine crossing down to D - H releases exactly once
        sim.feed(d - settings.hysteresis, -50);
        assert_eq!(sim.releases, 1);
        assert_eq!(sim.held_names(), vec!["w"]);

        // Without a held key the plain threshold applies
        sim.feed(d - 1, -50);
        assert_eq!(sim.presses, 2);
    }

    #[test]
    fn unchanged_target_only_refreshes() {
        let mut sim = Sim::new(FilterSettings::default());
        sim.feed(0, -96);
        let plan = sim.feed(0, -95);
        assert!(plan.is_noop());
        assert_eq!(names(&plan.keep), vec!["w"]);
    }

    #[test]
    fn overshoot_while_returning_is_not_pressed() {
        let mut sim = Sim::new(FilterSettings::default());
        sim.feed(0, -90);
        let plan = sim.feed(0, 20);
        assert!(plan.returning);
        assert_eq!(names(&plan.release), vec!["w"]);
        assert!(plan.press.is_empty());

        // The stick keeps moving down, so the down key engages
        let plan = sim.feed(0, 60);
        assert!(!plan.returning);
        assert_eq!(names(&plan.press), vec!["s"]);
    }

    #[test]
    fn history_is_bounded() {
        let mut history = PositionHistory::default();
        for i in 0..10 {
            history.push(i, i);
        }
        assert_eq!(history.samples.len(), HISTORY_LEN);
    }

    #[test]
    fn extreme_values_do_not_overflow() {
        let mut sim = Sim::new(FilterSettings::default());
        sim.feed(0, i32::MIN);
        assert_eq!(sim.held_names(), vec!["w"]);
        let plan = sim.feed(i32::MIN, i32::MAX);
        assert_eq!(names(&plan.target), vec!["s", "a"]);
    }
}
