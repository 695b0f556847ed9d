//! Profile: statische Zuordnung von Ereignis-Labels zu Tasten
//!
//! Ein Profil (`ActionMapping`) ist reine Daten. Unterschiedliche Tastenbelegungen
//! (WASD, Pfeiltasten, ijhl) sind verschiedene Profile, nie duplizierte Logik.
//! Profile werden einmal geladen, danach nur noch über `Arc` geteilt.

use crate::mapping::keys::{join_keys, LogicalKey};
use crate::mapping::MappingError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

macro_rules! label_insert {
    ($map:expr, $label:expr, $action:expr) => {
        $map.insert($label.to_string(), $action);
    };
}

macro_rules! button_insert {
    ($map:expr, $button:expr, [$($tap:expr),*], [$($hold:expr),*]) => {
        $map.insert(
            $button.to_string(),
            ButtonBinding {
                tap: vec![$(LogicalKey::known($tap)),*],
                hold: vec![$(LogicalKey::known($hold)),*],
            },
        );
    };
}

/// Name des Standardprofils
pub const DEFAULT_PROFILE: &str = "wasd";

/// Tasten für die vier Richtungen, die aus Positionsdaten abgeleitet werden
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionKeys {
    pub up: LogicalKey,
    pub down: LogicalKey,
    pub left: LogicalKey,
    pub right: LogicalKey,
}

impl DirectionKeys {
    pub fn all(&self) -> [&LogicalKey; 4] {
        [&self.up, &self.down, &self.left, &self.right]
    }
}

/// Aktion für ein exaktes Ereignis-Label (z.B. "Joystick LeftUp")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelAction {
    /// Tasten gedrückt halten, solange das Label wiederholt wird
    Hold(Vec<LogicalKey>),
    /// Alle Richtungstasten loslassen ("Joystick Center")
    Recenter,
    /// Bekanntes Label ohne Wirkung ("Joystick NotCenter")
    Nothing,
}

/// Belegung eines Buttons für kurzen und langen Druck
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonBinding {
    /// Tastenimpuls bei kurzem Druck
    #[serde(default)]
    pub tap: Vec<LogicalKey>,
    /// Gehaltene Tasten bei langem Druck; leer bedeutet: wie `tap`
    #[serde(default)]
    pub hold: Vec<LogicalKey>,
}

impl ButtonBinding {
    pub fn hold_keys(&self) -> &[LogicalKey] {
        if self.hold.is_empty() {
            &self.tap
        } else {
            &self.hold
        }
    }
}

/// Konfiguration eines Profils
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMapping {
    /// Name des Profils
    pub name: String,

    /// Beschreibung für die Konsolenausgabe
    #[serde(default)]
    pub description: String,

    /// Richtungstasten für Positionsdaten
    pub directions: DirectionKeys,

    /// Zuordnung exakter Labels zu Aktionen
    #[serde(default)]
    pub labels: BTreeMap<String, LabelAction>,

    /// Zuordnung von Button-Namen ("E Button") zu Tasten
    #[serde(default)]
    pub buttons: BTreeMap<String, ButtonBinding>,
}

impl ActionMapping {
    /// Labels, die jede Firmware-Variante für Richtung und Mitte sendet
    fn shield_labels(directions: &DirectionKeys) -> BTreeMap<String, LabelAction> {
        let DirectionKeys {
            up,
            down,
            left,
            right,
        } = directions.clone();

        let mut labels = BTreeMap::new();
        label_insert!(labels, "Joystick Up", LabelAction::Hold(vec![up.clone()]));
        label_insert!(labels, "Joystick Down", LabelAction::Hold(vec![down.clone()]));
        label_insert!(labels, "Joystick Left", LabelAction::Hold(vec![left.clone()]));
        label_insert!(labels, "Joystick Right", LabelAction::Hold(vec![right.clone()]));
        label_insert!(
            labels,
            "Joystick LeftUp",
            LabelAction::Hold(vec![left.clone(), up.clone()])
        );
        label_insert!(
            labels,
            "Joystick RightUp",
            LabelAction::Hold(vec![right.clone(), up])
        );
        label_insert!(
            labels,
            "Joystick LeftDown",
            LabelAction::Hold(vec![left, down.clone()])
        );
        label_insert!(
            labels,
            "Joystick RightDown",
            LabelAction::Hold(vec![right, down])
        );
        label_insert!(labels, "Joystick Center", LabelAction::Recenter);
        label_insert!(labels, "Joystick Centered", LabelAction::Recenter);
        label_insert!(labels, "Joystick NotCenter", LabelAction::Nothing);
        labels
    }

    /// WASD-Profil für Spiele, Buttons kurz auf Buchstaben, lang auf Pfeile/Modifier
    pub fn wasd() -> Self {
        let directions = DirectionKeys {
            up: LogicalKey::known("w"),
            down: LogicalKey::known("s"),
            left: LogicalKey::known("a"),
            right: LogicalKey::known("d"),
        };

        let mut buttons = BTreeMap::new();
        button_insert!(buttons, "Joystick Button", ["f"], ["space"]);
        button_insert!(buttons, "Up Button", ["o"], ["up"]);
        button_insert!(buttons, "Down Button", ["j"], ["down"]);
        button_insert!(buttons, "Left Button", ["i"], ["left"]);
        button_insert!(buttons, "Right Button", ["k"], ["right"]);
        button_insert!(buttons, "E Button", ["e"], ["shift"]);
        button_insert!(buttons, "F Button", ["v"], ["ctrl"]);

        Self {
            name: DEFAULT_PROFILE.to_string(),
            description: "WASD movement, letter taps, arrows and modifiers on long press"
                .to_string(),
            labels: Self::shield_labels(&directions),
            directions,
            buttons,
        }
    }

    /// Pfeiltasten für ältere Spiele und Menünavigation
    pub fn arrows() -> Self {
        let directions = DirectionKeys {
            up: LogicalKey::known("up"),
            down: LogicalKey::known("down"),
            left: LogicalKey::known("left"),
            right: LogicalKey::known("right"),
        };

        let mut buttons = BTreeMap::new();
        button_insert!(buttons, "Joystick Button", ["enter"], []);
        button_insert!(buttons, "Up Button", ["w"], []);
        button_insert!(buttons, "Down Button", ["s"], []);
        button_insert!(buttons, "Left Button", ["a"], []);
        button_insert!(buttons, "Right Button", ["d"], []);
        button_insert!(buttons, "E Button", ["esc"], []);
        button_insert!(buttons, "F Button", ["tab"], []);

        Self {
            name: "arrows".to_string(),
            description: "Arrow keys for older games and menu navigation".to_string(),
            labels: Self::shield_labels(&directions),
            directions,
            buttons,
        }
    }

    /// Vim-artige Belegung (i oben, j unten, h links, l rechts)
    pub fn ijhl() -> Self {
        let directions = DirectionKeys {
            up: LogicalKey::known("i"),
            down: LogicalKey::known("j"),
            left: LogicalKey::known("h"),
            right: LogicalKey::known("l"),
        };

        let mut buttons = BTreeMap::new();
        button_insert!(buttons, "Joystick Button", ["space"], []);
        button_insert!(buttons, "Up Button", ["u"], []);
        button_insert!(buttons, "Down Button", ["o"], []);
        button_insert!(buttons, "E Button", ["1"], ["shift"]);
        button_insert!(buttons, "F Button", ["2"], ["ctrl"]);

        Self {
            name: "ijhl".to_string(),
            description: "ijhl movement for editors and custom bindings".to_string(),
            labels: Self::shield_labels(&directions),
            directions,
            buttons,
        }
    }

    /// Alle eingebauten Profile
    pub fn builtin() -> Vec<Self> {
        vec![Self::wasd(), Self::arrows(), Self::ijhl()]
    }

    /// Prüft die Mindestanforderungen an ein Profil
    pub fn validate(&self) -> Result<(), MappingError> {
        if self.name.trim().is_empty() {
            return Err(MappingError::ConfigError(
                "Profile name cannot be empty".to_string(),
            ));
        }

        let distinct: HashSet<&LogicalKey> = self.directions.all().into_iter().collect();
        if distinct.len() != 4 {
            return Err(MappingError::ConfigError(format!(
                "Profile {}: the four direction keys must be distinct",
                self.name
            )));
        }

        for (label, action) in &self.labels {
            if label.trim().is_empty() {
                return Err(MappingError::ConfigError(format!(
                    "Profile {}: empty event label",
                    self.name
                )));
            }
            if let LabelAction::Hold(keys) = action {
                if keys.is_empty() {
                    return Err(MappingError::ConfigError(format!(
                        "Profile {}: label '{}' holds no keys, use \"nothing\" instead",
                        self.name, label
                    )));
                }
            }
        }

        for (button, binding) in &self.buttons {
            if button.trim().is_empty() {
                return Err(MappingError::ConfigError(format!(
                    "Profile {}: empty button name",
                    self.name
                )));
            }
            if binding.tap.is_empty() && binding.hold.is_empty() {
                warn!(
                    "Profile {}: button '{}' has neither tap nor hold keys",
                    self.name, button
                );
            }
        }

        Ok(())
    }

    pub fn label_action(&self, label: &str) -> Option<&LabelAction> {
        self.labels.get(label)
    }

    pub fn button(&self, name: &str) -> Option<&ButtonBinding> {
        self.buttons.get(name)
    }

    /// Mehrzeilige Übersicht für die Konsole
    pub fn describe(&self) -> String {
        let mut out = format!("Profile '{}': {}\n", self.name, self.description);
        out.push_str(&format!(
            "  Stick: up={} down={} left={} right={}\n",
            self.directions.up, self.directions.down, self.directions.left, self.directions.right
        ));

        for (label, action) in &self.labels {
            match action {
                LabelAction::Hold(keys) => {
                    out.push_str(&format!("  {} -> hold {}\n", label, join_keys(keys)))
                }
                LabelAction::Recenter => {
                    out.push_str(&format!("  {} -> release direction keys\n", label))
                }
                LabelAction::Nothing => {}
            }
        }

        for (button, binding) in &self.buttons {
            out.push_str(&format!(
                "  {} -> tap {}, long press {}\n",
                button,
                join_keys(&binding.tap),
                join_keys(binding.hold_keys())
            ));
        }
        out
    }
}

/// Registry aller verfügbaren Profile, indexiert nach Name
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Arc<ActionMapping>>,
}

impl ProfileRegistry {
    /// Registry mit den eingebauten Profilen
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        for profile in ActionMapping::builtin() {
            registry.profiles.insert(profile.name.clone(), Arc::new(profile));
        }
        registry
    }

    /// Validiert und registriert ein Profil; ein gleichnamiges wird ersetzt
    pub fn insert(&mut self, profile: ActionMapping) -> Result<(), MappingError> {
        profile.validate()?;
        if self.profiles.contains_key(&profile.name) {
            info!("Profile '{}' overrides an existing profile", profile.name);
        } else {
            debug!("Registering profile '{}'", profile.name);
        }
        self.profiles.insert(profile.name.clone(), Arc::new(profile));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<ActionMapping>, MappingError> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| MappingError::UnknownProfile(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_profiles_are_valid() {
        for profile in ActionMapping::builtin() {
            profile.validate().unwrap();
        }
    }

    #[test]
    fn wasd_binds_diagonals_to_two_keys() {
        let wasd = ActionMapping::wasd();
        match wasd.label_action("Joystick LeftUp") {
            Some(LabelAction::Hold(keys)) => assert_eq!(join_keys(keys), "a+w"),
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(
            wasd.label_action("Joystick NotCenter"),
            Some(&LabelAction::Nothing)
        );
    }

    #[test]
    fn empty_hold_falls_back_to_tap() {
        let arrows = ActionMapping::arrows();
        let binding = arrows.button("E Button").unwrap();
        assert_eq!(binding.hold_keys(), binding.tap.as_slice());
    }

    #[test]
    fn duplicate_direction_keys_are_rejected() {
        let mut profile = ActionMapping::wasd();
        profile.directions.down = LogicalKey::known("w");
        assert!(matches!(
            profile.validate(),
            Err(MappingError::ConfigError(_))
        ));
    }

    #[test]
    fn registry_lookup_and_override() {
        let mut registry = ProfileRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["arrows", "ijhl", "wasd"]);

        let mut custom = ActionMapping::wasd();
        custom.description = "mine".to_string();
        registry.insert(custom).unwrap();
        assert_eq!(registry.get("wasd").unwrap().description, "mine");

        assert!(matches!(
            registry.get("nope"),
            Err(MappingError::UnknownProfile(_))
        ));
    }

    #[test]
    fn profile_survives_toml() {
        let text = toml::to_string_pretty(&ActionMapping::ijhl()).unwrap();
        let parsed: ActionMapping = toml::from_str(&text).unwrap();
        assert_eq!(parsed, ActionMapping::ijhl());
    }

    #[test]
    fn profile_from_handwritten_toml() {
        let text = r#"
            name = "custom"
            [directions]
            up = "I"
            down = "k"
            left = "j"
            right = "l"
            [labels]
            "Joystick Up" = { hold = ["i"] }
            "Joystick Center" = "recenter"
            [buttons]
            "E Button" = { tap = ["1"] }
        "#;
        let parsed: ActionMapping = toml::from_str(text).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.directions.up.as_str(), "i");
        assert_eq!(
            parsed.label_action("Joystick Center"),
            Some(&LabelAction::Recenter)
        );
        assert!(parsed.button("E Button").unwrap().hold.is_empty());
    }

    #[test]
    fn unknown_key_in_toml_is_an_error() {
        let text = r#"
            name = "broken"
            [directions]
            up = "volume up"
            down = "s"
            left = "a"
            right = "d"
        "#;
        assert!(toml::from_str::<ActionMapping>(text).is_err());
    }
}
