//! Logische Tastennamen und das zulässige Vokabular

use crate::mapping::MappingError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Named keys besides letters and digits
const NAMED_KEYS: [&str; 12] = [
    "space",
    "enter",
    "esc",
    "tab",
    "backspace",
    "shift",
    "ctrl",
    "alt",
    "up",
    "down",
    "left",
    "right",
];

/// Eine zu simulierende Taste, z.B. `w` oder `space`.
///
/// Namen sind normalisiert (Kleinschreibung, Aliase aufgelöst), zwei Tasten mit
/// gleichem Namen sind daher immer dieselbe Taste.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalKey(String);

impl LogicalKey {
    /// Parst einen Tastennamen aus dem bekannten Vokabular
    pub fn parse(name: &str) -> Result<Self, MappingError> {
        let lowered = name.trim().to_ascii_lowercase();
        let canonical = match lowered.as_str() {
            "escape" => "esc".to_string(),
            "return" => "enter".to_string(),
            "control" => "ctrl".to_string(),
            "spacebar" => "space".to_string(),
            "arrowup" => "up".to_string(),
            "arrowdown" => "down".to_string(),
            "arrowleft" => "left".to_string(),
            "arrowright" => "right".to_string(),
            _ => lowered,
        };

        if is_known(&canonical) {
            Ok(Self(canonical))
        } else {
            Err(MappingError::InvalidKey(name.to_string()))
        }
    }

    /// Für eingebaute Profile, deren Namen bereits im Vokabular liegen
    pub(crate) fn known(name: &'static str) -> Self {
        debug_assert!(is_known(name), "{name} is not in the key vocabulary");
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Modifier-Tasten (Shift, Ctrl, Alt)
    pub fn is_modifier(&self) -> bool {
        matches!(self.0.as_str(), "shift" | "ctrl" | "alt")
    }
}

fn is_known(name: &str) -> bool {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.is_ascii_lowercase() || c.is_ascii_digit(),
        _ => NAMED_KEYS.contains(&name),
    }
}

impl TryFrom<String> for LogicalKey {
    type Error = MappingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LogicalKey> for String {
    fn from(key: LogicalKey) -> Self {
        key.0
    }
}

impl Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Joins keys for log output, e.g. `a+w`
pub fn join_keys(keys: &[LogicalKey]) -> String {
    keys.iter()
        .map(LogicalKey::as_str)
        .collect::<Vec<_>>()
        .join("+")
}
