//! Event Classifier - turns a decoded payload into a closed token type
//!
//! Classification is pure: the only side effect downstream of a failed or unknown
//! line is a log entry. Later stages match on [`NormalizedToken`] exhaustively
//! instead of searching the raw text again.

use crate::mapping::profile::ActionMapping;
use tracing::debug;

/// Banner, calibration and progress output that never carries input
pub const IGNORABLE_PATTERNS: [&str; 7] = [
    "Calibrating",
    "JoystickShield",
    "Starting",
    "=",
    "complete",
    "Complete",
    "Heartbeat",
];

/// Readings beyond this magnitude are treated as line noise
pub const DEFAULT_SANITY_BOUND: i32 = 1000;

const DOWN_SUFFIXES: [&str; 2] = [" Clicked", " Pressed"];
const UP_SUFFIX: &str = " Released";

// Button phase as reported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPhase {
    Down,
    Up,
    Unknown,
}

// Classified event, consumed immediately by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedToken {
    Position { x: i32, y: i32 },
    DirectionLabel { name: String },
    Button { name: String, phase: ButtonPhase },
    Ignorable,
    Unknown { raw: String },
}

impl NormalizedToken {
    /// Short name used in statistics
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedToken::Position { .. } => "position",
            NormalizedToken::DirectionLabel { .. } => "label",
            NormalizedToken::Button { .. } => "button",
            NormalizedToken::Ignorable => "ignorable",
            NormalizedToken::Unknown { .. } => "unknown",
        }
    }
}

// Classifier errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("Malformed position data '{payload}': {reason}")]
    Parse { payload: String, reason: String },

    #[error("Position out of range: X={x}, Y={y}")]
    OutOfRange { x: i32, y: i32 },
}

/// Classifies one decoded payload against the active profile.
///
/// Order: ignorable text, position sample, profile label/button, unknown.
pub fn classify(
    payload: &str,
    mapping: &ActionMapping,
    sanity_bound: i32,
) -> Result<NormalizedToken, ClassifyError> {
    if IGNORABLE_PATTERNS
        .iter()
        .any(|pattern| payload.contains(pattern))
    {
        return Ok(NormalizedToken::Ignorable);
    }

    if payload.contains("X:") && payload.contains("Y:") {
        let (x, y) = parse_position(payload)?;
        let bound = sanity_bound.unsigned_abs();
        if x.unsigned_abs() > bound || y.unsigned_abs() > bound {
            return Err(ClassifyError::OutOfRange { x, y });
        }
        return Ok(NormalizedToken::Position { x, y });
    }

    if mapping.label_action(payload).is_some() {
        return Ok(NormalizedToken::DirectionLabel {
            name: payload.to_string(),
        });
    }

    if let Some(token) = classify_button(payload, mapping) {
        return Ok(token);
    }

    debug!("No classification for payload: {}", payload);
    Ok(NormalizedToken::Unknown {
        raw: payload.to_string(),
    })
}

fn classify_button(payload: &str, mapping: &ActionMapping) -> Option<NormalizedToken> {
    let known = |name: &str| mapping.button(name).is_some();

    for suffix in DOWN_SUFFIXES {
        if let Some(name) = payload.strip_suffix(suffix) {
            let name = name.trim();
            if known(name) {
                return Some(NormalizedToken::Button {
                    name: name.to_string(),
                    phase: ButtonPhase::Down,
                });
            }
        }
    }

    if let Some(name) = payload.strip_suffix(UP_SUFFIX) {
        let name = name.trim();
        if known(name) {
            return Some(NormalizedToken::Button {
                name: name.to_string(),
                phase: ButtonPhase::Up,
            });
        }
    }

    if known(payload) {
        return Some(NormalizedToken::Button {
            name: payload.to_string(),
            phase: ButtonPhase::Unknown,
        });
    }

    None
}

/// Parses `"... X: <int>, Y: <int>"`, ignoring stray characters around the numbers
fn parse_position(payload: &str) -> Result<(i32, i32), ClassifyError> {
    let malformed = |reason: &str| ClassifyError::Parse {
        payload: payload.to_string(),
        reason: reason.to_string(),
    };

    let x_start = payload
        .find("X:")
        .map(|idx| idx + 2)
        .ok_or_else(|| malformed("missing X:"))?;
    let y_label = payload[x_start..]
        .find("Y:")
        .map(|idx| x_start + idx)
        .ok_or_else(|| malformed("missing Y: after X value"))?;
    // The separator must sit between the two values
    let comma = payload[x_start..y_label]
        .find(',')
        .map(|idx| x_start + idx)
        .ok_or_else(|| malformed("missing comma after X value"))?;
    let y_start = y_label + 2;

    let x = parse_axis(&payload[x_start..comma]).ok_or_else(|| malformed("invalid X value"))?;
    let y = parse_axis(&payload[y_start..]).ok_or_else(|| malformed("invalid Y value"))?;
    Ok((x, y))
}

fn parse_axis(text: &str) -> Option<i32> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+' || *c == '-')
        .collect();

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_wasd(payload: &str) -> Result<NormalizedToken, ClassifyError> {
        classify(payload, &ActionMapping::wasd(), DEFAULT_SANITY_BOUND)
    }

    #[test]
    fn banner_lines_are_ignorable() {
        for line in [
            "=== JoystickShield Game Controller ===",
            "Calibrating joystick...",
            "Calibration complete!",
            "Starting joystick and button detection...",
        ] {
            assert_eq!(classify_wasd(line), Ok(NormalizedToken::Ignorable));
        }
    }

    #[test]
    fn position_samples_are_parsed() {
        assert_eq!(
            classify_wasd("Joystick Position -> X: -3, Y: -96"),
            Ok(NormalizedToken::Position { x: -3, y: -96 })
        );
        assert_eq!(
            classify_wasd("X:0,Y:-80"),
            Ok(NormalizedToken::Position { x: 0, y: -80 })
        );
    }

    #[test]
    fn stray_characters_around_numbers_are_stripped() {
        assert_eq!(
            classify_wasd("X: 1\u{fffd}2, Y: -4a"),
            Ok(NormalizedToken::Position { x: 12, y: -4 })
        );
    }

    #[test]
    fn malformed_positions_are_parse_errors() {
        assert!(matches!(
            classify_wasd("X: 5 Y: 7"),
            Err(ClassifyError::Parse { .. })
        ));
        assert!(matches!(
            classify_wasd("X: , Y: 7"),
            Err(ClassifyError::Parse { .. })
        ));
        assert!(matches!(
            classify_wasd("X: 1-2, Y: 7"),
            Err(ClassifyError::Parse { .. })
        ));
    }

    #[test]
    fn readings_beyond_sanity_bound_are_rejected() {
        assert_eq!(
            classify_wasd("X: 1500, Y: 0"),
            Err(ClassifyError::OutOfRange { x: 1500, y: 0 })
        );
        assert!(classify_wasd("X: 1000, Y: -1000").is_ok());
    }

    #[test]
    fn extreme_integers_are_out_of_range() {
        assert_eq!(
            classify_wasd("X: -2147483648, Y: 0"),
            Err(ClassifyError::OutOfRange { x: i32::MIN, y: 0 })
        );
        assert_eq!(
            classify_wasd("X: 0, Y: -2147483648"),
            Err(ClassifyError::OutOfRange { x: 0, y: i32::MIN })
        );
        assert!(matches!(
            classify_wasd("X: 99999999999, Y: 0"),
            Err(ClassifyError::Parse { .. })
        ));
    }

    #[test]
    fn comma_after_y_value_is_not_a_separator() {
        assert!(matches!(
            classify_wasd("X: 5 Y: 7, foo"),
            Err(ClassifyError::Parse { .. })
        ));
        assert!(matches!(
            classify_wasd("Y: 7, X: 5"),
            Err(ClassifyError::Parse { .. })
        ));
    }

    #[test]
    fn profile_labels_become_direction_labels() {
        assert_eq!(
            classify_wasd("Joystick LeftUp"),
            Ok(NormalizedToken::DirectionLabel {
                name: "Joystick LeftUp".to_string()
            })
        );
    }

    #[test]
    fn button_phases() {
        assert_eq!(
            classify_wasd("E Button Clicked"),
            Ok(NormalizedToken::Button {
                name: "E Button".to_string(),
                phase: ButtonPhase::Down
            })
        );
        assert_eq!(
            classify_wasd("Joystick Button Pressed"),
            Ok(NormalizedToken::Button {
                name: "Joystick Button".to_string(),
                phase: ButtonPhase::Down
            })
        );
        assert_eq!(
            classify_wasd("F Button Released"),
            Ok(NormalizedToken::Button {
                name: "F Button".to_string(),
                phase: ButtonPhase::Up
            })
        );
        assert_eq!(
            classify_wasd("Up Button"),
            Ok(NormalizedToken::Button {
                name: "Up Button".to_string(),
                phase: ButtonPhase::Unknown
            })
        );
    }

    #[test]
    fn unmapped_text_is_unknown() {
        assert_eq!(
            classify_wasd("G Button Clicked"),
            Ok(NormalizedToken::Unknown {
                raw: "G Button Clicked".to_string()
            })
        );
        assert_eq!(classify_wasd("hello").unwrap().kind(), "unknown");
    }
}
