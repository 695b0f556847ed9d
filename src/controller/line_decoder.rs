//! Line Decoder - first stage of the serial event pipeline
//!
//! Serial monitors and some firmware builds prefix every line with a receive
//! timestamp (`16:18:54.901 > Joystick Up`). The decoder removes that prefix and
//! surrounding whitespace so the classifier only ever sees the payload.

use chrono::{DateTime, Local};

/// Separator between an optional timestamp prefix and the payload
const PREFIX_SEPARATOR: &str = " > ";

/// One line of text as delivered by the serial collector
#[derive(Debug, Clone)]
pub struct RawLine {
    pub text: String,
    pub received_at: DateTime<Local>,
}

impl RawLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: Local::now(),
        }
    }

    /// Builds a line from raw serial bytes, replacing invalid UTF-8 sequences
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Strips the optional `"<timestamp> > "` prefix and trims the payload.
///
/// Returns `None` for empty or whitespace-only input; such lines are dropped
/// silently and are not an error.
pub fn decode_line(raw: &str) -> Option<&str> {
    let payload = match raw.split_once(PREFIX_SEPARATOR) {
        Some((_timestamp, rest)) => rest,
        None => raw,
    };

    let payload = payload.trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_timestamp_prefix() {
        assert_eq!(
            decode_line("16:18:54.901 > Joystick Position -> X: -3, Y: -96"),
            Some("Joystick Position -> X: -3, Y: -96")
        );
    }

    #[test]
    fn keeps_plain_payload_and_trims_line_endings() {
        assert_eq!(decode_line("Joystick Up\r\n"), Some("Joystick Up"));
        assert_eq!(decode_line("   E Button Clicked  "), Some("E Button Clicked"));
    }

    #[test]
    fn only_first_separator_is_a_prefix() {
        assert_eq!(
            decode_line("12:00:00.000 > Joystick Position -> X: 1, Y: 2"),
            Some("Joystick Position -> X: 1, Y: 2")
        );
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert_eq!(decode_line(""), None);
        assert_eq!(decode_line("   \r\n"), None);
        assert_eq!(decode_line("16:18:54.901 >    "), None);
    }

    #[test]
    fn lossy_decoding_keeps_valid_text() {
        let line = RawLine::from_bytes(b"Joystick \xffUp\n");
        assert!(line.text.starts_with("Joystick "));
        assert!(line.text.ends_with("Up\n"));
    }
}
