//! Tastatur-Injektion: Backends, die logische Tasten an das Betriebssystem melden
//!
//! Das Ledger ist die einzige Stelle, die einen Injector aufruft. Backends müssen
//! daher selbst keinen Zustand über gedrückte Tasten führen.

use crate::mapping::error::InjectionError;
use crate::mapping::keys::LogicalKey;
use tracing::info;

/// Backend für synthetische Tastenereignisse
pub trait KeyInjector: Send + 'static {
    fn press(&mut self, key: &LogicalKey) -> Result<(), InjectionError>;

    fn release(&mut self, key: &LogicalKey) -> Result<(), InjectionError>;

    /// Name für Logs und die Startmeldung
    fn name(&self) -> &str;
}

/// Dry-Run-Backend: schreibt jede Flanke nur ins Log
#[derive(Debug, Default)]
pub struct LogInjector;

impl KeyInjector for LogInjector {
    fn press(&mut self, key: &LogicalKey) -> Result<(), InjectionError> {
        info!("[dry-run] press {}", key);
        Ok(())
    }

    fn release(&mut self, key: &LogicalKey) -> Result<(), InjectionError> {
        info!("[dry-run] release {}", key);
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

#[cfg(all(feature = "uinput", target_os = "linux"))]
pub use self::uinput::UinputInjector;

#[cfg(all(feature = "uinput", target_os = "linux"))]
mod uinput {
    use super::KeyInjector;
    use crate::mapping::error::InjectionError;
    use crate::mapping::keys::LogicalKey;
    use crate::mapping::MappingError;
    use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
    use evdev::{AttributeSet, EventType, InputEvent, Key};
    use tracing::{debug, info};

    const DEVICE_NAME: &str = "joykeys virtual keyboard";

    const LETTERS: [Key; 26] = [
        Key::KEY_A,
        Key::KEY_B,
        Key::KEY_C,
        Key::KEY_D,
        Key::KEY_E,
        Key::KEY_F,
        Key::KEY_G,
        Key::KEY_H,
        Key::KEY_I,
        Key::KEY_J,
        Key::KEY_K,
        Key::KEY_L,
        Key::KEY_M,
        Key::KEY_N,
        Key::KEY_O,
        Key::KEY_P,
        Key::KEY_Q,
        Key::KEY_R,
        Key::KEY_S,
        Key::KEY_T,
        Key::KEY_U,
        Key::KEY_V,
        Key::KEY_W,
        Key::KEY_X,
        Key::KEY_Y,
        Key::KEY_Z,
    ];

    const DIGITS: [Key; 10] = [
        Key::KEY_0,
        Key::KEY_1,
        Key::KEY_2,
        Key::KEY_3,
        Key::KEY_4,
        Key::KEY_5,
        Key::KEY_6,
        Key::KEY_7,
        Key::KEY_8,
        Key::KEY_9,
    ];

    const NAMED: [(&str, Key); 12] = [
        ("space", Key::KEY_SPACE),
        ("enter", Key::KEY_ENTER),
        ("esc", Key::KEY_ESC),
        ("tab", Key::KEY_TAB),
        ("backspace", Key::KEY_BACKSPACE),
        ("shift", Key::KEY_LEFTSHIFT),
        ("ctrl", Key::KEY_LEFTCTRL),
        ("alt", Key::KEY_LEFTALT),
        ("up", Key::KEY_UP),
        ("down", Key::KEY_DOWN),
        ("left", Key::KEY_LEFT),
        ("right", Key::KEY_RIGHT),
    ];

    /// Linux-Backend über ein virtuelles uinput-Gerät
    pub struct UinputInjector {
        device: VirtualDevice,
    }

    impl UinputInjector {
        /// Legt das virtuelle Gerät an; benötigt Schreibrechte auf /dev/uinput
        pub fn create() -> Result<Self, MappingError> {
            let mut keys = AttributeSet::<Key>::new();
            for key in LETTERS.iter().chain(DIGITS.iter()) {
                keys.insert(*key);
            }
            for (_, key) in NAMED.iter() {
                keys.insert(*key);
            }

            let device = VirtualDeviceBuilder::new()
                .and_then(|builder| builder.name(DEVICE_NAME).with_keys(&keys))
                .and_then(|builder| builder.build())
                .map_err(|e| {
                    MappingError::InitializationError(format!(
                        "Cannot create uinput device (is /dev/uinput writable?): {}",
                        e
                    ))
                })?;

            info!("Created virtual keyboard '{}'", DEVICE_NAME);
            Ok(Self { device })
        }

        fn emit(&mut self, key: &LogicalKey, value: i32) -> Result<(), InjectionError> {
            let code = evdev_key(key)
                .ok_or_else(|| InjectionError::Unsupported(key.to_string()))?
                .code();

            debug!("uinput key {} -> {}", key, value);
            self.device
                .emit(&[InputEvent::new(EventType::KEY, code, value)])
                .map_err(|e| InjectionError::Rejected {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
        }
    }

    impl KeyInjector for UinputInjector {
        fn press(&mut self, key: &LogicalKey) -> Result<(), InjectionError> {
            self.emit(key, 1)
        }

        fn release(&mut self, key: &LogicalKey) -> Result<(), InjectionError> {
            self.emit(key, 0)
        }

        fn name(&self) -> &str {
            "uinput"
        }
    }

    pub(super) fn evdev_key(key: &LogicalKey) -> Option<Key> {
        let name = key.as_str();
        let bytes = name.as_bytes();
        if bytes.len() == 1 {
            let c = bytes[0];
            return match c {
                b'a'..=b'z' => Some(LETTERS[(c - b'a') as usize]),
                b'0'..=b'9' => Some(DIGITS[(c - b'0') as usize]),
                _ => None,
            };
        }
        NAMED
            .iter()
            .find(|(named, _)| *named == name)
            .map(|(_, key)| *key)
    }

}

#[cfg(test)]
pub mod testing {
    //! Aufzeichnender Injector für Tests

    use super::KeyInjector;
    use crate::mapping::error::InjectionError;
    use crate::mapping::keys::LogicalKey;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Press(String),
        Release(String),
    }

    /// Zeichnet alle erfolgreichen Aufrufe auf; `fail_on` und `fail_release_on`
    /// lassen Drücke bzw. Loslassen bestimmter Tasten scheitern
    #[derive(Debug, Clone, Default)]
    pub struct RecordingInjector {
        calls: Arc<Mutex<Vec<Call>>>,
        failing: Arc<Mutex<HashSet<String>>>,
        failing_releases: Arc<Mutex<HashSet<String>>>,
    }

    impl RecordingInjector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_on(&self, key: &str) {
            self.failing.lock().unwrap().insert(key.to_string());
        }

        pub fn fail_release_on(&self, key: &str) {
            self.failing_releases.lock().unwrap().insert(key.to_string());
        }

        pub fn heal(&self, key: &str) {
            self.failing.lock().unwrap().remove(key);
            self.failing_releases.lock().unwrap().remove(key);
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }

        pub fn presses_of(&self, key: &str) -> usize {
            self.calls()
                .iter()
                .filter(|c| **c == Call::Press(key.to_string()))
                .count()
        }

        pub fn releases_of(&self, key: &str) -> usize {
            self.calls()
                .iter()
                .filter(|c| **c == Call::Release(key.to_string()))
                .count()
        }
    }

    impl KeyInjector for RecordingInjector {
        fn press(&mut self, key: &LogicalKey) -> Result<(), InjectionError> {
            if self.failing.lock().unwrap().contains(key.as_str()) {
                return Err(InjectionError::Rejected {
                    key: key.to_string(),
                    reason: "test failure".to_string(),
                });
            }
            self.calls
                .lock()
                .unwrap()
                .push(Call::Press(key.to_string()));
            Ok(())
        }

        fn release(&mut self, key: &LogicalKey) -> Result<(), InjectionError> {
            if self.failing_releases.lock().unwrap().contains(key.as_str()) {
                return Err(InjectionError::Rejected {
                    key: key.to_string(),
                    reason: "test failure".to_string(),
                });
            }
            self.calls
                .lock()
                .unwrap()
                .push(Call::Release(key.to_string()));
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }
}
