//! Modul für die Umwandlung von Joystick-Ereignissen in Tastendrücke.
//!
//! Dieses Modul enthält die Mapping-Engine, die klassifizierte Ereignisse über
//! Profile, Totzonenfilter und Button-Entprellung in Tastenzustände übersetzt.
//! Alle Tastendrücke laufen über das [`ledger::KeyLedger`], das einzig den
//! [`injector::KeyInjector`] aufruft.

pub mod button;
pub mod deadzone;
pub mod engine;
pub mod error;
pub mod injector;
pub mod keys;
pub mod ledger;
pub mod pipeline;
pub mod profile;

// Re-exports für einfacheren Zugriff
pub use engine::{EngineCommand, EngineSettings, MappingEngine, MappingEngineHandle};
pub use error::{InjectionError, MappingError};
pub use injector::{KeyInjector, LogInjector};
pub use keys::LogicalKey;
pub use profile::{ActionMapping, ProfileRegistry, DEFAULT_PROFILE};
