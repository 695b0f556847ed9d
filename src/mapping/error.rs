//! Fehlerdefinitionen für das Mapping-Modul

use thiserror::Error;

/// Fehlertypen für die Mapping-Engine
#[derive(Debug, Error)]
pub enum MappingError {
    /// Fehler bei der Konfiguration eines Profils oder der Filterparameter
    #[error("Konfigurationsfehler: {0}")]
    ConfigError(String),

    /// Tastenname liegt außerhalb des bekannten Vokabulars
    #[error("Unbekannte Taste: {0}")]
    InvalidKey(String),

    /// Das angeforderte Profil existiert nicht
    #[error("Unbekanntes Profil: {0}")]
    UnknownProfile(String),

    /// Fehler bei der Initialisierung einer Mapping-Engine oder eines Injectors
    #[error("Initialisierungsfehler: {0}")]
    InitializationError(String),

    /// Fehler bei der Kommunikation über Kanäle
    #[error("Kanalfehler: {0}")]
    ChannelError(String),

    /// Fehler bei der Thread-Verwaltung
    #[error("Thread-Fehler: {0}")]
    ThreadError(String),
}

/// Vom Betriebssystem abgelehnte Tastensimulation
///
/// Wird nur geloggt; die Taste bleibt im Ledger ungedrückt und wird beim nächsten
/// natürlichen Tastendruck erneut versucht.
#[derive(Debug, Error)]
pub enum InjectionError {
    /// Das Backend kennt die Taste nicht
    #[error("Taste {0} wird vom Backend nicht unterstützt")]
    Unsupported(String),

    /// Der Systemaufruf ist fehlgeschlagen
    #[error("Injection für Taste {key} fehlgeschlagen: {reason}")]
    Rejected { key: String, reason: String },
}
