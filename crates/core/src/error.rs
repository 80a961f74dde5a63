//! Fehlertypen fuer voxbot
//!
//! Zentraler Fehler-Enum der alle moeglichen Fehlerzustaende abdeckt.
//! Untermodule koennen eigene Fehler definieren und via `#[from]` konvertieren.

use thiserror::Error;

/// Globaler Result-Alias fuer voxbot
pub type Result<T> = std::result::Result<T, VoxbotError>;

/// Alle moeglichen Fehler im voxbot-System
#[derive(Debug, Error)]
pub enum VoxbotError {
    // --- Verbindung & Transport ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Transportfehler: {0}")]
    Transport(String),

    #[error("Kanal nicht verbunden: {0}")]
    KanalNichtVerbunden(String),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    // --- Externe Dienste ---
    #[error("Transkription fehlgeschlagen: {0}")]
    Transkription(String),

    #[error("Keine Sprache erkannt")]
    NichtsErkannt,

    #[error("Antwort-Generierung fehlgeschlagen: {0}")]
    Generierung(String),

    #[error("Sprachsynthese fehlgeschlagen: {0}")]
    Synthese(String),

    #[error("Wiedergabe abgebrochen")]
    WiedergabeAbgebrochen,

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl VoxbotError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Zeitlimit(_) | Self::Verbindung(_) | Self::Getrennt(_) | Self::Transport(_)
        )
    }
}
