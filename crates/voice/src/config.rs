//! Laufzeit-Parameter der Voice-Engine
//!
//! Alle Schwellwerte sind von aussen einstellbar (siehe `[segmentierung]`,
//! `[verbindung]`, `[gespraech]` und `[bot]` in der Server-Konfiguration).
//! `VoiceConfig::default()` liefert die erprobten Standardwerte.

use std::time::Duration;
use voxbot_core::{Result, VoxbotError};

// ---------------------------------------------------------------------------
// Ansprache-Heuristik
// ---------------------------------------------------------------------------

/// Woerterlisten fuer die Erkennung, ob der Bot angesprochen wurde
#[derive(Debug, Clone, PartialEq)]
pub struct AnspracheConfig {
    /// Namen auf die der Bot hoert
    pub trigger_namen: Vec<String>,
    /// Woerter mit denen Sprecher Aufmerksamkeit einfordern ("oye", "hey")
    pub aufmerksamkeits_woerter: Vec<String>,
    /// Fragewoerter; mehrteilige Eintraege ("por qué") sind erlaubt
    pub frage_woerter: Vec<String>,
    /// Laengere Aeusserungen gelten nicht mehr als direkte Frage
    pub max_woerter: usize,
}

impl Default for AnspracheConfig {
    fn default() -> Self {
        Self {
            trigger_namen: woerter(&[
                "golfito",
                "golfobot",
                "golfostreams",
                "bot",
                "streams",
                "golfo",
                "golf",
                "compa",
                "compadre",
                "amigo",
                "bro",
                "asistente",
                "ayudante",
                "ai",
            ]),
            aufmerksamkeits_woerter: woerter(&[
                "oye", "hey", "escucha", "ey", "eh", "mira", "ve", "ven", "oiga", "hola",
            ]),
            frage_woerter: woerter(&[
                "qué", "que", "cómo", "como", "cuál", "cual", "dónde", "donde", "cuándo",
                "cuando", "por qué", "porque", "quién", "quien",
            ]),
            max_woerter: 20,
        }
    }
}

fn woerter(liste: &[&str]) -> Vec<String> {
    liste.iter().map(|w| w.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Begruessung
// ---------------------------------------------------------------------------

/// Begruessung neuer Teilnehmer
#[derive(Debug, Clone, PartialEq)]
pub struct BegruessungConfig {
    /// Vorlage; `{name}` wird durch den Anzeigenamen ersetzt
    pub vorlage: String,
    pub verzoegerung: Duration,
}

impl Default for BegruessungConfig {
    fn default() -> Self {
        Self {
            vorlage: "{name}, ¡sálte!".into(),
            verzoegerung: Duration::from_secs(1),
        }
    }
}

impl BegruessungConfig {
    pub fn rendern(&self, name: &str) -> String {
        self.vorlage.replace("{name}", name)
    }
}

// ---------------------------------------------------------------------------
// VoiceConfig
// ---------------------------------------------------------------------------

/// Alle Tunables der Voice-Engine
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    // --- Segmentierung ---
    /// Wartezeit nach dem letzten Paket bis zur Finalisierungs-Pruefung
    pub ruhe_pause: Duration,
    /// Mindeststille bevor eine Aeusserung als beendet gilt
    pub stille_schwelle: Duration,
    /// Aeusserungen mit weniger Paketen gelten als Rauschen
    pub min_pakete: usize,
    /// Maximale Paketanzahl pro Sprecher-Puffer (aeltestes wird verworfen)
    pub max_puffer_pakete: usize,

    // --- Verbindung ---
    pub health_intervall: Duration,
    /// Ohne Pakete in diesem Fenster gilt eine Verbindung als ungesund
    pub paket_timeout: Duration,
    pub keepalive_intervall: Duration,
    /// Nach einem Reconnect werden Pakete so lange als veraltet verworfen
    pub reconnect_schonfrist: Duration,
    /// Pause zwischen Trennen und erneutem Verbinden
    pub reconnect_pause: Duration,
    pub aufraeum_intervall: Duration,

    // --- Gespraech ---
    /// Wahrscheinlichkeit einer Antwort ohne direkte Ansprache (0.0–1.0)
    pub zufall_wahrscheinlichkeit: f64,
    pub kontext_max_eintraege: usize,
    pub kontext_max_alter: Duration,
    /// Anzahl Kontext-Eintraege in der Zusammenfassung fuer den Generator
    pub zusammenfassung_eintraege: usize,
    pub ansprache: AnspracheConfig,
    /// `None` deaktiviert die Begruessung
    pub begruessung: Option<BegruessungConfig>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            ruhe_pause: Duration::from_millis(1200),
            stille_schwelle: Duration::from_millis(1000),
            min_pakete: 5,
            max_puffer_pakete: 250,
            health_intervall: Duration::from_secs(20),
            paket_timeout: Duration::from_secs(60),
            keepalive_intervall: Duration::from_secs(30),
            reconnect_schonfrist: Duration::from_secs(3),
            reconnect_pause: Duration::from_secs(2),
            aufraeum_intervall: Duration::from_secs(300),
            zufall_wahrscheinlichkeit: 0.20,
            kontext_max_eintraege: 5,
            kontext_max_alter: Duration::from_secs(300),
            zusammenfassung_eintraege: 5,
            ansprache: AnspracheConfig::default(),
            begruessung: Some(BegruessungConfig::default()),
        }
    }
}

impl VoiceConfig {
    /// Prueft die Werte auf Konsistenz
    ///
    /// Fehler werden als `VoxbotError::Konfiguration` gemeldet.
    pub fn validieren(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.zufall_wahrscheinlichkeit) {
            return Err(VoxbotError::Konfiguration(format!(
                "zufall_wahrscheinlichkeit muss zwischen 0 und 1 liegen (ist {})",
                self.zufall_wahrscheinlichkeit
            )));
        }
        if self.max_puffer_pakete == 0 {
            return Err(VoxbotError::Konfiguration(
                "max_puffer_pakete muss groesser 0 sein".into(),
            ));
        }
        if self.min_pakete > self.max_puffer_pakete {
            return Err(VoxbotError::Konfiguration(format!(
                "min_pakete ({}) darf max_puffer_pakete ({}) nicht ueberschreiten",
                self.min_pakete, self.max_puffer_pakete
            )));
        }
        if self.kontext_max_eintraege == 0 {
            return Err(VoxbotError::Konfiguration(
                "kontext_max_eintraege muss groesser 0 sein".into(),
            ));
        }
        for (name, wert) in [
            ("ruhe_pause", self.ruhe_pause),
            ("health_intervall", self.health_intervall),
            ("keepalive_intervall", self.keepalive_intervall),
            ("aufraeum_intervall", self.aufraeum_intervall),
        ] {
            if wert.is_zero() {
                return Err(VoxbotError::Konfiguration(format!("{name} darf nicht 0 sein")));
            }
        }
        Ok(())
    }

    /// Tatsaechliche Wartezeit des Finalisierungs-Timers
    pub fn finalisierungs_wartezeit(&self) -> Duration {
        self.ruhe_pause.max(self.stille_schwelle)
    }
}
