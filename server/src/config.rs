//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Bot ohne Konfigurationsdatei
//! lauffaehig ist. Zeitangaben sind in Millisekunden bzw. Sekunden.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use voxbot_core::types::{ChannelId, SpeakerId};
use voxbot_services::{GeneratorConfig, SyntheseConfig, TranskriptionConfig};
use voxbot_voice::{AnspracheConfig, BegruessungConfig, UdpTransportConfig, VoiceConfig};

/// Umgebungsvariable fuer den API-Schluessel der externen Dienste
pub const API_KEY_ENV: &str = "VOXBOT_API_KEY";

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identitaet und Gespraechsverhalten des Bots
    pub bot: BotEinstellungen,
    /// Aeusserungs-Segmentierung
    pub segmentierung: SegmentierungEinstellungen,
    /// Relay-Verbindung und Health-Monitor
    pub verbindung: VerbindungEinstellungen,
    /// Gespraechskontext
    pub gespraech: GespraechEinstellungen,
    /// Externe Dienste (Transkription, Antwort, Synthese)
    pub dienste: DiensteEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Identitaet und Ansprache-Heuristik
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotEinstellungen {
    /// Anzeigename im Kanal
    pub name: String,
    /// Eigene Sprecher-ID am Relay (darf nicht 0 sein)
    pub bot_id: u64,
    pub trigger_namen: Vec<String>,
    pub aufmerksamkeits_woerter: Vec<String>,
    pub frage_woerter: Vec<String>,
    /// Laengere Aeusserungen gelten nicht als Ansprache
    pub max_woerter: usize,
    /// Wahrscheinlichkeit einer Antwort ohne Ansprache (0.0–1.0)
    pub zufall_wahrscheinlichkeit: f64,
    /// Begruessung neuer Teilnehmer; leer = deaktiviert
    pub begruessung: String,
    pub begruessung_verzoegerung_ms: u64,
}

impl Default for BotEinstellungen {
    fn default() -> Self {
        let ansprache = AnspracheConfig::default();
        let begruessung = BegruessungConfig::default();
        Self {
            name: "GolfoBot".into(),
            bot_id: 1,
            trigger_namen: ansprache.trigger_namen,
            aufmerksamkeits_woerter: ansprache.aufmerksamkeits_woerter,
            frage_woerter: ansprache.frage_woerter,
            max_woerter: ansprache.max_woerter,
            zufall_wahrscheinlichkeit: 0.20,
            begruessung: begruessung.vorlage,
            begruessung_verzoegerung_ms: begruessung.verzoegerung.as_millis() as u64,
        }
    }
}

/// Aeusserungs-Segmentierung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentierungEinstellungen {
    /// Wartezeit nach dem letzten Paket
    pub ruhe_pause_ms: u64,
    /// Mindeststille bis eine Aeusserung als beendet gilt
    pub stille_schwelle_ms: u64,
    /// Kuerzere Aeusserungen gelten als Rauschen
    pub min_pakete: usize,
    pub max_puffer_pakete: usize,
}

impl Default for SegmentierungEinstellungen {
    fn default() -> Self {
        Self {
            ruhe_pause_ms: 1200,
            stille_schwelle_ms: 1000,
            min_pakete: 5,
            max_puffer_pakete: 250,
        }
    }
}

/// Relay-Verbindung und Health-Monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungEinstellungen {
    /// Adresse des Voice-Relays
    pub relay_adresse: String,
    /// Lokale Bind-Adresse des UDP-Sockets
    pub bind_adresse: String,
    /// Kanaele die beim Start betreten werden
    pub kanaele: Vec<u64>,
    pub verbindungs_timeout_sek: u64,
    pub health_intervall_sek: u64,
    pub paket_timeout_sek: u64,
    pub keepalive_intervall_sek: u64,
    pub reconnect_schonfrist_ms: u64,
    pub reconnect_pause_ms: u64,
    pub aufraeum_intervall_sek: u64,
}

impl Default for VerbindungEinstellungen {
    fn default() -> Self {
        Self {
            relay_adresse: "127.0.0.1:9987".into(),
            bind_adresse: "0.0.0.0:0".into(),
            kanaele: vec![],
            verbindungs_timeout_sek: 10,
            health_intervall_sek: 20,
            paket_timeout_sek: 60,
            keepalive_intervall_sek: 30,
            reconnect_schonfrist_ms: 3000,
            reconnect_pause_ms: 2000,
            aufraeum_intervall_sek: 300,
        }
    }
}

/// Gespraechskontext
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GespraechEinstellungen {
    pub kontext_max_eintraege: usize,
    pub kontext_max_alter_sek: u64,
    /// Eintraege in der Zusammenfassung fuer den Generator
    pub zusammenfassung_eintraege: usize,
}

impl Default for GespraechEinstellungen {
    fn default() -> Self {
        Self {
            kontext_max_eintraege: 5,
            kontext_max_alter_sek: 300,
            zusammenfassung_eintraege: 5,
        }
    }
}

/// Externe Dienste
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiensteEinstellungen {
    pub transkription_url: String,
    /// Sprachen in Fallback-Reihenfolge
    pub transkription_sprachen: Vec<String>,
    pub transkription_timeout_sek: u64,
    /// Basis-URL des Antwort-Dienstes (ohne `/dev/llm_reply`)
    pub antwort_url: String,
    pub antwort_timeout_sek: u64,
    /// Gilde/Server-ID fuer den Antwort-Dienst (optional)
    pub gilde_id: Option<u64>,
    pub synthese_url: String,
    pub synthese_sprache: String,
    pub synthese_timeout_sek: u64,
}

impl Default for DiensteEinstellungen {
    fn default() -> Self {
        let stt = TranskriptionConfig::default();
        let llm = GeneratorConfig::default();
        let tts = SyntheseConfig::default();
        Self {
            transkription_url: stt.url,
            transkription_sprachen: stt.sprachen,
            transkription_timeout_sek: stt.timeout.as_secs(),
            antwort_url: llm.basis_url,
            antwort_timeout_sek: llm.timeout.as_secs(),
            gilde_id: None,
            synthese_url: tts.url,
            synthese_sprache: tts.sprache,
            synthese_timeout_sek: tts.timeout.as_secs(),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    pub bind_adresse: String,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
    /// Intervall fuer Status- und Prozess-Metriken
    pub erfassungs_intervall_sek: u64,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            bind_adresse: "0.0.0.0".into(),
            port: 9300,
            erfassungs_intervall_sek: 15,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Baut die Voice-Engine-Konfiguration und prueft sie
    pub fn voice_config(&self) -> anyhow::Result<VoiceConfig> {
        let bot = &self.bot;
        let seg = &self.segmentierung;
        let verb = &self.verbindung;
        let gespraech = &self.gespraech;

        let begruessung = if bot.begruessung.trim().is_empty() {
            None
        } else {
            Some(BegruessungConfig {
                vorlage: bot.begruessung.clone(),
                verzoegerung: Duration::from_millis(bot.begruessung_verzoegerung_ms),
            })
        };

        let config = VoiceConfig {
            ruhe_pause: Duration::from_millis(seg.ruhe_pause_ms),
            stille_schwelle: Duration::from_millis(seg.stille_schwelle_ms),
            min_pakete: seg.min_pakete,
            max_puffer_pakete: seg.max_puffer_pakete,
            health_intervall: Duration::from_secs(verb.health_intervall_sek),
            paket_timeout: Duration::from_secs(verb.paket_timeout_sek),
            keepalive_intervall: Duration::from_secs(verb.keepalive_intervall_sek),
            reconnect_schonfrist: Duration::from_millis(verb.reconnect_schonfrist_ms),
            reconnect_pause: Duration::from_millis(verb.reconnect_pause_ms),
            aufraeum_intervall: Duration::from_secs(verb.aufraeum_intervall_sek),
            zufall_wahrscheinlichkeit: bot.zufall_wahrscheinlichkeit,
            kontext_max_eintraege: gespraech.kontext_max_eintraege,
            kontext_max_alter: Duration::from_secs(gespraech.kontext_max_alter_sek),
            zusammenfassung_eintraege: gespraech.zusammenfassung_eintraege,
            ansprache: AnspracheConfig {
                trigger_namen: bot.trigger_namen.clone(),
                aufmerksamkeits_woerter: bot.aufmerksamkeits_woerter.clone(),
                frage_woerter: bot.frage_woerter.clone(),
                max_woerter: bot.max_woerter,
            },
            begruessung,
        };

        config
            .validieren()
            .map_err(|e| anyhow::anyhow!("Ungueltige Voice-Konfiguration: {e}"))?;
        Ok(config)
    }

    /// Konfiguration des UDP-Transports
    pub fn transport_config(&self) -> anyhow::Result<UdpTransportConfig> {
        if self.bot.bot_id == 0 {
            anyhow::bail!("bot_id darf nicht 0 sein");
        }
        let bind: SocketAddr = self.verbindung.bind_adresse.parse().map_err(|e| {
            anyhow::anyhow!("Ungueltige bind_adresse '{}': {e}", self.verbindung.bind_adresse)
        })?;
        let relay: SocketAddr = self.verbindung.relay_adresse.parse().map_err(|e| {
            anyhow::anyhow!(
                "Ungueltige relay_adresse '{}': {e}",
                self.verbindung.relay_adresse
            )
        })?;

        let mut config = UdpTransportConfig::neu(bind, relay, SpeakerId::neu(self.bot.bot_id));
        config.verbindungs_timeout = Duration::from_secs(self.verbindung.verbindungs_timeout_sek);
        Ok(config)
    }

    /// Kanaele die beim Start betreten werden
    pub fn start_kanaele(&self) -> Vec<ChannelId> {
        self.verbindung
            .kanaele
            .iter()
            .copied()
            .map(ChannelId::neu)
            .collect()
    }

    pub fn transkription_config(&self, api_key: Option<String>) -> TranskriptionConfig {
        TranskriptionConfig {
            url: self.dienste.transkription_url.clone(),
            sprachen: self.dienste.transkription_sprachen.clone(),
            api_key,
            timeout: Duration::from_secs(self.dienste.transkription_timeout_sek),
        }
    }

    pub fn generator_config(&self, api_key: Option<String>) -> GeneratorConfig {
        GeneratorConfig {
            basis_url: self.dienste.antwort_url.clone(),
            gilde_id: self.dienste.gilde_id,
            api_key,
            timeout: Duration::from_secs(self.dienste.antwort_timeout_sek),
        }
    }

    pub fn synthese_config(&self, api_key: Option<String>) -> SyntheseConfig {
        SyntheseConfig {
            url: self.dienste.synthese_url.clone(),
            sprache: self.dienste.synthese_sprache.clone(),
            api_key,
            timeout: Duration::from_secs(self.dienste.synthese_timeout_sek),
        }
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!(
            "{}:{}",
            self.observability.bind_adresse, self.observability.port
        )
    }
}

/// Liest den API-Schluessel aus der Umgebung (leer = keiner)
pub fn api_key_aus_umgebung() -> Option<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|key| !key.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.segmentierung.min_pakete, 5);
        assert_eq!(cfg.verbindung.health_intervall_sek, 20);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.voice_config().is_ok());
        assert!(cfg.transport_config().is_ok());
    }

    #[test]
    fn standard_voice_config_entspricht_engine_standard() {
        let cfg = ServerConfig::default().voice_config().unwrap();
        assert_eq!(cfg, VoiceConfig::default());
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [bot]
            name = "Compa"
            zufall_wahrscheinlichkeit = 0.5

            [segmentierung]
            ruhe_pause_ms = 800

            [verbindung]
            kanaele = [111, 222]

            [dienste]
            gilde_id = 42
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.bot.name, "Compa");
        assert_eq!(
            cfg.start_kanaele(),
            vec![ChannelId::neu(111), ChannelId::neu(222)]
        );
        assert_eq!(cfg.generator_config(None).gilde_id, Some(42));

        let voice = cfg.voice_config().unwrap();
        assert_eq!(voice.ruhe_pause, Duration::from_millis(800));
        assert_eq!(voice.zufall_wahrscheinlichkeit, 0.5);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(voice.stille_schwelle, Duration::from_millis(1000));
        assert_eq!(cfg.bot.bot_id, 1);
    }

    #[test]
    fn ungueltige_wahrscheinlichkeit_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.bot.zufall_wahrscheinlichkeit = 1.2;
        assert!(cfg.voice_config().is_err());
    }

    #[test]
    fn min_pakete_ueber_puffergroesse_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.segmentierung.min_pakete = 10;
        cfg.segmentierung.max_puffer_pakete = 5;
        assert!(cfg.voice_config().is_err());
    }

    #[test]
    fn leere_begruessung_deaktiviert() {
        let mut cfg = ServerConfig::default();
        cfg.bot.begruessung = "  ".into();
        assert!(cfg.voice_config().unwrap().begruessung.is_none());
    }

    #[test]
    fn bot_id_null_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.bot.bot_id = 0;
        assert!(cfg.transport_config().is_err());
    }

    #[test]
    fn ungueltige_relay_adresse_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.verbindung.relay_adresse = "kein-host".into();
        assert!(cfg.transport_config().is_err());
    }

    #[test]
    fn dienst_configs_uebernehmen_werte() {
        let cfg = ServerConfig::default();
        let stt = cfg.transkription_config(Some("geheim".into()));
        assert_eq!(stt.sprachen, vec!["es-MX".to_string(), "en-US".to_string()]);
        assert_eq!(stt.api_key.as_deref(), Some("geheim"));
        assert_eq!(cfg.synthese_config(None).sprache, "es-MX");
        assert_eq!(cfg.observability_bind_adresse(), "0.0.0.0:9300");
    }
}
