//! Wiedergabe synthetisierter Antworten
//!
//! Markiert den Kanal als sprechend bevor synthetisiert wird und hebt die
//! Markierung ueber einen Drop-Guard auf jedem Ausgang wieder auf. Eine neue
//! Wiedergabe bricht die laufende ab (keine Warteschlange).

use crate::channel::{KanalRegister, KanalSitzung};
use crate::transport::VoiceTransport;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use voxbot_core::event::{BotEvent, EventBus};
use voxbot_core::types::ChannelId;
use voxbot_core::{Result, Synthesizer, VoxbotError};

/// Senke fuer gesprochene Antworten
#[async_trait]
pub trait Sprachausgabe: Send + Sync + 'static {
    async fn sprechen(&self, kanal: ChannelId, text: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Lachen kuerzen
// ---------------------------------------------------------------------------

fn lach_muster() -> &'static [(Regex, &'static str)] {
    static MUSTER: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    MUSTER.get_or_init(|| {
        [
            (r"(?i)\b(?:ja){5,}\b", "ja"),
            (r"(?i)\b(?:ha){5,}\b", "ha"),
            (r"(?i)\b(?:je){5,}\b", "je"),
            (r"(?i)\b(?:ji){5,}\b", "ji"),
        ]
        .into_iter()
        .filter_map(|(muster, silbe)| Regex::new(muster).ok().map(|re| (re, silbe)))
        .collect()
    })
}

/// Kuerzt lange Lacher ("jajajajajaja") auf drei Silben
///
/// Beginnt der Lacher mit einem Grossbuchstaben, beginnt auch der Ersatz
/// gross ("Jajaja").
pub fn lachen_normalisieren(text: &str) -> String {
    let mut ergebnis = text.to_string();
    for (muster, silbe) in lach_muster() {
        ergebnis = muster
            .replace_all(&ergebnis, |caps: &regex::Captures<'_>| {
                let kurz = silbe.repeat(3);
                let gross = caps[0].chars().next().is_some_and(char::is_uppercase);
                if gross {
                    let mut zeichen = kurz.chars();
                    match zeichen.next() {
                        Some(erstes) => erstes.to_uppercase().chain(zeichen).collect(),
                        None => kurz,
                    }
                } else {
                    kurz
                }
            })
            .into_owned();
    }
    ergebnis
}

// ---------------------------------------------------------------------------
// SprechGuard
// ---------------------------------------------------------------------------

/// Hebt die Sprech-Markierung beim Drop auf
struct SprechGuard {
    sitzung: Arc<KanalSitzung>,
    wiedergabe: u64,
}

impl Drop for SprechGuard {
    fn drop(&mut self) {
        if self.sitzung.wiedergabe_beenden(self.wiedergabe) {
            tracing::debug!(kanal = %self.sitzung.kanal(), "Wiedergabe beendet – hoere wieder zu");
        }
        // Eigene Wiedergabe zaehlt nicht als Funkstille
        self.sitzung.paket_gesehen();
    }
}

// ---------------------------------------------------------------------------
// PlaybackController
// ---------------------------------------------------------------------------

/// Spielt Antworten in Voice-Kanaelen ab
pub struct PlaybackController {
    kanaele: KanalRegister,
    synthesizer: Arc<dyn Synthesizer>,
    transport: Arc<dyn VoiceTransport>,
    events: Arc<dyn EventBus>,
}

impl PlaybackController {
    pub fn neu(
        kanaele: KanalRegister,
        synthesizer: Arc<dyn Synthesizer>,
        transport: Arc<dyn VoiceTransport>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            kanaele,
            synthesizer,
            transport,
            events,
        }
    }

    /// Synthetisiert `text` und spielt ihn im Kanal ab
    ///
    /// Der Kanal gilt ab dem Aufruf als sprechend; eingehendes Audio wird so
    /// lange verworfen. Die Markierung wird auf jedem Ausgang aufgehoben.
    pub async fn abspielen(&self, kanal: ChannelId, text: &str) -> Result<()> {
        let sitzung = self
            .kanaele
            .holen(&kanal)
            .ok_or_else(|| VoxbotError::KanalNichtVerbunden(kanal.to_string()))?;
        let handle = sitzung
            .handle()
            .ok_or_else(|| VoxbotError::KanalNichtVerbunden(kanal.to_string()))?;
        let wiedergabe = sitzung
            .wiedergabe_beginnen()
            .ok_or_else(|| VoxbotError::KanalNichtVerbunden(kanal.to_string()))?;
        let _guard = SprechGuard {
            sitzung: Arc::clone(&sitzung),
            wiedergabe: wiedergabe.id,
        };

        let text = lachen_normalisieren(text);
        tracing::info!(kanal = %kanal, wiedergabe = wiedergabe.id, text = %text, "Spreche Antwort");

        let ergebnis = tokio::select! {
            _ = wiedergabe.abbruch.cancelled() => Err(VoxbotError::WiedergabeAbgebrochen),
            r = async {
                let audio = self.synthesizer.synthetisieren(&text).await?;
                tracing::debug!(kanal = %kanal, bytes = audio.len(), "Synthese fertig");
                self.transport.abspielen(&handle, audio).await
            } => r,
        };

        match &ergebnis {
            Ok(()) => tracing::debug!(kanal = %kanal, "Wiedergabe abgeschlossen"),
            Err(VoxbotError::WiedergabeAbgebrochen) => {
                tracing::debug!(kanal = %kanal, wiedergabe = wiedergabe.id, "Wiedergabe unterbrochen")
            }
            Err(e) => tracing::warn!(kanal = %kanal, fehler = %e, "Wiedergabe fehlgeschlagen"),
        }
        if let Err(e) = self.events.senden(BotEvent::WiedergabeBeendet {
            kanal_id: kanal,
            erfolgreich: ergebnis.is_ok(),
        }) {
            tracing::trace!(fehler = %e, "Event konnte nicht gesendet werden");
        }
        ergebnis
    }
}

#[async_trait]
impl Sprachausgabe for PlaybackController {
    async fn sprechen(&self, kanal: ChannelId, text: &str) -> Result<()> {
        self.abspielen(kanal, text).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
