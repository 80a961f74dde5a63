//! Sprach-Pipeline – vom Audio zur gesprochenen Antwort
//!
//! ```text
//! Aeusserung ──> Transkription (Blocking-Pool)
//!                   │ leer/Fehler -> Ende
//!                   v
//!              Kontext anhaengen
//!                   v
//!              AntwortEntscheider ── schweigen -> Ende
//!                   v
//!              AntwortGenerator (mit Kontext)
//!                   v
//!              Sprachausgabe
//! ```
//!
//! Fehler werden geloggt und geschluckt; der Aufrufer (Segmenter) sieht nur
//! das `PipelineErgebnis`.

use crate::context::KontextSpeicher;
use crate::gating::{AntwortEntscheider, AntwortGrund};
use crate::playback::Sprachausgabe;
use crate::segmenter::{Aeusserung, AeusserungsVerarbeiter};
use async_trait::async_trait;
use std::sync::Arc;
use voxbot_core::event::{BotEvent, EventBus};
use voxbot_core::{AntwortAnfrage, AntwortGenerator, Transkriptor, VoxbotError};

/// Ausgang eines Pipeline-Durchlaufs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineErgebnis {
    /// Nichts verstanden oder Transkription fehlgeschlagen
    KeinText,
    /// Transkribiert, Bot schweigt
    KeineAntwort { text: String },
    /// Antwort erzeugt und abgespielt
    Beantwortet { text: String, antwort: String },
    /// Generierung oder Wiedergabe fehlgeschlagen
    Fehlgeschlagen { text: String },
}

/// Orchestriert Transkription, Entscheidung, Generierung und Ausgabe
pub struct SprachPipeline {
    transkriptor: Arc<dyn Transkriptor>,
    generator: Arc<dyn AntwortGenerator>,
    ausgabe: Arc<dyn Sprachausgabe>,
    kontext: KontextSpeicher,
    entscheider: AntwortEntscheider,
    zusammenfassung_eintraege: usize,
    events: Arc<dyn EventBus>,
}

impl SprachPipeline {
    pub fn neu(
        transkriptor: Arc<dyn Transkriptor>,
        generator: Arc<dyn AntwortGenerator>,
        ausgabe: Arc<dyn Sprachausgabe>,
        kontext: KontextSpeicher,
        entscheider: AntwortEntscheider,
        zusammenfassung_eintraege: usize,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            transkriptor,
            generator,
            ausgabe,
            kontext,
            entscheider,
            zusammenfassung_eintraege,
            events,
        }
    }

    /// Fuehrt die Pipeline fuer eine Aeusserung aus
    pub async fn ausfuehren(&self, aeusserung: Aeusserung) -> PipelineErgebnis {
        let Aeusserung {
            kanal,
            sprecher_id,
            sprecher_name,
            audio,
            ..
        } = aeusserung;

        // Transkription im Blocking-Pool; das Audio wird dort freigegeben
        let transkriptor = Arc::clone(&self.transkriptor);
        let transkript =
            tokio::task::spawn_blocking(move || transkriptor.transkribieren(&audio)).await;

        let text = match transkript {
            Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(Ok(_)) | Ok(Err(VoxbotError::NichtsErkannt)) => {
                tracing::debug!(kanal = %kanal, sprecher = %sprecher_id, "Keine Sprache erkannt");
                self.event_senden(BotEvent::TranskriptionFehlgeschlagen {
                    kanal_id: kanal,
                    sprecher_id,
                });
                return PipelineErgebnis::KeinText;
            }
            Ok(Err(e)) => {
                tracing::debug!(kanal = %kanal, sprecher = %sprecher_id, fehler = %e, "Transkription fehlgeschlagen");
                self.event_senden(BotEvent::TranskriptionFehlgeschlagen {
                    kanal_id: kanal,
                    sprecher_id,
                });
                return PipelineErgebnis::KeinText;
            }
            Err(e) => {
                tracing::warn!(kanal = %kanal, fehler = %e, "Transkriptions-Task abgebrochen");
                self.event_senden(BotEvent::TranskriptionFehlgeschlagen {
                    kanal_id: kanal,
                    sprecher_id,
                });
                return PipelineErgebnis::KeinText;
            }
        };

        tracing::info!(kanal = %kanal, name = %sprecher_name, text = %text, "Transkript");
        self.event_senden(BotEvent::TranskriptErstellt {
            kanal_id: kanal,
            sprecher_id,
            zeichen: text.chars().count(),
        });
        self.kontext.anhaengen(kanal, &sprecher_name, &text);

        let Some(grund) = self.entscheider.entscheiden(&text) else {
            return PipelineErgebnis::KeineAntwort { text };
        };
        tracing::info!(kanal = %kanal, grund = ?grund, "Antworte");
        self.event_senden(BotEvent::AntwortAusgeloest {
            kanal_id: kanal,
            angesprochen: grund == AntwortGrund::Angesprochen,
        });

        let zusammenfassung = self
            .kontext
            .zusammenfassung(kanal, self.zusammenfassung_eintraege);
        let anfrage = AntwortAnfrage {
            text: text.clone(),
            sprecher_name,
            sprecher_id,
            kanal_id: kanal,
            kontext: (!zusammenfassung.is_empty()).then_some(zusammenfassung),
        };

        let antwort = match self.generator.generieren(&anfrage).await {
            Ok(antwort) if !antwort.trim().is_empty() => antwort,
            Ok(_) => {
                tracing::debug!(kanal = %kanal, "Leere Antwort – schweige");
                return PipelineErgebnis::KeineAntwort { text };
            }
            Err(e) => {
                tracing::warn!(kanal = %kanal, fehler = %e, "Antwort-Generierung fehlgeschlagen");
                self.event_senden(BotEvent::GenerierungFehlgeschlagen { kanal_id: kanal });
                return PipelineErgebnis::Fehlgeschlagen { text };
            }
        };

        match self.ausgabe.sprechen(kanal, &antwort).await {
            Ok(()) => PipelineErgebnis::Beantwortet { text, antwort },
            Err(e) => {
                tracing::debug!(kanal = %kanal, fehler = %e, "Antwort nicht abgespielt");
                PipelineErgebnis::Fehlgeschlagen { text }
            }
        }
    }

    fn event_senden(&self, event: BotEvent) {
        if let Err(e) = self.events.senden(event) {
            tracing::trace!(fehler = %e, "Event konnte nicht gesendet werden");
        }
    }
}

#[async_trait]
impl AeusserungsVerarbeiter for SprachPipeline {
    async fn verarbeiten(&self, aeusserung: Aeusserung) {
        let ergebnis = self.ausfuehren(aeusserung).await;
        tracing::trace!(ergebnis = ?ergebnis, "Pipeline fertig");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
