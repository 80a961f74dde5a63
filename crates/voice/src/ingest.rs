//! Paket-Empfang – filtert eingehendes Audio und fuellt die Sprecher-Puffer
//!
//! Hot Path: keine Allokation ausser dem Anhaengen selbst, frueher Ausstieg
//! bei jedem Verwerf-Grund.

use crate::buffer::SpeakerBufferManager;
use crate::channel::KanalRegister;
use crate::segmenter::UtteranceSegmenter;
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use voxbot_core::event::{BotEvent, EventBus};
use voxbot_core::types::{ChannelId, Sprecher};

/// Warum ein Paket verworfen wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerwerfGrund {
    /// Absender ist ein Bot (inkl. voxbot selbst)
    Bot,
    /// Sprecher-ID 0 (Relay-Artefakt)
    UngueltigerSprecher,
    /// Kein Kanal mit dieser ID verbunden
    UnbekannterKanal,
    /// Keine Nutzdaten (Stille/DTX)
    Leer,
    /// Kurz nach einem Reconnect
    Schonfrist,
    /// Bot spricht gerade im Kanal
    Spricht,
    /// Kanal verbindet oder reconnected gerade
    NichtBereit,
}

/// Ergebnis von `PacketIngestor::annehmen`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annahme {
    Angenommen { ueberlauf: bool },
    Verworfen(VerwerfGrund),
}

// ---------------------------------------------------------------------------
// PaketStatistik
// ---------------------------------------------------------------------------

/// Zaehler des Paket-Empfangs (lock-frei)
#[derive(Debug, Default)]
pub struct PaketStatistik {
    empfangen: AtomicU64,
    angenommen: AtomicU64,
    ueberlaeufe: AtomicU64,
    verworfen_bot: AtomicU64,
    verworfen_ungueltig: AtomicU64,
    verworfen_unbekannt: AtomicU64,
    verworfen_leer: AtomicU64,
    verworfen_schonfrist: AtomicU64,
    verworfen_spricht: AtomicU64,
    verworfen_nicht_bereit: AtomicU64,
}

/// Momentaufnahme der `PaketStatistik`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PaketStatistikSnapshot {
    pub empfangen: u64,
    pub angenommen: u64,
    pub ueberlaeufe: u64,
    pub verworfen_bot: u64,
    pub verworfen_ungueltig: u64,
    pub verworfen_unbekannt: u64,
    pub verworfen_leer: u64,
    pub verworfen_schonfrist: u64,
    pub verworfen_spricht: u64,
    pub verworfen_nicht_bereit: u64,
}

impl PaketStatistik {
    fn verworfen(&self, grund: VerwerfGrund) {
        let zaehler = match grund {
            VerwerfGrund::Bot => &self.verworfen_bot,
            VerwerfGrund::UngueltigerSprecher => &self.verworfen_ungueltig,
            VerwerfGrund::UnbekannterKanal => &self.verworfen_unbekannt,
            VerwerfGrund::Leer => &self.verworfen_leer,
            VerwerfGrund::Schonfrist => &self.verworfen_schonfrist,
            VerwerfGrund::Spricht => &self.verworfen_spricht,
            VerwerfGrund::NichtBereit => &self.verworfen_nicht_bereit,
        };
        zaehler.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PaketStatistikSnapshot {
        let l = |z: &AtomicU64| z.load(Ordering::Relaxed);
        PaketStatistikSnapshot {
            empfangen: l(&self.empfangen),
            angenommen: l(&self.angenommen),
            ueberlaeufe: l(&self.ueberlaeufe),
            verworfen_bot: l(&self.verworfen_bot),
            verworfen_ungueltig: l(&self.verworfen_ungueltig),
            verworfen_unbekannt: l(&self.verworfen_unbekannt),
            verworfen_leer: l(&self.verworfen_leer),
            verworfen_schonfrist: l(&self.verworfen_schonfrist),
            verworfen_spricht: l(&self.verworfen_spricht),
            verworfen_nicht_bereit: l(&self.verworfen_nicht_bereit),
        }
    }
}

// ---------------------------------------------------------------------------
// PacketIngestor
// ---------------------------------------------------------------------------

/// Nimmt Audio-Pakete entgegen
#[derive(Clone)]
pub struct PacketIngestor {
    kanaele: KanalRegister,
    puffer: SpeakerBufferManager,
    segmenter: UtteranceSegmenter,
    events: Arc<dyn EventBus>,
    statistik: Arc<PaketStatistik>,
    schonfrist: Duration,
}

impl PacketIngestor {
    pub fn neu(
        kanaele: KanalRegister,
        puffer: SpeakerBufferManager,
        segmenter: UtteranceSegmenter,
        events: Arc<dyn EventBus>,
        schonfrist: Duration,
    ) -> Self {
        Self {
            kanaele,
            puffer,
            segmenter,
            events,
            statistik: Arc::new(PaketStatistik::default()),
            schonfrist,
        }
    }

    /// Verarbeitet ein eingehendes Paket
    ///
    /// Jedes Paket eines echten Teilnehmers aktualisiert den
    /// Paket-Zeitstempel des Kanals, auch wenn es danach verworfen wird.
    pub fn annehmen(&self, kanal: ChannelId, sprecher: &Sprecher, audio: Bytes) -> Annahme {
        self.statistik.empfangen.fetch_add(1, Ordering::Relaxed);
        let ergebnis = self.pruefen_und_anhaengen(kanal, sprecher, audio);

        match ergebnis {
            Annahme::Angenommen { ueberlauf } => {
                self.statistik.angenommen.fetch_add(1, Ordering::Relaxed);
                if ueberlauf {
                    self.statistik.ueberlaeufe.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = self.events.senden(BotEvent::PufferUeberlauf {
                        kanal_id: kanal,
                        sprecher_id: sprecher.id,
                    }) {
                        tracing::trace!(fehler = %e, "Event konnte nicht gesendet werden");
                    }
                }
                self.segmenter.planen(kanal, sprecher.id);
            }
            Annahme::Verworfen(grund) => {
                self.statistik.verworfen(grund);
                tracing::trace!(kanal = %kanal, sprecher = %sprecher.id, grund = ?grund, "Paket verworfen");
            }
        }
        ergebnis
    }

    fn pruefen_und_anhaengen(&self, kanal: ChannelId, sprecher: &Sprecher, audio: Bytes) -> Annahme {
        if sprecher.ist_bot {
            return Annahme::Verworfen(VerwerfGrund::Bot);
        }
        if !sprecher.id.ist_gueltig() {
            return Annahme::Verworfen(VerwerfGrund::UngueltigerSprecher);
        }
        let Some(sitzung) = self.kanaele.holen(&kanal) else {
            return Annahme::Verworfen(VerwerfGrund::UnbekannterKanal);
        };

        sitzung.paket_gesehen();

        if audio.is_empty() {
            return Annahme::Verworfen(VerwerfGrund::Leer);
        }
        if sitzung.in_schonfrist(self.schonfrist) {
            return Annahme::Verworfen(VerwerfGrund::Schonfrist);
        }

        let angehaengt = sitzung.wenn_zuhoerend(|| {
            self.puffer
                .anhaengen(kanal, sprecher.id, &sprecher.name, audio)
        });
        match angehaengt {
            Some(erg) => Annahme::Angenommen {
                ueberlauf: erg.ueberlauf,
            },
            None if sitzung.spricht() => Annahme::Verworfen(VerwerfGrund::Spricht),
            None => Annahme::Verworfen(VerwerfGrund::NichtBereit),
        }
    }

    pub fn statistik(&self) -> Arc<PaketStatistik> {
        Arc::clone(&self.statistik)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
