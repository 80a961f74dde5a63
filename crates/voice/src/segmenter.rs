//! Aeusserungs-Segmentierung – Ende einer Aeusserung per Stille erkennen
//!
//! Pro (Kanal, Sprecher) laeuft hoechstens ein Timer-Task. Jedes neue
//! Paket verschiebt dessen Frist; bleibt der Aktivitaets-Stempel bis zum
//! Ablauf unveraendert, wird der Puffer entnommen und als `Aeusserung` an
//! den `AeusserungsVerarbeiter` uebergeben.
//!
//! ```text
//!   Idle ──Paket──> Sammeln ──Stille──> Finalisieren ──fertig──> Idle
//!                     ^  │
//!                     └──┘ Paket (Frist verschoben)
//! ```
//!
//! Ein Sprecher der gerade finalisiert wird ignoriert weitere
//! Finalisierungs-Anstoesse bis die Pipeline fertig ist. Alle Timer sind an
//! das Abbruch-Token ihres Kanals gebunden.

use crate::buffer::{Entnahme, PufferSchluessel, SpeakerBufferManager};
use crate::channel::KanalRegister;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use voxbot_core::event::{BotEvent, EventBus};
use voxbot_core::types::{audio_format, ChannelId, SpeakerId};

// ---------------------------------------------------------------------------
// Aeusserung
// ---------------------------------------------------------------------------

/// Abgeschlossene Aeusserung eines Sprechers
#[derive(Debug, Clone)]
pub struct Aeusserung {
    pub kanal: ChannelId,
    pub sprecher_id: SpeakerId,
    pub sprecher_name: String,
    /// Zusammengefuegtes PCM aller Pakete in Ankunftsreihenfolge
    pub audio: Bytes,
    pub pakete: usize,
    pub erfasst_von: DateTime<Utc>,
    pub erfasst_bis: DateTime<Utc>,
}

impl Aeusserung {
    fn aus_entnahme(kanal: ChannelId, sprecher_id: SpeakerId, entnahme: Entnahme) -> Self {
        let pakete = entnahme.len();
        let jetzt = Utc::now();
        let groesse = entnahme.pakete.iter().map(Bytes::len).sum();
        let mut audio = BytesMut::with_capacity(groesse);
        // Pakete werden beim Zusammenfuegen freigegeben
        for paket in entnahme.pakete {
            audio.extend_from_slice(&paket);
        }
        Self {
            kanal,
            sprecher_id,
            sprecher_name: entnahme
                .sprecher_name
                .unwrap_or_else(|| sprecher_id.to_string()),
            audio: audio.freeze(),
            pakete,
            erfasst_von: entnahme.erfasst_von.unwrap_or(jetzt),
            erfasst_bis: entnahme.erfasst_bis.unwrap_or(jetzt),
        }
    }

    /// Audiodauer laut PCM-Format
    pub fn dauer(&self) -> Duration {
        Duration::from_secs_f64(self.audio.len() as f64 / audio_format::BYTES_PRO_SEKUNDE as f64)
    }
}

/// Konsument abgeschlossener Aeusserungen (die Sprach-Pipeline)
#[async_trait]
pub trait AeusserungsVerarbeiter: Send + Sync + 'static {
    /// Verarbeitet eine Aeusserung; Fehler werden intern behandelt
    async fn verarbeiten(&self, aeusserung: Aeusserung);
}

/// Ergebnis einer Finalisierungs-Pruefung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalisierung {
    /// An die Pipeline uebergeben
    Uebergeben { pakete: usize },
    /// Zu kurz, als Rauschen verworfen
    Rauschen { pakete: usize },
    /// Kein Puffer vorhanden
    Leer,
    /// Seit der Planung kam neues Audio
    Veraltet,
    /// Der Sprecher wird bereits finalisiert
    BereitsInBearbeitung,
}

// ---------------------------------------------------------------------------
// BearbeitungsGuard
// ---------------------------------------------------------------------------

/// Markiert einen Sprecher als "in Finalisierung"; Drop gibt frei
struct BearbeitungsGuard {
    markierungen: Arc<DashMap<PufferSchluessel, ()>>,
    schluessel: PufferSchluessel,
}

impl BearbeitungsGuard {
    fn erwerben(
        markierungen: &Arc<DashMap<PufferSchluessel, ()>>,
        schluessel: PufferSchluessel,
    ) -> Option<Self> {
        match markierungen.entry(schluessel) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(());
                Some(Self {
                    markierungen: Arc::clone(markierungen),
                    schluessel,
                })
            }
        }
    }
}

impl Drop for BearbeitungsGuard {
    fn drop(&mut self) {
        self.markierungen.remove(&self.schluessel);
    }
}

// ---------------------------------------------------------------------------
// UtteranceSegmenter
// ---------------------------------------------------------------------------

/// Stille-basierte Segmentierung aller Sprecher
#[derive(Clone)]
pub struct UtteranceSegmenter {
    inner: Arc<SegmenterInner>,
}

struct SegmenterInner {
    puffer: SpeakerBufferManager,
    kanaele: KanalRegister,
    verarbeiter: Arc<dyn AeusserungsVerarbeiter>,
    events: Arc<dyn EventBus>,
    wartezeit: Duration,
    min_pakete: usize,
    /// Sprecher mit laufendem Timer-Task
    timer: DashMap<PufferSchluessel, ()>,
    in_bearbeitung: Arc<DashMap<PufferSchluessel, ()>>,
}

impl UtteranceSegmenter {
    /// Erstellt einen Segmenter
    ///
    /// `wartezeit` ist die Stille nach dem letzten Paket bis zur
    /// Finalisierung (siehe `VoiceConfig::finalisierungs_wartezeit`).
    pub fn neu(
        puffer: SpeakerBufferManager,
        kanaele: KanalRegister,
        verarbeiter: Arc<dyn AeusserungsVerarbeiter>,
        events: Arc<dyn EventBus>,
        wartezeit: Duration,
        min_pakete: usize,
    ) -> Self {
        Self {
            inner: Arc::new(SegmenterInner {
                puffer,
                kanaele,
                verarbeiter,
                events,
                wartezeit,
                min_pakete,
                timer: DashMap::new(),
                in_bearbeitung: Arc::new(DashMap::new()),
            }),
        }
    }

    /// Plant die Finalisierungs-Pruefung nach einem neuen Paket
    ///
    /// Laeuft fuer den Sprecher bereits ein Timer, verschiebt dieser seine
    /// Frist selbst anhand des Aktivitaets-Stempels.
    pub fn planen(&self, kanal: ChannelId, sprecher: SpeakerId) {
        let schluessel = (kanal, sprecher);
        if self.inner.timer.insert(schluessel, ()).is_some() {
            return;
        }

        let token = match self.inner.kanaele.holen(&kanal) {
            Some(sitzung) => sitzung.abbruch_token(),
            None => {
                self.inner.timer.remove(&schluessel);
                return;
            }
        };

        let segmenter = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    segmenter.inner.timer.remove(&schluessel);
                    tracing::debug!(
                        kanal = %kanal,
                        sprecher = %sprecher,
                        "Finalisierungs-Timer abgebrochen"
                    );
                }
                _ = segmenter.timer_schleife(schluessel) => {}
            }
        });
    }

    async fn timer_schleife(&self, (kanal, sprecher): PufferSchluessel) {
        loop {
            let Some((stempel, zuletzt)) = self.inner.puffer.aktivitaet(kanal, sprecher) else {
                if self.timer_freigeben((kanal, sprecher)) {
                    continue;
                }
                return;
            };

            tokio::time::sleep_until(zuletzt + self.inner.wartezeit).await;

            match self.inner.puffer.aktivitaet(kanal, sprecher) {
                Some((aktuell, _)) if aktuell == stempel => {
                    if self.finalisieren_pruefen(kanal, sprecher, Some(stempel)).await
                        == Finalisierung::BereitsInBearbeitung
                    {
                        tokio::time::sleep(self.inner.wartezeit).await;
                    }
                }
                // Neues Audio: Frist neu berechnen
                _ => {}
            }
        }
    }

    /// Gibt die Timer-Markierung frei
    ///
    /// Gibt `true` zurueck wenn zwischen letzter Pruefung und Freigabe neues
    /// Audio kam und dieser Task den Timer weiterfuehren muss.
    fn timer_freigeben(&self, schluessel: PufferSchluessel) -> bool {
        self.inner.timer.remove(&schluessel);
        self.inner
            .puffer
            .aktivitaet(schluessel.0, schluessel.1)
            .is_some()
            && self.inner.timer.insert(schluessel, ()).is_none()
    }

    /// Prueft ob die Aeusserung abgeschlossen ist und uebergibt sie
    ///
    /// Mit `erwarteter_stempel` wird nur entnommen wenn seitdem kein neues
    /// Paket kam. Waehrend ein Sprecher finalisiert wird, sind weitere
    /// Aufrufe fuer ihn No-Ops.
    pub async fn finalisieren_pruefen(
        &self,
        kanal: ChannelId,
        sprecher: SpeakerId,
        erwarteter_stempel: Option<u64>,
    ) -> Finalisierung {
        let Some(_guard) =
            BearbeitungsGuard::erwerben(&self.inner.in_bearbeitung, (kanal, sprecher))
        else {
            tracing::trace!(kanal = %kanal, sprecher = %sprecher, "Finalisierung laeuft bereits");
            return Finalisierung::BereitsInBearbeitung;
        };

        let entnahme = match erwarteter_stempel {
            Some(stempel) => {
                match self
                    .inner
                    .puffer
                    .entnehmen_wenn_unveraendert(kanal, sprecher, stempel)
                {
                    Some(entnahme) => entnahme,
                    None => return Finalisierung::Veraltet,
                }
            }
            None => self.inner.puffer.entnehmen(kanal, sprecher),
        };

        if entnahme.ist_leer() {
            return Finalisierung::Leer;
        }

        let pakete = entnahme.len();
        if pakete < self.inner.min_pakete {
            tracing::debug!(
                kanal = %kanal,
                sprecher = %sprecher,
                pakete,
                min = self.inner.min_pakete,
                "Aeusserung zu kurz – als Rauschen verworfen"
            );
            self.event_senden(BotEvent::RauschenVerworfen {
                kanal_id: kanal,
                sprecher_id: sprecher,
                pakete,
            });
            return Finalisierung::Rauschen { pakete };
        }

        let aeusserung = Aeusserung::aus_entnahme(kanal, sprecher, entnahme);
        tracing::info!(
            kanal = %kanal,
            sprecher = %sprecher,
            name = %aeusserung.sprecher_name,
            pakete,
            bytes = aeusserung.audio.len(),
            dauer_ms = aeusserung.dauer().as_millis() as u64,
            "Aeusserung abgeschlossen"
        );
        self.event_senden(BotEvent::AeusserungErkannt {
            kanal_id: kanal,
            sprecher_id: sprecher,
            pakete,
            bytes: aeusserung.audio.len(),
        });

        self.inner.verarbeiter.verarbeiten(aeusserung).await;
        Finalisierung::Uebergeben { pakete }
    }

    /// Anzahl der Sprecher mit laufendem Timer
    pub fn aktive_timer(&self) -> usize {
        self.inner.timer.len()
    }

    fn event_senden(&self, event: BotEvent) {
        if let Err(e) = self.inner.events.senden(event) {
            tracing::trace!(fehler = %e, "Event konnte nicht gesendet werden");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportHandle;
    use parking_lot::Mutex;
    use tokio::sync::Notify;
    use voxbot_core::event::KeinEventBus;

    /// Zeichnet alle Aeusserungen auf; kann optional blockieren
    #[derive(Default)]
    struct Aufzeichner {
        aeusserungen: Mutex<Vec<Aeusserung>>,
        sperre: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl AeusserungsVerarbeiter for Aufzeichner {
        async fn verarbeiten(&self, aeusserung: Aeusserung) {
            self.aeusserungen.lock().push(aeusserung);
            if let Some(sperre) = &self.sperre {
                sperre.notified().await;
            }
        }
    }

    const KANAL: ChannelId = ChannelId(1);

    fn aufbau(
        min_pakete: usize,
        verarbeiter: Arc<Aufzeichner>,
    ) -> (UtteranceSegmenter, SpeakerBufferManager, KanalRegister) {
        let puffer = SpeakerBufferManager::neu(250);
        let kanaele = KanalRegister::neu();
        if let crate::channel::Reservierung::Neu(sitzung) = kanaele.reservieren(KANAL) {
            assert!(sitzung.verbunden(
                TransportHandle {
                    kanal: KANAL,
                    verbindung: 1,
                },
                false,
            ));
        }
        let segmenter = UtteranceSegmenter::neu(
            puffer.clone(),
            kanaele.clone(),
            verarbeiter,
            Arc::new(KeinEventBus),
            Duration::from_millis(1200),
            min_pakete,
        );
        (segmenter, puffer, kanaele)
    }

    fn anhaengen(
        puffer: &SpeakerBufferManager,
        segmenter: &UtteranceSegmenter,
        sprecher: u64,
        wert: u8,
    ) {
        puffer.anhaengen(
            KANAL,
            SpeakerId::neu(sprecher),
            "Ana",
            Bytes::from(vec![wert; 4]),
        );
        segmenter.planen(KANAL, SpeakerId::neu(sprecher));
    }

    #[tokio::test]
    async fn vier_pakete_sind_rauschen_fuenf_nicht() {
        let verarbeiter = Arc::new(Aufzeichner::default());
        let (segmenter, puffer, _) = aufbau(5, Arc::clone(&verarbeiter));
        let sprecher = SpeakerId::neu(1);

        for i in 0..4u8 {
            puffer.anhaengen(KANAL, sprecher, "Ana", Bytes::from(vec![i; 2]));
        }
        assert_eq!(
            segmenter.finalisieren_pruefen(KANAL, sprecher, None).await,
            Finalisierung::Rauschen { pakete: 4 }
        );
        assert!(verarbeiter.aeusserungen.lock().is_empty());

        for i in 0..5u8 {
            puffer.anhaengen(KANAL, sprecher, "Ana", Bytes::from(vec![i; 2]));
        }
        assert_eq!(
            segmenter.finalisieren_pruefen(KANAL, sprecher, None).await,
            Finalisierung::Uebergeben { pakete: 5 }
        );
        let aeusserungen = verarbeiter.aeusserungen.lock();
        assert_eq!(aeusserungen.len(), 1);
        assert_eq!(&aeusserungen[0].audio[..], &[0, 0, 1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[tokio::test]
    async fn doppelte_finalisierung_nur_einmal() {
        let sperre = Arc::new(Notify::new());
        let verarbeiter = Arc::new(Aufzeichner {
            aeusserungen: Mutex::new(Vec::new()),
            sperre: Some(Arc::clone(&sperre)),
        });
        let (segmenter, puffer, _) = aufbau(1, Arc::clone(&verarbeiter));
        let sprecher = SpeakerId::neu(1);
        for i in 0..6u8 {
            puffer.anhaengen(KANAL, sprecher, "Ana", Bytes::from(vec![i]));
        }

        let erster = {
            let segmenter = segmenter.clone();
            tokio::spawn(async move { segmenter.finalisieren_pruefen(KANAL, sprecher, None).await })
        };
        // Warten bis der erste Aufruf in der Pipeline steckt
        while verarbeiter.aeusserungen.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        // Neues Audio waehrend der Finalisierung
        puffer.anhaengen(KANAL, sprecher, "Ana", Bytes::from_static(b"x"));
        assert_eq!(
            segmenter.finalisieren_pruefen(KANAL, sprecher, None).await,
            Finalisierung::BereitsInBearbeitung
        );

        sperre.notify_one();
        assert_eq!(erster.await.unwrap(), Finalisierung::Uebergeben { pakete: 6 });
        assert_eq!(verarbeiter.aeusserungen.lock().len(), 1);
        assert_eq!(puffer.laenge(KANAL, sprecher), 1, "neues Audio bleibt erhalten");
    }

    #[tokio::test]
    async fn veralteter_stempel_entnimmt_nicht() {
        let verarbeiter = Arc::new(Aufzeichner::default());
        let (segmenter, puffer, _) = aufbau(1, Arc::clone(&verarbeiter));
        let sprecher = SpeakerId::neu(1);
        let alt = puffer.anhaengen(KANAL, sprecher, "Ana", Bytes::from_static(b"a"));
        puffer.anhaengen(KANAL, sprecher, "Ana", Bytes::from_static(b"b"));
        assert_eq!(
            segmenter
                .finalisieren_pruefen(KANAL, sprecher, Some(alt.stempel))
                .await,
            Finalisierung::Veraltet
        );
        assert_eq!(puffer.laenge(KANAL, sprecher), 2);
        assert_eq!(
            segmenter.finalisieren_pruefen(KANAL, sprecher, None).await,
            Finalisierung::Uebergeben { pakete: 2 }
        );
        assert_eq!(
            segmenter.finalisieren_pruefen(KANAL, sprecher, None).await,
            Finalisierung::Leer
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timer_finalisiert_nach_stille() {
        let verarbeiter = Arc::new(Aufzeichner::default());
        let (segmenter, puffer, _) = aufbau(5, Arc::clone(&verarbeiter));

        // 1 Sekunde Audio in 20-ms-Paketen
        for i in 0..50u8 {
            anhaengen(&puffer, &segmenter, 1, i);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(segmenter.aktive_timer(), 1);
        assert!(verarbeiter.aeusserungen.lock().is_empty(), "noch keine Stille");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let aeusserungen = verarbeiter.aeusserungen.lock();
        assert_eq!(aeusserungen.len(), 1);
        assert_eq!(aeusserungen[0].pakete, 50);
        assert_eq!(segmenter.aktive_timer(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn kanal_abbruch_stoppt_timer_ohne_pipeline() {
        let verarbeiter = Arc::new(Aufzeichner::default());
        let (segmenter, puffer, kanaele) = aufbau(1, Arc::clone(&verarbeiter));
        for i in 0..10u8 {
            anhaengen(&puffer, &segmenter, 1, i);
        }
        let sitzung = kanaele.holen(&KANAL).unwrap();
        sitzung.abbrechen();
        puffer.kanal_leeren(KANAL);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(verarbeiter.aeusserungen.lock().is_empty());
        assert_eq!(segmenter.aktive_timer(), 0);
    }
}
