//! VoiceBot – verdrahtet alle Komponenten der Voice-Engine
//!
//! ```text
//! VoiceTransport ──TransportEreignis──> VoiceBot::ereignis_verarbeiten
//!                                          │
//!                                          v
//!   PacketIngestor -> SpeakerBufferManager -> UtteranceSegmenter
//!                                                  │
//!                                                  v
//!                     KontextSpeicher <──── SprachPipeline ──> PlaybackController
//!
//!   VerbindungsMonitor (eigene Schleife, alle Kanaele)
//! ```

use crate::buffer::SpeakerBufferManager;
use crate::channel::{KanalRegister, KanalZustand, Reservierung};
use crate::config::VoiceConfig;
use crate::context::KontextSpeicher;
use crate::gating::{AnspracheErkennung, AntwortEntscheider, Zufallsquelle};
use crate::health::{MonitorConfig, ReconnectErgebnis, VerbindungsMonitor};
use crate::ingest::{PacketIngestor, PaketStatistikSnapshot};
use crate::pipeline::SprachPipeline;
use crate::playback::{PlaybackController, Sprachausgabe};
use crate::segmenter::UtteranceSegmenter;
use crate::transport::{TransportEreignis, VoiceTransport};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use voxbot_core::event::{BotEvent, EventBus};
use voxbot_core::types::{ChannelId, Sprecher};
use voxbot_core::{AntwortGenerator, Result, Synthesizer, Transkriptor, VoxbotError};

/// Externe Dienste des Bots
#[derive(Clone)]
pub struct Dienste {
    pub transkriptor: Arc<dyn Transkriptor>,
    pub generator: Arc<dyn AntwortGenerator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// Ergebnis von `VoiceBot::beitreten`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beitritt {
    /// Neu verbunden
    Verbunden,
    /// War bereits verbunden
    BereitsVerbunden,
    /// Ein anderer Aufruf baut die Verbindung gerade auf
    LaeuftBereits,
    /// Gestoerter Kanal wurde neu verbunden
    Wiederhergestellt,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Zustand eines Kanals fuer `/health`
#[derive(Debug, Clone, Serialize)]
pub struct KanalStatus {
    pub kanal_id: u64,
    pub zustand: KanalZustand,
    pub sekunden_seit_paket: u64,
    pub sprecher_puffer: usize,
    pub gepufferte_pakete: usize,
    pub teilnehmer: usize,
}

/// Momentaufnahme des gesamten Bots
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub kanaele: Vec<KanalStatus>,
    pub pakete: PaketStatistikSnapshot,
    pub reconnects_erfolgreich: u64,
    pub reconnects_fehlgeschlagen: u64,
}

impl BotStatus {
    /// Gesund solange kein Kanal gestoert ist
    pub fn ist_gesund(&self) -> bool {
        !self
            .kanaele
            .iter()
            .any(|k| k.zustand == KanalZustand::Gestoert)
    }
}

// ---------------------------------------------------------------------------
// VoiceBot
// ---------------------------------------------------------------------------

/// Der Voice-Bot (Clone ist billig)
#[derive(Clone)]
pub struct VoiceBot {
    inner: Arc<BotInner>,
}

struct BotInner {
    config: VoiceConfig,
    kanaele: KanalRegister,
    puffer: SpeakerBufferManager,
    kontext: KontextSpeicher,
    ingestor: PacketIngestor,
    segmenter: UtteranceSegmenter,
    playback: Arc<PlaybackController>,
    monitor: VerbindungsMonitor,
    transport: Arc<dyn VoiceTransport>,
    events: Arc<dyn EventBus>,
}

impl VoiceBot {
    pub fn neu(
        config: VoiceConfig,
        transport: Arc<dyn VoiceTransport>,
        dienste: Dienste,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self::mit_zufallsquelle(
            config,
            transport,
            dienste,
            events,
            Arc::new(rand::random::<f64>),
        )
    }

    /// Wie `neu`, aber mit eigener Zufallsquelle fuer das Antwort-Gate
    pub fn mit_zufallsquelle(
        config: VoiceConfig,
        transport: Arc<dyn VoiceTransport>,
        dienste: Dienste,
        events: Arc<dyn EventBus>,
        zufall: Zufallsquelle,
    ) -> Self {
        let kanaele = KanalRegister::neu();
        let puffer = SpeakerBufferManager::neu(config.max_puffer_pakete);
        let kontext = KontextSpeicher::neu(config.kontext_max_eintraege, config.kontext_max_alter);

        let playback = Arc::new(PlaybackController::neu(
            kanaele.clone(),
            dienste.synthesizer,
            Arc::clone(&transport),
            Arc::clone(&events),
        ));

        let entscheider = AntwortEntscheider::mit_zufallsquelle(
            AnspracheErkennung::neu(&config.ansprache),
            config.zufall_wahrscheinlichkeit,
            zufall,
        );
        let pipeline = Arc::new(SprachPipeline::neu(
            dienste.transkriptor,
            dienste.generator,
            Arc::clone(&playback) as Arc<dyn Sprachausgabe>,
            kontext.clone(),
            entscheider,
            config.zusammenfassung_eintraege,
            Arc::clone(&events),
        ));

        let segmenter = UtteranceSegmenter::neu(
            puffer.clone(),
            kanaele.clone(),
            pipeline,
            Arc::clone(&events),
            config.finalisierungs_wartezeit(),
            config.min_pakete,
        );
        let ingestor = PacketIngestor::neu(
            kanaele.clone(),
            puffer.clone(),
            segmenter.clone(),
            Arc::clone(&events),
            config.reconnect_schonfrist,
        );
        let monitor = VerbindungsMonitor::neu(
            MonitorConfig {
                health_intervall: config.health_intervall,
                paket_timeout: config.paket_timeout,
                keepalive_intervall: config.keepalive_intervall,
                reconnect_pause: config.reconnect_pause,
                aufraeum_intervall: config.aufraeum_intervall,
                puffer_max_alter: config.paket_timeout,
            },
            kanaele.clone(),
            puffer.clone(),
            kontext.clone(),
            Arc::clone(&transport),
            Arc::clone(&events),
        );

        Self {
            inner: Arc::new(BotInner {
                config,
                kanaele,
                puffer,
                kontext,
                ingestor,
                segmenter,
                playback,
                monitor,
                transport,
                events,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Kanaele
    // -----------------------------------------------------------------------

    /// Tritt einem Voice-Kanal bei
    ///
    /// Gleichzeitige Aufrufe fuer denselben Kanal verbinden nur einmal.
    pub async fn beitreten(&self, kanal: ChannelId) -> Result<Beitritt> {
        let sitzung = match self.inner.kanaele.reservieren(kanal) {
            Reservierung::Neu(sitzung) => sitzung,
            Reservierung::Vorhanden(sitzung) => {
                return match sitzung.zustand() {
                    KanalZustand::Idle => Ok(Beitritt::LaeuftBereits),
                    KanalZustand::Gestoert => {
                        match self.inner.monitor.reconnect_ausloesen(kanal).await {
                            ReconnectErgebnis::Erfolgreich
                            | ReconnectErgebnis::BereitsVerbunden => Ok(Beitritt::Wiederhergestellt),
                            ReconnectErgebnis::Fehlgeschlagen(grund) => {
                                Err(VoxbotError::Verbindung(grund))
                            }
                            ReconnectErgebnis::Uebersprungen | ReconnectErgebnis::Verlassen => {
                                Ok(Beitritt::LaeuftBereits)
                            }
                        }
                    }
                    _ => Ok(Beitritt::BereitsVerbunden),
                };
            }
        };

        // Reste einer frueheren Sitzung verwerfen
        self.inner.puffer.kanal_leeren(kanal);

        match self.inner.transport.verbinden(kanal).await {
            Ok(handle) => {
                let uebernommen = self.inner.kanaele.ist_aktuell(&sitzung)
                    && sitzung.verbunden(handle.clone(), false);
                if !uebernommen {
                    if let Err(e) = self.inner.transport.trennen(&handle).await {
                        tracing::debug!(kanal = %kanal, fehler = %e, "Trennen fehlgeschlagen (ignoriert)");
                    }
                    return Err(VoxbotError::Getrennt(format!(
                        "{kanal} waehrend des Verbindungsaufbaus verlassen"
                    )));
                }
                tracing::info!(kanal = %kanal, "Voice-Kanal beigetreten");
                self.event_senden(BotEvent::KanalBetreten { kanal_id: kanal });
                Ok(Beitritt::Verbunden)
            }
            Err(e) => {
                // Sitzung bleibt als gestoert registriert, der Health-Monitor
                // versucht den Beitritt erneut
                sitzung.beitritt_fehlgeschlagen();
                tracing::warn!(kanal = %kanal, fehler = %e, "Beitritt fehlgeschlagen, Kanal gestoert");
                Err(e)
            }
        }
    }

    /// Verlaesst einen Kanal: Timer, Wiedergabe und Puffer werden verworfen
    ///
    /// Gibt `false` zurueck wenn der Bot nicht im Kanal war.
    pub async fn verlassen(&self, kanal: ChannelId) -> Result<bool> {
        let Some(sitzung) = self.inner.kanaele.entfernen(&kanal) else {
            return Ok(false);
        };
        sitzung.beenden();
        let verworfen = self.inner.puffer.kanal_leeren(kanal);
        self.inner.kontext.kanal_leeren(kanal);

        if let Some(handle) = sitzung.handle_nehmen() {
            if let Err(e) = self.inner.transport.trennen(&handle).await {
                tracing::debug!(kanal = %kanal, fehler = %e, "Trennen fehlgeschlagen (ignoriert)");
            }
        }

        tracing::info!(kanal = %kanal, puffer_verworfen = verworfen, "Voice-Kanal verlassen");
        self.event_senden(BotEvent::KanalVerlassen { kanal_id: kanal });
        Ok(true)
    }

    /// Verlaesst alle Kanaele
    pub async fn herunterfahren(&self) {
        for sitzung in self.inner.kanaele.alle() {
            if let Err(e) = self.verlassen(sitzung.kanal()).await {
                tracing::warn!(kanal = %sitzung.kanal(), fehler = %e, "Verlassen fehlgeschlagen");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transport-Ereignisse
    // -----------------------------------------------------------------------

    /// Verarbeitet Transport-Ereignisse bis `shutdown` oder Queue-Ende
    pub async fn ereignisse_verarbeiten(
        &self,
        mut rx: mpsc::Receiver<TransportEreignis>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Ereignis-Schleife gestartet");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                ereignis = rx.recv() => match ereignis {
                    Some(e) => self.ereignis_verarbeiten(e),
                    None => break,
                },
            }
        }
        tracing::info!("Ereignis-Schleife beendet");
    }

    /// Verarbeitet ein einzelnes Transport-Ereignis
    pub fn ereignis_verarbeiten(&self, ereignis: TransportEreignis) {
        match ereignis {
            TransportEreignis::Paket {
                kanal,
                sprecher,
                audio,
            } => {
                self.inner.ingestor.annehmen(kanal, &sprecher, audio);
            }
            TransportEreignis::TeilnehmerBeigetreten { kanal, sprecher } => {
                tracing::info!(kanal = %kanal, sprecher = %sprecher.id, name = %sprecher.name, "Teilnehmer beigetreten");
                if !sprecher.ist_bot {
                    self.begruessen(kanal, &sprecher);
                }
            }
            TransportEreignis::TeilnehmerVerlassen { kanal, sprecher_id } => {
                let verworfen = self.inner.puffer.entnehmen(kanal, sprecher_id);
                tracing::info!(
                    kanal = %kanal,
                    sprecher = %sprecher_id,
                    pakete_verworfen = verworfen.len(),
                    "Teilnehmer hat den Kanal verlassen"
                );
            }
            TransportEreignis::Getrennt { kanal } => {
                tracing::warn!(kanal = %kanal, "Transport hat die Verbindung beendet");
                let monitor = self.inner.monitor.clone();
                tokio::spawn(async move {
                    monitor.reconnect_ausloesen(kanal).await;
                });
            }
        }
    }

    fn begruessen(&self, kanal: ChannelId, sprecher: &Sprecher) {
        let Some(begruessung) = &self.inner.config.begruessung else {
            return;
        };
        let Some(sitzung) = self.inner.kanaele.holen(&kanal) else {
            return;
        };
        let token = sitzung.abbruch_token();
        let text = begruessung.rendern(&sprecher.name);
        let verzoegerung = begruessung.verzoegerung;
        let playback = Arc::clone(&self.inner.playback);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(verzoegerung) => {
                    if let Err(e) = playback.abspielen(kanal, &text).await {
                        tracing::debug!(kanal = %kanal, fehler = %e, "Begruessung nicht abgespielt");
                    }
                }
            }
        });
    }

    // -----------------------------------------------------------------------
    // Zugriff
    // -----------------------------------------------------------------------

    pub fn monitor(&self) -> &VerbindungsMonitor {
        &self.inner.monitor
    }

    pub fn ingestor(&self) -> &PacketIngestor {
        &self.inner.ingestor
    }

    pub fn segmenter(&self) -> &UtteranceSegmenter {
        &self.inner.segmenter
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.inner.playback
    }

    pub fn kontext(&self) -> &KontextSpeicher {
        &self.inner.kontext
    }

    pub fn kanaele(&self) -> &KanalRegister {
        &self.inner.kanaele
    }

    pub fn puffer(&self) -> &SpeakerBufferManager {
        &self.inner.puffer
    }

    /// Momentaufnahme fuer `/health` und Metriken
    pub fn status(&self) -> BotStatus {
        let mut kanaele: Vec<KanalStatus> = self
            .inner
            .kanaele
            .alle()
            .into_iter()
            .map(|sitzung| {
                let kanal = sitzung.kanal();
                let (sprecher_puffer, gepufferte_pakete) = self.inner.puffer.kanal_statistik(kanal);
                KanalStatus {
                    kanal_id: kanal.inner(),
                    zustand: sitzung.zustand(),
                    sekunden_seit_paket: sitzung.seit_letztem_paket().as_secs(),
                    sprecher_puffer,
                    gepufferte_pakete,
                    teilnehmer: self.inner.transport.menschliche_teilnehmer(kanal),
                }
            })
            .collect();
        kanaele.sort_by_key(|k| k.kanal_id);

        let reconnects = self.inner.monitor.statistik();
        BotStatus {
            kanaele,
            pakete: self.inner.ingestor.statistik().snapshot(),
            reconnects_erfolgreich: reconnects
                .erfolgreich
                .load(std::sync::atomic::Ordering::Relaxed),
            reconnects_fehlgeschlagen: reconnects
                .fehlgeschlagen
                .load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    fn event_senden(&self, event: BotEvent) {
        if let Err(e) = self.inner.events.senden(event) {
            tracing::trace!(fehler = %e, "Event konnte nicht gesendet werden");
        }
    }
}
