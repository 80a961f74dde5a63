//! Verbindungs-Monitor – Keepalive, Paket-Timeout und Reconnect
//!
//! Drei unabhaengige Intervalle:
//! - Health-Check (Standard 20 s): Timeout-Erkennung und Reconnect
//! - Keepalive (Standard 30 s): Lebenszeichen an den Transport
//! - Aufraeumen (Standard 5 min): verwaiste Puffer und alter Kontext
//!
//! Reconnect-Ablauf pro Kanal:
//!
//! ```text
//! Healthy ──Timeout──> Reconnecting ──trennen──> Pause ──verbinden──> Healthy
//!                                                              └──Fehler──> Gestoert
//! ```
//!
//! Pro Kanal laeuft hoechstens ein Reconnect (Check-and-Set in
//! `KanalSitzung::reconnect_beginnen`). Ein gestoerter Kanal wird beim
//! naechsten Health-Check erneut bewertet. Meldet der Transport nach der
//! Pause schon eine Verbindung, wird diese ohne Schonfrist uebernommen.

use crate::buffer::SpeakerBufferManager;
use crate::channel::{KanalRegister, KanalSitzung, KanalZustand};
use crate::context::KontextSpeicher;
use crate::transport::VoiceTransport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use voxbot_core::event::{BotEvent, EventBus};
use voxbot_core::types::ChannelId;

/// Parameter des Monitors
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub health_intervall: Duration,
    pub paket_timeout: Duration,
    pub keepalive_intervall: Duration,
    pub reconnect_pause: Duration,
    pub aufraeum_intervall: Duration,
    /// Puffer ohne Aktivitaet seit dieser Zeit gelten als verwaist
    pub puffer_max_alter: Duration,
}

/// Ausgang eines Reconnect-Versuchs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectErgebnis {
    Erfolgreich,
    /// Transport war nach der Pause bereits wieder verbunden
    BereitsVerbunden,
    Fehlgeschlagen(String),
    /// Es laeuft schon ein Reconnect (oder der Kanal ist nicht verbunden)
    Uebersprungen,
    /// Kanal wurde waehrenddessen verlassen
    Verlassen,
}

/// Reconnect-Zaehler
#[derive(Debug, Default)]
pub struct ReconnectStatistik {
    pub versuche: AtomicU64,
    pub erfolgreich: AtomicU64,
    pub fehlgeschlagen: AtomicU64,
}

// ---------------------------------------------------------------------------
// VerbindungsMonitor
// ---------------------------------------------------------------------------

/// Ueberwacht alle Voice-Verbindungen
#[derive(Clone)]
pub struct VerbindungsMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    config: MonitorConfig,
    kanaele: KanalRegister,
    puffer: SpeakerBufferManager,
    kontext: KontextSpeicher,
    transport: Arc<dyn VoiceTransport>,
    events: Arc<dyn EventBus>,
    statistik: ReconnectStatistik,
}

impl VerbindungsMonitor {
    pub fn neu(
        config: MonitorConfig,
        kanaele: KanalRegister,
        puffer: SpeakerBufferManager,
        kontext: KontextSpeicher,
        transport: Arc<dyn VoiceTransport>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                kanaele,
                puffer,
                kontext,
                transport,
                events,
                statistik: ReconnectStatistik::default(),
            }),
        }
    }

    pub fn statistik(&self) -> &ReconnectStatistik {
        &self.inner.statistik
    }

    /// Startet die Monitor-Schleife (laeuft bis `shutdown` abgebrochen wird)
    pub async fn starten(&self, shutdown: CancellationToken) {
        let mut health = tokio::time::interval(self.inner.config.health_intervall);
        let mut keepalive = tokio::time::interval(self.inner.config.keepalive_intervall);
        let mut aufraeumen = tokio::time::interval(self.inner.config.aufraeum_intervall);
        for intervall in [&mut health, &mut keepalive, &mut aufraeumen] {
            intervall.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Erster Tick feuert sofort
            intervall.tick().await;
        }

        tracing::info!(
            health_s = self.inner.config.health_intervall.as_secs(),
            timeout_s = self.inner.config.paket_timeout.as_secs(),
            keepalive_s = self.inner.config.keepalive_intervall.as_secs(),
            "Verbindungs-Monitor gestartet"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = health.tick() => {
                    self.pruefen().await;
                }
                _ = keepalive.tick() => {
                    self.keepalive_senden().await;
                }
                _ = aufraeumen.tick() => {
                    self.aufraeumen();
                }
            }
        }

        tracing::info!("Verbindungs-Monitor beendet");
    }

    // -----------------------------------------------------------------------
    // Health-Check
    // -----------------------------------------------------------------------

    /// Prueft alle Kanaele und stoesst noetige Reconnects an
    ///
    /// Reconnects verschiedener Kanaele laufen parallel; die Methode kehrt
    /// zurueck wenn alle fertig sind.
    pub async fn pruefen(&self) -> Vec<(ChannelId, ReconnectErgebnis)> {
        let mut reconnects = JoinSet::new();
        for sitzung in self.inner.kanaele.alle() {
            if self.ist_ungesund(&sitzung) {
                let monitor = self.clone();
                let kanal = sitzung.kanal();
                reconnects.spawn(async move { (kanal, monitor.reconnect_ausloesen(kanal).await) });
            }
        }

        let mut ergebnisse = Vec::new();
        while let Some(ergebnis) = reconnects.join_next().await {
            match ergebnis {
                Ok(e) => ergebnisse.push(e),
                Err(e) => tracing::error!(fehler = %e, "Reconnect-Task abgebrochen"),
            }
        }
        ergebnisse
    }

    fn ist_ungesund(&self, sitzung: &KanalSitzung) -> bool {
        let kanal = sitzung.kanal();
        match sitzung.zustand() {
            KanalZustand::Listening => {}
            KanalZustand::Gestoert => {
                tracing::info!(kanal = %kanal, "Gestoerter Kanal – neuer Versuch");
                return true;
            }
            // Beim Sprechen kommen keine Pakete; das zaehlt nicht als Timeout
            KanalZustand::Speaking { .. } | KanalZustand::Idle | KanalZustand::Reconnecting => {
                return false
            }
        }

        if !self.inner.transport.ist_verbunden(kanal) {
            tracing::warn!(kanal = %kanal, "Transport meldet getrennte Verbindung");
            return true;
        }

        let menschen = self.inner.transport.menschliche_teilnehmer(kanal);
        let still_seit = sitzung.seit_letztem_paket();
        if menschen > 1 && still_seit > self.inner.config.paket_timeout {
            tracing::warn!(
                kanal = %kanal,
                teilnehmer = menschen,
                still_s = still_seit.as_secs(),
                "Keine Pakete trotz aktiver Teilnehmer – Verbindung ungesund"
            );
            return true;
        }
        false
    }

    /// Baut die Verbindung eines Kanals neu auf
    ///
    /// Laeuft fuer den Kanal bereits ein Reconnect, ist der Aufruf ein No-Op.
    pub async fn reconnect_ausloesen(&self, kanal: ChannelId) -> ReconnectErgebnis {
        let Some(sitzung) = self.inner.kanaele.holen(&kanal) else {
            return ReconnectErgebnis::Uebersprungen;
        };
        if !sitzung.reconnect_beginnen() {
            tracing::debug!(kanal = %kanal, "Reconnect laeuft bereits");
            return ReconnectErgebnis::Uebersprungen;
        }

        self.inner.statistik.versuche.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(kanal = %kanal, "Starte Reconnect");
        self.event_senden(BotEvent::ReconnectGestartet { kanal_id: kanal });

        // Timer und Puffer der alten Verbindung verwerfen
        sitzung.abbrechen();
        let verworfen = self.inner.puffer.kanal_leeren(kanal);
        if verworfen > 0 {
            tracing::debug!(kanal = %kanal, puffer = verworfen, "Puffer verworfen");
        }

        if let Some(handle) = sitzung.handle_nehmen() {
            if let Err(e) = self.inner.transport.trennen(&handle).await {
                tracing::debug!(kanal = %kanal, fehler = %e, "Trennen fehlgeschlagen (ignoriert)");
            }
        }

        tokio::time::sleep(self.inner.config.reconnect_pause).await;

        // Waehrend der Pause manuell wieder verbunden: bestehende Verbindung
        // uebernehmen statt einen eigenen Reconnect zu zaehlen
        let bereits_verbunden = self.inner.transport.ist_verbunden(kanal);

        match self.inner.transport.verbinden(kanal).await {
            Ok(handle) => {
                let uebernommen = self.inner.kanaele.ist_aktuell(&sitzung)
                    && sitzung.verbunden(handle.clone(), !bereits_verbunden);
                if !uebernommen {
                    // Kanal wurde waehrend des Reconnects verlassen
                    if let Err(e) = self.inner.transport.trennen(&handle).await {
                        tracing::debug!(kanal = %kanal, fehler = %e, "Trennen fehlgeschlagen (ignoriert)");
                    }
                    return ReconnectErgebnis::Verlassen;
                }
                if bereits_verbunden {
                    tracing::info!(kanal = %kanal, "Transport bereits verbunden, Reconnect uebersprungen");
                    return ReconnectErgebnis::BereitsVerbunden;
                }
                self.inner.statistik.erfolgreich.fetch_add(1, Ordering::Relaxed);
                tracing::info!(kanal = %kanal, "Reconnect erfolgreich");
                self.event_senden(BotEvent::ReconnectErfolgreich { kanal_id: kanal });
                ReconnectErgebnis::Erfolgreich
            }
            Err(e) => {
                sitzung.reconnect_fehlgeschlagen();
                self.inner
                    .statistik
                    .fehlgeschlagen
                    .fetch_add(1, Ordering::Relaxed);
                tracing::error!(kanal = %kanal, fehler = %e, "Reconnect fehlgeschlagen – Kanal gestoert");
                self.event_senden(BotEvent::ReconnectFehlgeschlagen {
                    kanal_id: kanal,
                    grund: e.to_string(),
                });
                ReconnectErgebnis::Fehlgeschlagen(e.to_string())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Keepalive
    // -----------------------------------------------------------------------

    /// Sendet faellige Keepalives; gibt die Anzahl gesendeter zurueck
    pub async fn keepalive_senden(&self) -> usize {
        let mut gesendet = 0;
        for sitzung in self.inner.kanaele.alle() {
            if !matches!(
                sitzung.zustand(),
                KanalZustand::Listening | KanalZustand::Speaking { .. }
            ) {
                continue;
            }
            // Etwas Toleranz, damit ein knapp verpasster Tick nicht einen
            // ganzen Zyklus kostet
            let faellig_ab = self
                .inner
                .config
                .keepalive_intervall
                .saturating_sub(Duration::from_millis(500));
            if !sitzung.keepalive_faellig(faellig_ab) {
                continue;
            }
            let Some(handle) = sitzung.handle() else {
                continue;
            };
            match self.inner.transport.keepalive(&handle).await {
                Ok(()) => {
                    sitzung.keepalive_gesendet();
                    gesendet += 1;
                    tracing::trace!(kanal = %sitzung.kanal(), "Keepalive gesendet");
                }
                Err(e) => {
                    tracing::warn!(kanal = %sitzung.kanal(), fehler = %e, "Keepalive fehlgeschlagen");
                    self.event_senden(BotEvent::KeepaliveFehlgeschlagen {
                        kanal_id: sitzung.kanal(),
                    });
                }
            }
        }
        gesendet
    }

    // -----------------------------------------------------------------------
    // Aufraeumen
    // -----------------------------------------------------------------------

    /// Verwirft verwaiste Puffer und abgelaufenen Kontext
    pub fn aufraeumen(&self) -> (usize, usize) {
        let puffer = self.inner.puffer.aufraeumen(self.inner.config.puffer_max_alter);
        let kontext = self.inner.kontext.aufraeumen();
        tracing::info!(
            puffer_verworfen = puffer,
            kontext_verworfen = kontext,
            puffer_aktiv = self.inner.puffer.anzahl(),
            kanaele = self.inner.kanaele.anzahl(),
            "Aufraeumen abgeschlossen"
        );
        (puffer, kontext)
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
