//! voxbot-server – Bibliotheks-Root
//!
//! Verdrahtet Transport, externe Dienste, Voice-Engine und Observability
//! und stellt den oeffentlichen Einstiegspunkt fuer Tests bereit.

pub mod config;
pub mod events;

use anyhow::Result;
use config::ServerConfig;
use events::BroadcastEventBus;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use voxbot_core::event::{EventBus, EventEmpfaenger};
use voxbot_observability::{HealthState, ProzessMonitor, StatusQuelle, VoxbotMetrics};
use voxbot_services::{HttpAntwortGenerator, HttpSynthesizer, HttpTranskriptor};
use voxbot_voice::{Dienste, UdpTransport, VoiceBot};

/// Kapazitaet der Queue zwischen Transport und Bot
const TRANSPORT_QUEUE_GROESSE: usize = 2048;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Konfiguration pruefen, Dienste-Clients erstellen
    /// 2. UDP-Transport binden, Empfangs- und Ereignis-Schleife starten
    /// 3. Health-Monitor und Metrik-Erfassung starten
    /// 4. Observability-Server starten
    /// 5. Konfigurierte Kanaele betreten
    /// 6. Auf Ctrl-C warten, dann alles geordnet beenden
    pub async fn starten(self) -> Result<()> {
        let voice_config = self.config.voice_config()?;
        let transport_config = self.config.transport_config()?;

        let api_key = config::api_key_aus_umgebung();
        let dienste = Dienste {
            transkriptor: Arc::new(HttpTranskriptor::neu(
                self.config.transkription_config(api_key.clone()),
            )),
            generator: Arc::new(HttpAntwortGenerator::neu(
                self.config.generator_config(api_key.clone()),
            )?),
            synthesizer: Arc::new(HttpSynthesizer::neu(self.config.synthese_config(api_key))?),
        };

        tracing::info!(
            bot = %self.config.bot.name,
            relay = %self.config.verbindung.relay_adresse,
            stt = %self.config.dienste.transkription_url,
            llm = %self.config.dienste.antwort_url,
            tts = %self.config.dienste.synthese_url,
            "voxbot startet"
        );

        let shutdown = CancellationToken::new();
        let mut aufgaben = JoinSet::new();

        let bus = BroadcastEventBus::default();
        let metriken = VoxbotMetrics::neu()?;
        // Vor dem Bot abonnieren, damit keine Start-Ereignisse verloren gehen
        let metrik_empfaenger = bus.abonnieren();

        let (tx, rx) = mpsc::channel(TRANSPORT_QUEUE_GROESSE);
        let transport = UdpTransport::binden(transport_config, tx).await?;
        let bot = VoiceBot::neu(
            voice_config,
            Arc::new(transport.clone()),
            dienste,
            Arc::new(bus.clone()) as Arc<dyn EventBus>,
        );

        {
            let transport = transport.clone();
            let shutdown = shutdown.clone();
            aufgaben.spawn(
                async move { transport.empfangs_loop_starten(shutdown).await }.in_current_span(),
            );
        }
        {
            let bot = bot.clone();
            let shutdown = shutdown.clone();
            aufgaben.spawn(
                async move { bot.ereignisse_verarbeiten(rx, shutdown).await }.in_current_span(),
            );
        }
        {
            let bot = bot.clone();
            let shutdown = shutdown.clone();
            aufgaben.spawn(async move { bot.monitor().starten(shutdown).await }.in_current_span());
        }

        let status_quelle: StatusQuelle = {
            let bot = bot.clone();
            Arc::new(move || bot.status())
        };
        {
            let metriken = metriken.clone();
            let quelle = Arc::clone(&status_quelle);
            let intervall = Duration::from_secs(self.config.observability.erfassungs_intervall_sek);
            let shutdown = shutdown.clone();
            aufgaben.spawn(
                async move {
                    metriken_erfassen(metriken, metrik_empfaenger, quelle, intervall, shutdown).await
                }
                .in_current_span(),
            );
        }

        if self.config.observability.aktiviert {
            let adresse = self.config.observability_bind_adresse();
            let bind: SocketAddr = adresse
                .parse()
                .map_err(|e| anyhow::anyhow!("Ungueltige Observability-Adresse '{adresse}': {e}"))?;
            let health = HealthState::neu(status_quelle);
            let metriken = metriken.clone();
            let shutdown = shutdown.clone();
            aufgaben.spawn(
                async move {
                    if let Err(e) = voxbot_observability::observability_server_starten(
                        bind, metriken, health, shutdown,
                    )
                    .await
                    {
                        tracing::error!(fehler = %e, "Observability-Server beendet");
                    }
                }
                .in_current_span(),
            );
        }

        for kanal in self.config.start_kanaele() {
            match bot.beitreten(kanal).await {
                Ok(ergebnis) => tracing::info!(kanal = %kanal, ?ergebnis, "Start-Kanal betreten"),
                Err(e) => {
                    // Der Health-Monitor versucht gestoerte Kanaele erneut
                    tracing::error!(kanal = %kanal, fehler = %e, "Start-Kanal nicht erreichbar")
                }
            }
        }

        tracing::info!("voxbot laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, voxbot wird beendet");

        shutdown.cancel();
        bot.herunterfahren().await;
        while let Some(ergebnis) = aufgaben.join_next().await {
            if let Err(e) = ergebnis {
                tracing::warn!(fehler = %e, "Hintergrund-Task abgebrochen");
            }
        }

        tracing::info!("voxbot beendet");
        Ok(())
    }
}

/// Uebertraegt Bus-Ereignisse und periodische Status-Snapshots in die Metriken
pub async fn metriken_erfassen(
    metriken: VoxbotMetrics,
    mut ereignisse: Box<dyn EventEmpfaenger + Send>,
    status: StatusQuelle,
    intervall: Duration,
    shutdown: CancellationToken,
) {
    let mut prozess = ProzessMonitor::neu();
    let mut ticker = tokio::time::interval(intervall.max(Duration::from_millis(100)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut bus_offen = true;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                metriken.status_uebernehmen(&status());
                prozess.aktualisieren(&metriken);
            }
            event = ereignisse.empfangen(), if bus_offen => match event {
                Some(event) => metriken.ereignis_erfassen(&event),
                None => {
                    tracing::debug!("Event-Bus geschlossen, nur noch Status-Erfassung");
                    bus_offen = false;
                }
            },
        }
    }
}
