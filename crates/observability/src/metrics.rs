//! Prometheus-kompatible Metriken fuer voxbot
//!
//! Registrierte Metriken:
//! - `voxbot_kanaele_aktiv` – Gauge: Verbundene Voice-Kanaele
//! - `voxbot_kanaele_gestoert` – Gauge: Kanaele nach fehlgeschlagenem Reconnect
//! - `voxbot_sprecher_puffer` – Gauge: Offene Sprecher-Puffer
//! - `voxbot_pakete_empfangen_total` – Counter: Empfangene Pakete
//! - `voxbot_pakete_angenommen_total` – Counter: Gepufferte Pakete
//! - `voxbot_pakete_verworfen_total` – Counter: Verworfene Pakete (grund)
//! - `voxbot_puffer_ueberlauf_total` – Counter: Verdraengte Pakete
//! - `voxbot_aeusserungen_total` – Counter: Aeusserungen (ergebnis)
//! - `voxbot_aeusserung_pakete` – Histogram: Pakete pro Aeusserung
//! - `voxbot_transkriptionen_total` – Counter: Transkriptionen (ergebnis)
//! - `voxbot_antworten_total` – Counter: Ausgeloeste Antworten (grund)
//! - `voxbot_wiedergaben_total` – Counter: Wiedergaben (ergebnis)
//! - `voxbot_reconnects_total` – Counter: Reconnects (ergebnis)
//! - `voxbot_keepalive_fehler_total` – Counter: Fehlgeschlagene Keepalives
//! - `voxbot_cpu_usage_percent` – Gauge: CPU-Auslastung des Prozesses
//! - `voxbot_memory_usage_bytes` – Gauge: Speicherverbrauch des Prozesses

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::{Arc, Mutex};
use voxbot_core::event::BotEvent;
use voxbot_voice::{BotStatus, KanalZustand, PaketStatistikSnapshot};

/// Alle voxbot-Prometheus-Metriken
#[derive(Clone)]
pub struct VoxbotMetrics {
    pub registry: Arc<Registry>,

    // Kanaele
    pub kanaele_aktiv: IntGauge,
    pub kanaele_gestoert: IntGauge,
    pub sprecher_puffer: IntGauge,

    // Paket-Empfang
    pub pakete_empfangen_total: IntCounter,
    pub pakete_angenommen_total: IntCounter,
    pub pakete_verworfen_total: IntCounterVec,
    pub puffer_ueberlauf_total: IntCounter,

    // Pipeline
    pub aeusserungen_total: IntCounterVec,
    pub aeusserung_pakete: Histogram,
    pub transkriptionen_total: IntCounterVec,
    pub antworten_total: IntCounterVec,
    pub wiedergaben_total: IntCounterVec,

    // Verbindung
    pub reconnects_total: IntCounterVec,
    pub keepalive_fehler_total: IntCounter,

    // System
    pub cpu_usage_percent: Gauge,
    pub memory_usage_bytes: Gauge,

    /// Letzte uebernommene Paket-Statistik (fuer Counter-Deltas)
    letzte_pakete: Arc<Mutex<PaketStatistikSnapshot>>,
}

fn registrieren<M>(registry: &Registry, metrik: M) -> Result<M>
where
    M: prometheus::core::Collector + Clone + 'static,
{
    registry.register(Box::new(metrik.clone()))?;
    Ok(metrik)
}

impl VoxbotMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Kanaele ---
        let kanaele_aktiv = registrieren(
            &registry,
            IntGauge::with_opts(Opts::new("voxbot_kanaele_aktiv", "Verbundene Voice-Kanaele"))?,
        )?;
        let kanaele_gestoert = registrieren(
            &registry,
            IntGauge::with_opts(Opts::new(
                "voxbot_kanaele_gestoert",
                "Kanaele nach fehlgeschlagenem Reconnect",
            ))?,
        )?;
        let sprecher_puffer = registrieren(
            &registry,
            IntGauge::with_opts(Opts::new("voxbot_sprecher_puffer", "Offene Sprecher-Puffer"))?,
        )?;

        // --- Paket-Empfang ---
        let pakete_empfangen_total = registrieren(
            &registry,
            IntCounter::with_opts(Opts::new(
                "voxbot_pakete_empfangen_total",
                "Empfangene Audio-Pakete",
            ))?,
        )?;
        let pakete_angenommen_total = registrieren(
            &registry,
            IntCounter::with_opts(Opts::new(
                "voxbot_pakete_angenommen_total",
                "Gepufferte Audio-Pakete",
            ))?,
        )?;
        let pakete_verworfen_total = registrieren(
            &registry,
            IntCounterVec::new(
                Opts::new("voxbot_pakete_verworfen_total", "Verworfene Audio-Pakete"),
                &["grund"],
            )?,
        )?;
        let puffer_ueberlauf_total = registrieren(
            &registry,
            IntCounter::with_opts(Opts::new(
                "voxbot_puffer_ueberlauf_total",
                "Wegen vollem Puffer verdraengte Pakete",
            ))?,
        )?;

        // --- Pipeline ---
        let aeusserungen_total = registrieren(
            &registry,
            IntCounterVec::new(
                Opts::new("voxbot_aeusserungen_total", "Abgeschlossene Aeusserungen"),
                &["ergebnis"],
            )?,
        )?;
        let aeusserung_pakete = registrieren(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new("voxbot_aeusserung_pakete", "Pakete pro Aeusserung")
                    .buckets(vec![5.0, 10.0, 25.0, 50.0, 100.0, 150.0, 200.0, 250.0]),
            )?,
        )?;
        let transkriptionen_total = registrieren(
            &registry,
            IntCounterVec::new(
                Opts::new("voxbot_transkriptionen_total", "Transkriptionen"),
                &["ergebnis"],
            )?,
        )?;
        let antworten_total = registrieren(
            &registry,
            IntCounterVec::new(
                Opts::new("voxbot_antworten_total", "Ausgeloeste Antworten"),
                &["grund"],
            )?,
        )?;
        let wiedergaben_total = registrieren(
            &registry,
            IntCounterVec::new(
                Opts::new("voxbot_wiedergaben_total", "Beendete Wiedergaben"),
                &["ergebnis"],
            )?,
        )?;

        // --- Verbindung ---
        let reconnects_total = registrieren(
            &registry,
            IntCounterVec::new(
                Opts::new("voxbot_reconnects_total", "Reconnect-Versuche"),
                &["ergebnis"],
            )?,
        )?;
        let keepalive_fehler_total = registrieren(
            &registry,
            IntCounter::with_opts(Opts::new(
                "voxbot_keepalive_fehler_total",
                "Fehlgeschlagene Keepalives",
            ))?,
        )?;

        // --- System ---
        let cpu_usage_percent = registrieren(
            &registry,
            Gauge::with_opts(Opts::new(
                "voxbot_cpu_usage_percent",
                "CPU-Auslastung des Prozesses in Prozent",
            ))?,
        )?;
        let memory_usage_bytes = registrieren(
            &registry,
            Gauge::with_opts(Opts::new(
                "voxbot_memory_usage_bytes",
                "Speicherverbrauch des Prozesses in Bytes",
            ))?,
        )?;

        Ok(Self {
            registry: Arc::new(registry),
            kanaele_aktiv,
            kanaele_gestoert,
            sprecher_puffer,
            pakete_empfangen_total,
            pakete_angenommen_total,
            pakete_verworfen_total,
            puffer_ueberlauf_total,
            aeusserungen_total,
            aeusserung_pakete,
            transkriptionen_total,
            antworten_total,
            wiedergaben_total,
            reconnects_total,
            keepalive_fehler_total,
            cpu_usage_percent,
            memory_usage_bytes,
            letzte_pakete: Arc::new(Mutex::new(PaketStatistikSnapshot::default())),
        })
    }

    /// Zaehlt ein Ereignis des Event-Busses
    pub fn ereignis_erfassen(&self, event: &BotEvent) {
        match event {
            BotEvent::AeusserungErkannt { pakete, .. } => {
                self.aeusserungen_total.with_label_values(&["uebergeben"]).inc();
                self.aeusserung_pakete.observe(*pakete as f64);
            }
            BotEvent::RauschenVerworfen { .. } => {
                self.aeusserungen_total.with_label_values(&["rauschen"]).inc();
            }
            BotEvent::TranskriptErstellt { .. } => {
                self.transkriptionen_total.with_label_values(&["erfolgreich"]).inc();
            }
            BotEvent::TranskriptionFehlgeschlagen { .. } => {
                self.transkriptionen_total.with_label_values(&["fehlgeschlagen"]).inc();
            }
            BotEvent::AntwortAusgeloest { angesprochen, .. } => {
                let grund = if *angesprochen { "angesprochen" } else { "zufall" };
                self.antworten_total.with_label_values(&[grund]).inc();
            }
            BotEvent::GenerierungFehlgeschlagen { .. } => {
                self.antworten_total.with_label_values(&["fehlgeschlagen"]).inc();
            }
            BotEvent::WiedergabeBeendet { erfolgreich, .. } => {
                let ergebnis = if *erfolgreich { "erfolgreich" } else { "fehlgeschlagen" };
                self.wiedergaben_total.with_label_values(&[ergebnis]).inc();
            }
            BotEvent::ReconnectErfolgreich { .. } => {
                self.reconnects_total.with_label_values(&["erfolgreich"]).inc();
            }
            BotEvent::ReconnectFehlgeschlagen { .. } => {
                self.reconnects_total.with_label_values(&["fehlgeschlagen"]).inc();
            }
            BotEvent::KeepaliveFehlgeschlagen { .. } => self.keepalive_fehler_total.inc(),
            // Ueberlaeufe kommen ueber die Paket-Statistik
            BotEvent::PufferUeberlauf { .. }
            | BotEvent::KanalBetreten { .. }
            | BotEvent::KanalVerlassen { .. }
            | BotEvent::ReconnectGestartet { .. } => {}
        }
    }

    /// Uebernimmt Kanal-Gauges und Paket-Zaehler aus einem Status
    pub fn status_uebernehmen(&self, status: &BotStatus) {
        let gestoert = status
            .kanaele
            .iter()
            .filter(|k| k.zustand == KanalZustand::Gestoert)
            .count();
        self.kanaele_aktiv.set(status.kanaele.len() as i64);
        self.kanaele_gestoert.set(gestoert as i64);
        self.sprecher_puffer
            .set(status.kanaele.iter().map(|k| k.sprecher_puffer).sum::<usize>() as i64);
        self.pakete_uebernehmen(&status.pakete);
    }

    /// Zieht die Counter auf den Stand des Snapshots nach
    pub fn pakete_uebernehmen(&self, neu: &PaketStatistikSnapshot) {
        let mut letzte = self.letzte_pakete.lock().unwrap_or_else(|e| e.into_inner());
        let alt = *letzte;

        nachziehen(&self.pakete_empfangen_total, alt.empfangen, neu.empfangen);
        nachziehen(&self.pakete_angenommen_total, alt.angenommen, neu.angenommen);
        nachziehen(&self.puffer_ueberlauf_total, alt.ueberlaeufe, neu.ueberlaeufe);
        for (grund, vorher, jetzt) in [
            ("bot", alt.verworfen_bot, neu.verworfen_bot),
            ("ungueltig", alt.verworfen_ungueltig, neu.verworfen_ungueltig),
            ("unbekannter_kanal", alt.verworfen_unbekannt, neu.verworfen_unbekannt),
            ("leer", alt.verworfen_leer, neu.verworfen_leer),
            ("schonfrist", alt.verworfen_schonfrist, neu.verworfen_schonfrist),
            ("spricht", alt.verworfen_spricht, neu.verworfen_spricht),
            ("nicht_bereit", alt.verworfen_nicht_bereit, neu.verworfen_nicht_bereit),
        ] {
            nachziehen(
                &self.pakete_verworfen_total.with_label_values(&[grund]),
                vorher,
                jetzt,
            );
        }
        *letzte = *neu;
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn nachziehen(counter: &IntCounter, alt: u64, neu: u64) {
    if neu > alt {
        counter.inc_by(neu - alt);
    }
}

// ---------------------------------------------------------------------------
// Prozess-Ressourcen
// ---------------------------------------------------------------------------

/// Liest CPU und Speicher des eigenen Prozesses via sysinfo
pub struct ProzessMonitor {
    system: sysinfo::System,
    pid: Option<sysinfo::Pid>,
}

impl ProzessMonitor {
    pub fn neu() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(fehler = %e, "Prozess-ID nicht ermittelbar, keine Prozess-Metriken");
                None
            }
        };
        Self {
            system: sysinfo::System::new(),
            pid,
        }
    }

    /// Aktualisiert die System-Gauges
    ///
    /// Die CPU-Auslastung ist erst ab dem zweiten Aufruf aussagekraeftig.
    pub fn aktualisieren(&mut self, metriken: &VoxbotMetrics) {
        let Some(pid) = self.pid else {
            return;
        };
        self.system
            .refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
        if let Some(prozess) = self.system.process(pid) {
            metriken.cpu_usage_percent.set(f64::from(prozess.cpu_usage()));
            metriken.memory_usage_bytes.set(prozess.memory() as f64);
        }
    }
}

impl Default for ProzessMonitor {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: VoxbotMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<VoxbotMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
