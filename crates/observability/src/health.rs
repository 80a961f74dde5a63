//! Health-Check-Endpunkt fuer voxbot
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Kanal-Details

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use voxbot_voice::{BotStatus, KanalStatus, PaketStatistikSnapshot};

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub gestartet: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub kanaele: Vec<KanalStatus>,
    pub pakete: PaketStatistikSnapshot,
}

/// Liefert den aktuellen Bot-Status
pub type StatusQuelle = Arc<dyn Fn() -> BotStatus + Send + Sync>;

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    gestartet: DateTime<Utc>,
    status: StatusQuelle,
}

impl HealthState {
    pub fn neu(status: StatusQuelle) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            gestartet: Utc::now(),
            status,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Baut die Antwort aus dem aktuellen Bot-Status
    pub fn antwort(&self) -> HealthResponse {
        let status = (self.status)();
        HealthResponse {
            status: if status.ist_gesund() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            gestartet: self.gestartet,
            uptime_seconds: self.uptime_seconds(),
            kanaele: status.kanaele,
            pakete: status.pakete,
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – 200 auch bei degraded (Probe soll nicht failen)
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.antwort()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxbot_voice::KanalZustand;

    fn quelle(zustand: KanalZustand) -> StatusQuelle {
        Arc::new(move || BotStatus {
            kanaele: vec![KanalStatus {
                kanal_id: 7,
                zustand,
                sekunden_seit_paket: 4,
                sprecher_puffer: 1,
                gepufferte_pakete: 12,
                teilnehmer: 3,
            }],
            pakete: PaketStatistikSnapshot::default(),
            reconnects_erfolgreich: 0,
            reconnects_fehlgeschlagen: 0,
        })
    }

    #[test]
    fn health_state_uptime_frisch() {
        let state = HealthState::neu(quelle(KanalZustand::Listening));
        assert!(state.uptime_seconds() < 5);
    }

    #[test]
    fn zuhoerender_kanal_ist_healthy() {
        let state = HealthState::neu(quelle(KanalZustand::Listening));
        let antwort = state.antwort();
        assert_eq!(antwort.status, HealthStatus::Healthy);
        assert_eq!(antwort.kanaele.len(), 1);
    }

    #[test]
    fn gestoerter_kanal_ist_degraded() {
        let state = HealthState::neu(quelle(KanalZustand::Gestoert));
        assert_eq!(state.antwort().status, HealthStatus::Degraded);
    }

    #[test]
    fn health_response_serialisierung() {
        let state = HealthState::neu(quelle(KanalZustand::Listening));
        let json = serde_json::to_string(&state.antwort()).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"kanal_id\":7"));
        assert!(json.contains("\"zustand\":\"Listening\""));
        assert!(json.contains("\"uptime_seconds\":"));
    }

    #[tokio::test]
    async fn endpunkt_liefert_json() {
        let app = health_router(HealthState::neu(quelle(KanalZustand::Gestoert)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut antwort = String::new();
        stream.read_to_string(&mut antwort).await.unwrap();
        assert!(antwort.starts_with("HTTP/1.1 200"));
        assert!(antwort.contains("\"status\":\"degraded\""));
    }
}
