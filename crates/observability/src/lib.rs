//! # voxbot-observability
//!
//! Observability-Crate fuer voxbot:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`) mit Kanal-Status
//! - Structured Logging via tracing-subscriber

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{health_router, HealthResponse, HealthState, HealthStatus, StatusQuelle};
pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, ProzessMonitor, VoxbotMetrics};

use anyhow::Result;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

/// Startet den Observability-HTTP-Server (Metriken + Health)
///
/// Endpunkte:
/// - `GET /metrics` – Prometheus scrape format
/// - `GET /health`  – Health-Check JSON
///
/// Laeuft bis `shutdown` ausgeloest wird.
pub async fn observability_server_starten(
    bind_addr: SocketAddr,
    metriken: VoxbotMetrics,
    health: HealthState,
    shutdown: CancellationToken,
) -> Result<()> {
    use axum::Router;

    let app = Router::new()
        .merge(metrics_router(metriken))
        .merge(health_router(health));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Observability-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
