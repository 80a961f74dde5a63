//! voxbot – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Bot.

use anyhow::Result;
use tracing::Instrument;
use voxbot_observability::logging::dienst_span;
use voxbot_observability::logging_initialisieren;
use voxbot_server::{config::ServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("VOXBOT_CONFIG").unwrap_or_else(|_| "config.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = ServerConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "voxbot wird initialisiert"
    );

    let span = dienst_span(&config.bot.name);
    Server::neu(config).starten().instrument(span).await?;

    Ok(())
}
