//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `VB_LOG_LEVEL`: Log-Level oder EnvFilter-Direktive, Standard: info
//! - `VB_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Ein einfacher Level gilt nur fuer die voxbot-Crates; HTTP-Client,
//! Runtime und andere Abhaengigkeiten bleiben auf `warn`. Alle Ereignisse
//! laufen innerhalb von [`dienst_span`], im JSON-Format erscheinen dessen
//! Felder (Bot-Name, Version) an jeder Zeile.

use tracing::Span;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates deren Level der Konfigurations-Level steuert
pub const VOXBOT_CRATES: &[&str] = &[
    "voxbot_server",
    "voxbot_voice",
    "voxbot_services",
    "voxbot_observability",
    "voxbot_protocol",
    "voxbot_core",
];

/// Initialisiert das Logging-System.
///
/// `VB_LOG_LEVEL` und `VB_LOG_FORMAT` haben Vorrang vor den uebergebenen
/// Werten. Ungueltige Filter fallen auf `info` zurueck.
pub fn logging_initialisieren(level: &str, format: &str) {
    let level = std::env::var("VB_LOG_LEVEL").unwrap_or_else(|_| level.to_string());
    let filter = EnvFilter::try_new(filter_direktive(&level))
        .unwrap_or_else(|_| EnvFilter::new(filter_direktive("info")));

    let format = std::env::var("VB_LOG_FORMAT").unwrap_or_else(|_| format.to_string());

    match format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }

    if !log_format_gueltig(&format) {
        tracing::warn!(format = %format, "Unbekanntes Log-Format, verwende text");
    }
}

/// Uebersetzt den konfigurierten Level in eine EnvFilter-Direktive
///
/// `"debug"` wird zu `"warn,voxbot_server=debug,..."`. Eine vollstaendige
/// Direktive (mit `=` oder `,`) wird unveraendert uebernommen.
pub fn filter_direktive(level: &str) -> String {
    let level = level.trim();
    if !log_level_gueltig(level) {
        return level.to_string();
    }
    let basis = if level == "error" { "error" } else { "warn" };
    let mut direktive = basis.to_string();
    for krate in VOXBOT_CRATES {
        direktive.push_str(&format!(",{krate}={level}"));
    }
    direktive
}

/// Wurzel-Span des Prozesses
pub fn dienst_span(bot: &str) -> Span {
    tracing::info_span!(
        "voxbot",
        bot = %bot,
        version = env!("CARGO_PKG_VERSION"),
    )
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
