//! voxbot-core – Gemeinsame Typen, Traits und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen voxbot-Crates gemeinsam genutzt werden: IDs, Audio-Format,
//! Fehler-Enum, Bot-Ereignisse und die Schnittstellen zu den externen
//! Diensten (Transkription, Antwort-Generierung, Sprachsynthese).

pub mod dienste;
pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use dienste::{AntwortAnfrage, AntwortGenerator, Synthesizer, Transkriptor};
pub use error::{Result, VoxbotError};
pub use event::{BotEvent, EventBus, EventEmpfaenger, KeinEventBus};
pub use types::{ChannelId, SpeakerId, Sprecher};
