//! Schnittstellen zu den externen Diensten
//!
//! Transkription, Antwort-Generierung und Sprachsynthese sind externe
//! Kollaborateure. Die Voice-Engine kennt nur diese Traits; konkrete
//! HTTP-Clients liegen in `voxbot-services`, Tests verwenden Attrappen.

use crate::types::{ChannelId, SpeakerId};
use async_trait::async_trait;
use bytes::Bytes;

/// Speech-to-Text
///
/// Bewusst synchron: die Voice-Engine ruft `transkribieren` im
/// Blocking-Pool von tokio auf, damit CPU-lastige Modelle oder blockierende
/// HTTP-Clients den Paket-Empfang anderer Sprecher nicht aufhalten.
pub trait Transkriptor: Send + Sync + 'static {
    /// Transkribiert einen PCM-Block (48 kHz / 16 Bit / Stereo).
    ///
    /// Gibt `VoxbotError::NichtsErkannt` zurueck wenn keine Sprache
    /// verstanden wurde.
    fn transkribieren(&self, audio: &[u8]) -> crate::Result<String>;
}

/// Anfrage an den Antwort-Generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntwortAnfrage {
    /// Transkribierter Text der Aeusserung
    pub text: String,
    /// Anzeigename des Sprechers
    pub sprecher_name: String,
    pub sprecher_id: SpeakerId,
    pub kanal_id: ChannelId,
    /// Gerenderte Gespraechszusammenfassung (`name: text`-Zeilen)
    pub kontext: Option<String>,
}

/// Generiert eine Antwort auf eine Aeusserung
#[async_trait]
pub trait AntwortGenerator: Send + Sync + 'static {
    async fn generieren(&self, anfrage: &AntwortAnfrage) -> crate::Result<String>;
}

/// Text-to-Speech
#[async_trait]
pub trait Synthesizer: Send + Sync + 'static {
    /// Synthetisiert Text zu abspielbarem PCM (48 kHz / 16 Bit / Stereo)
    async fn synthetisieren(&self, text: &str) -> crate::Result<Bytes>;
}

