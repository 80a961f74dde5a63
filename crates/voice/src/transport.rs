//! Schnittstelle zum Voice-Transport der Plattform
//!
//! Der Transport liefert dekodiertes PCM pro Sprecher und nimmt PCM zur
//! Wiedergabe entgegen. Eingehende Pakete und Teilnehmerwechsel werden als
//! `TransportEreignis` ueber eine mpsc-Queue an den `VoiceBot` gemeldet.

use async_trait::async_trait;
use bytes::Bytes;
use voxbot_core::types::{ChannelId, SpeakerId, Sprecher};
use voxbot_core::Result;

/// Handle einer aktiven Transport-Verbindung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHandle {
    pub kanal: ChannelId,
    /// Laufende Nummer der Verbindung (aendert sich bei jedem Reconnect)
    pub verbindung: u64,
}

/// Ereignisse die der Transport an den Bot meldet
#[derive(Debug, Clone)]
pub enum TransportEreignis {
    /// Audio eines Teilnehmers; leere Nutzdaten signalisieren Stille/DTX
    Paket {
        kanal: ChannelId,
        sprecher: Sprecher,
        audio: Bytes,
    },
    TeilnehmerBeigetreten {
        kanal: ChannelId,
        sprecher: Sprecher,
    },
    TeilnehmerVerlassen {
        kanal: ChannelId,
        sprecher_id: SpeakerId,
    },
    /// Die Gegenstelle hat die Verbindung beendet
    Getrennt { kanal: ChannelId },
}

/// Voice-Transport der Plattform
#[async_trait]
pub trait VoiceTransport: Send + Sync + 'static {
    /// Verbindet mit einem Voice-Kanal
    ///
    /// Ist der Kanal bereits verbunden, wird das bestehende Handle
    /// zurueckgegeben.
    async fn verbinden(&self, kanal: ChannelId) -> Result<TransportHandle>;

    /// Trennt die Verbindung (best effort)
    async fn trennen(&self, handle: &TransportHandle) -> Result<()>;

    /// Spielt PCM (48 kHz / 16 Bit / Stereo) ab und wartet bis zum Ende
    async fn abspielen(&self, handle: &TransportHandle, audio: Bytes) -> Result<()>;

    /// Leichtgewichtiges Lebenszeichen gegen Idle-Teardown
    async fn keepalive(&self, handle: &TransportHandle) -> Result<()>;

    fn ist_verbunden(&self, kanal: ChannelId) -> bool;

    /// Anzahl der Teilnehmer im Kanal, die keine Bots sind
    fn menschliche_teilnehmer(&self, kanal: ChannelId) -> usize;
}
