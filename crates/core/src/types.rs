//! Gemeinsame Identifikationstypen fuer voxbot
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Kanal- und Sprecher-IDs zur Compilezeit auszuschliessen. Die Werte sind
//! die numerischen Snowflakes der Chat-Plattform.

use serde::{Deserialize, Serialize};

/// Eindeutige Kanal-ID (Voice-Kanal der Plattform)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl ChannelId {
    /// Erstellt eine ChannelId aus dem Plattform-Snowflake
    pub fn neu(id: u64) -> Self {
        Self(id)
    }

    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel:{}", self.0)
    }
}

/// Eindeutige Sprecher-ID (Teilnehmer im Voice-Kanal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpeakerId(pub u64);

impl SpeakerId {
    /// Erstellt eine SpeakerId aus dem Plattform-Snowflake
    pub fn neu(id: u64) -> Self {
        Self(id)
    }

    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u64 {
        self.0
    }

    /// Relays senden gelegentlich Pakete ohne Absender (ID 0)
    pub fn ist_gueltig(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "speaker:{}", self.0)
    }
}

/// Teilnehmer eines Voice-Kanals mit Anzeigename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sprecher {
    pub id: SpeakerId,
    /// Anzeigename (wird in Kontext und Antwort-Anfragen verwendet)
    pub name: String,
    /// Bots (inkl. voxbot selbst) werden nie transkribiert
    pub ist_bot: bool,
}

impl Sprecher {
    pub fn neu(id: SpeakerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ist_bot: false,
        }
    }

    pub fn bot(id: SpeakerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ist_bot: true,
        }
    }
}

/// PCM-Format aller Audio-Bloecke im System
///
/// Die Plattform liefert dekodiertes 48 kHz / 16 Bit / Stereo PCM
/// (little-endian, interleaved). Synthetisierte Antworten muessen im
/// selben Format vorliegen.
pub mod audio_format {
    /// Abtastrate in Hz
    pub const ABTASTRATE: u32 = 48_000;
    /// Kanalanzahl (interleaved)
    pub const KANAELE: u16 = 2;
    /// Bits pro Sample
    pub const BITS_PRO_SAMPLE: u16 = 16;
    /// Bytes pro Sekunde Audio
    pub const BYTES_PRO_SEKUNDE: usize =
        ABTASTRATE as usize * KANAELE as usize * (BITS_PRO_SAMPLE as usize / 8);
    /// Dauer eines Transport-Frames in Millisekunden
    pub const FRAME_DAUER_MS: u64 = 20;
    /// Bytes pro 20-ms-Frame (3840)
    pub const FRAME_BYTES: usize = BYTES_PRO_SEKUNDE / 1000 * FRAME_DAUER_MS as usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_display() {
        let id = ChannelId::neu(1234);
        assert_eq!(id.to_string(), "channel:1234");
        assert_eq!(id.inner(), 1234);
    }

    #[test]
    fn speaker_id_null_ist_ungueltig() {
        assert!(!SpeakerId::neu(0).ist_gueltig());
        assert!(SpeakerId::neu(42).ist_gueltig());
    }

    #[test]
    fn ids_sind_serde_kompatibel() {
        let id = SpeakerId::neu(987654321);
        let json = serde_json::to_string(&id).unwrap();
        let id2: SpeakerId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn frame_groesse_20ms_stereo() {
        assert_eq!(audio_format::BYTES_PRO_SEKUNDE, 192_000);
        assert_eq!(audio_format::FRAME_BYTES, 3840);
    }

    #[test]
    fn sprecher_konstruktoren() {
        let mensch = Sprecher::neu(SpeakerId::neu(1), "Ana");
        let bot = Sprecher::bot(SpeakerId::neu(2), "voxbot");
        assert!(!mensch.ist_bot);
        assert!(bot.ist_bot);
    }
}
