//! Relay-Protokoll (UDP)
//!
//! Definiert die binaere Paketstruktur zwischen voxbot und dem Voice-Relay.
//! Das Relay dekodiert Opus bereits und liefert PCM pro Sprecher; voxbot
//! sendet synthetisiertes PCM in 20-ms-Frames zurueck.
//!
//! ## Paketformat (Header = 24 Bytes, kein serde)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Version
//!  1       1   PacketType (siehe `PacketType`)
//!  2       2   Flags (big-endian)
//!  4       4   SequenzNummer (big-endian)
//!  8       8   Kanal-ID (big-endian)
//! 16       8   Sprecher-ID (big-endian)
//! 24+      N   Nutzdaten (PCM bei Audio, UTF-8-Name bei Teilnehmer)
//! ```

use std::io;
use voxbot_core::types::{ChannelId, SpeakerId};

/// Aktuelle Protokollversion
pub const PROTOKOLL_VERSION: u8 = 1;

/// Maximale Nutzdaten-Laenge: ein 20-ms-Frame 48 kHz Stereo PCM
pub const MAX_NUTZDATEN_LAENGE: usize = voxbot_core::types::audio_format::FRAME_BYTES;

// ---------------------------------------------------------------------------
// Flags (u16, big-endian)
// ---------------------------------------------------------------------------

/// Bit-Masken fuer das Flags-Feld im Relay-Paket-Header
pub struct RelayFlags;

impl RelayFlags {
    /// Absender ist ein Bot-Account
    pub const BOT: u16 = 0x0001;
    /// Beginn einer Sprechsequenz
    pub const SPEAKING_START: u16 = 0x0010;
    /// Ende einer Sprechsequenz
    pub const SPEAKING_STOP: u16 = 0x0020;
}

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// Art des Relay-Paketes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// PCM-Audio eines Sprechers (bzw. des Bots beim Abspielen)
    Audio = 0,
    /// Stille / DTX
    Stille = 1,
    /// Keepalive gegen Idle-Teardown
    Keepalive = 2,
    /// Bot tritt einem Kanal bei (Anfrage) bzw. Bestaetigung vom Relay
    Beitreten = 3,
    /// Bot verlaesst einen Kanal
    Verlassen = 4,
    /// Teilnehmer-Ankuendigung (Nutzdaten = Anzeigename)
    Teilnehmer = 5,
    /// Teilnehmer hat den Kanal verlassen
    TeilnehmerWeg = 6,
}

impl PacketType {
    /// Konvertiert ein Byte in einen `PacketType`.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Audio),
            1 => Some(Self::Stille),
            2 => Some(Self::Keepalive),
            3 => Some(Self::Beitreten),
            4 => Some(Self::Verlassen),
            5 => Some(Self::Teilnehmer),
            6 => Some(Self::TeilnehmerWeg),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RelayPacketHeader
// ---------------------------------------------------------------------------

/// 24-Byte Header eines Relay-UDP-Pakets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayPacketHeader {
    /// Protokollversion (muss == `PROTOKOLL_VERSION` sein)
    pub version: u8,
    pub packet_type: PacketType,
    /// Flags-Bitmask (siehe `RelayFlags`)
    pub flags: u16,
    /// Monoton steigende Sequenznummer pro Absender
    pub sequence: u32,
    pub kanal_id: ChannelId,
    pub sprecher_id: SpeakerId,
}

impl RelayPacketHeader {
    /// Header-Groesse in Bytes
    pub const SIZE: usize = 24;

    pub fn new(
        packet_type: PacketType,
        flags: u16,
        sequence: u32,
        kanal_id: ChannelId,
        sprecher_id: SpeakerId,
    ) -> Self {
        Self {
            version: PROTOKOLL_VERSION,
            packet_type,
            flags,
            sequence,
            kanal_id,
            sprecher_id,
        }
    }

    /// Serialisiert den Header (big-endian)
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.version;
        buf[1] = self.packet_type as u8;
        buf[2..4].copy_from_slice(&self.flags.to_be_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_be_bytes());
        buf[8..16].copy_from_slice(&self.kanal_id.inner().to_be_bytes());
        buf[16..24].copy_from_slice(&self.sprecher_id.inner().to_be_bytes());
        buf
    }

    /// Deserialisiert einen Header aus einem Byte-Slice
    ///
    /// # Fehler
    /// - `InvalidData` wenn das Slice kuerzer als 24 Bytes ist
    /// - `InvalidData` bei ungueltiger Version oder unbekanntem PacketType
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Header zu kurz: {} Bytes (erwartet {})",
                    buf.len(),
                    Self::SIZE
                ),
            ));
        }

        let version = buf[0];
        if version != PROTOKOLL_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Ungueltige Protokollversion: {} (erwartet {})",
                    version, PROTOKOLL_VERSION
                ),
            ));
        }

        let packet_type = PacketType::from_u8(buf[1]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unbekannter PacketType: {}", buf[1]),
            )
        })?;

        let flags = u16::from_be_bytes([buf[2], buf[3]]);
        let sequence = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let mut kanal = [0u8; 8];
        kanal.copy_from_slice(&buf[8..16]);
        let mut sprecher = [0u8; 8];
        sprecher.copy_from_slice(&buf[16..24]);

        Ok(Self {
            version,
            packet_type,
            flags,
            sequence,
            kanal_id: ChannelId::neu(u64::from_be_bytes(kanal)),
            sprecher_id: SpeakerId::neu(u64::from_be_bytes(sprecher)),
        })
    }

    /// Prueft ob ein bestimmtes Flag gesetzt ist
    pub fn hat_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

// ---------------------------------------------------------------------------
// RelayPacket
// ---------------------------------------------------------------------------

/// Vollstaendiges Relay-Paket (Header + Nutzdaten)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPacket {
    pub header: RelayPacketHeader,
    /// Nutzdaten (max. `MAX_NUTZDATEN_LAENGE` Bytes)
    pub payload: Vec<u8>,
}

impl RelayPacket {
    /// PCM-Frame eines Sprechers bzw. des Bots
    pub fn neu_audio(
        sequence: u32,
        kanal_id: ChannelId,
        sprecher_id: SpeakerId,
        payload: Vec<u8>,
    ) -> Self {
        Self::ohne_nutzdaten(PacketType::Audio, 0, sequence, kanal_id, sprecher_id)
            .mit_nutzdaten(payload)
    }

    /// Keepalive; traegt `SPEAKING_STOP`, damit das Relay den Bot nicht als
    /// sprechend markiert
    pub fn neu_keepalive(sequence: u32, kanal_id: ChannelId, sprecher_id: SpeakerId) -> Self {
        Self::ohne_nutzdaten(
            PacketType::Keepalive,
            RelayFlags::SPEAKING_STOP,
            sequence,
            kanal_id,
            sprecher_id,
        )
    }

    pub fn neu_beitreten(kanal_id: ChannelId, sprecher_id: SpeakerId) -> Self {
        Self::ohne_nutzdaten(PacketType::Beitreten, RelayFlags::BOT, 0, kanal_id, sprecher_id)
    }

    pub fn neu_verlassen(kanal_id: ChannelId, sprecher_id: SpeakerId) -> Self {
        Self::ohne_nutzdaten(PacketType::Verlassen, RelayFlags::BOT, 0, kanal_id, sprecher_id)
    }

    /// Teilnehmer-Ankuendigung mit Anzeigename
    pub fn neu_teilnehmer(
        kanal_id: ChannelId,
        sprecher_id: SpeakerId,
        name: &str,
        ist_bot: bool,
    ) -> Self {
        let flags = if ist_bot { RelayFlags::BOT } else { 0 };
        let mut name_bytes = name.as_bytes().to_vec();
        name_bytes.truncate(MAX_NUTZDATEN_LAENGE);
        Self::ohne_nutzdaten(PacketType::Teilnehmer, flags, 0, kanal_id, sprecher_id)
            .mit_nutzdaten(name_bytes)
    }

    pub fn neu_teilnehmer_weg(kanal_id: ChannelId, sprecher_id: SpeakerId) -> Self {
        Self::ohne_nutzdaten(PacketType::TeilnehmerWeg, 0, 0, kanal_id, sprecher_id)
    }

    fn ohne_nutzdaten(
        packet_type: PacketType,
        flags: u16,
        sequence: u32,
        kanal_id: ChannelId,
        sprecher_id: SpeakerId,
    ) -> Self {
        Self {
            header: RelayPacketHeader::new(packet_type, flags, sequence, kanal_id, sprecher_id),
            payload: Vec::new(),
        }
    }

    fn mit_nutzdaten(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Serialisiert das gesamte Paket in einen Byte-Vec
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RelayPacketHeader::SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Deserialisiert ein Paket aus einem Byte-Slice und validiert es
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        let header = RelayPacketHeader::decode(buf)?;
        let payload_bytes = &buf[RelayPacketHeader::SIZE..];

        if payload_bytes.len() > MAX_NUTZDATEN_LAENGE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nutzdaten zu lang: {} Bytes (Maximum {})",
                    payload_bytes.len(),
                    MAX_NUTZDATEN_LAENGE
                ),
            ));
        }

        Ok(Self {
            header,
            payload: payload_bytes.to_vec(),
        })
    }

    /// Gesamtgroesse des Paketes in Bytes
    pub fn groesse(&self) -> usize {
        RelayPacketHeader::SIZE + self.payload.len()
    }

    /// Stammt das Paket von einem Bot-Account?
    pub fn ist_bot(&self) -> bool {
        self.header.hat_flag(RelayFlags::BOT)
    }

    /// Anzeigename aus einer Teilnehmer-Ankuendigung (verlustbehaftet bei
    /// ungueltigem UTF-8)
    pub fn teilnehmer_name(&self) -> Option<String> {
        if self.header.packet_type != PacketType::Teilnehmer {
            return None;
        }
        Some(String::from_utf8_lossy(&self.payload).into_owned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
