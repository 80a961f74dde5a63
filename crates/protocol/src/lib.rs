//! voxbot-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert das binaere Paketformat, das zwischen voxbot und
//! dem Voice-Relay der Plattform per UDP ausgetauscht wird.

pub mod voice;

pub use voice::{PacketType, RelayFlags, RelayPacket, RelayPacketHeader};
