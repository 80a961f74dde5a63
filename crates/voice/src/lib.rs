//! voxbot-voice – Voice-Engine des Bots
//!
//! Nimmt PCM-Pakete pro Sprecher an, segmentiert sie an Sprechpausen zu
//! Aeusserungen, laesst diese transkribieren und beantwortet sie ueber
//! Sprachsynthese im selben Kanal. Ein Monitor haelt die Verbindungen am
//! Leben und verbindet gestoerte Kanaele neu.
//!
//! ## Module
//! - [`bot`] – `VoiceBot`, verdrahtet alle Komponenten
//! - [`ingest`] – Paket-Annahme und Filterung
//! - [`buffer`] – Begrenzte Audio-Puffer pro (Kanal, Sprecher)
//! - [`segmenter`] – Aeusserungs-Erkennung per Stille-Timer
//! - [`pipeline`] – Transkription, Antwort-Gate, Generierung
//! - [`gating`] – Ansprache-Erkennung und Zufalls-Gate
//! - [`context`] – Gespraechskontext pro Kanal
//! - [`playback`] – Wiedergabe mit Sprech-Markierung
//! - [`health`] – Health-Check, Keepalive und Reconnect
//! - [`channel`] – Kanal-Sitzungen und Zustandsautomat
//! - [`transport`] – Schnittstelle zum Voice-Transport
//! - [`udp`] – UDP-Transport zum Voice-Relay

pub mod bot;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod context;
pub mod gating;
pub mod health;
pub mod ingest;
pub mod pipeline;
pub mod playback;
pub mod segmenter;
pub mod transport;
pub mod udp;

pub use bot::{Beitritt, BotStatus, Dienste, KanalStatus, VoiceBot};
pub use channel::KanalZustand;
pub use config::{AnspracheConfig, BegruessungConfig, VoiceConfig};
pub use health::{ReconnectErgebnis, VerbindungsMonitor};
pub use ingest::{Annahme, PaketStatistikSnapshot, VerwerfGrund};
pub use transport::{TransportEreignis, TransportHandle, VoiceTransport};
pub use udp::{UdpTransport, UdpTransportConfig};
