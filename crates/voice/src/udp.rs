//! UDP-Transport zum Voice-Relay der Plattform
//!
//! Das Relay terminiert die Plattform-Verbindung und tauscht mit dem Bot
//! dekodiertes PCM in `RelayPacket`s aus.
//!
//! ## Architektur
//!
//! ```text
//! UDP Socket (recv_from)
//!     |
//!     v
//! RelayPacket::decode()          <- Validierung
//!     |
//!     +-- Beitreten   -> ausstehende Verbindung bestaetigen
//!     +-- Verlassen   -> TransportEreignis::Getrennt
//!     +-- Teilnehmer  -> Teilnehmerliste + TransportEreignis
//!     +-- Audio/Stille -> TransportEreignis::Paket
//!     |
//!     v
//! mpsc::Sender<TransportEreignis>  -> VoiceBot
//! ```
//!
//! Die Empfangs-Loop blockiert nie: Ereignisse werden mit `try_send`
//! eingereiht und bei voller Queue verworfen.

use crate::transport::{TransportEreignis, TransportHandle, VoiceTransport};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use voxbot_core::types::{audio_format, ChannelId, SpeakerId, Sprecher};
use voxbot_core::{Result, VoxbotError};
use voxbot_protocol::voice::{PacketType, RelayFlags, RelayPacket, RelayPacketHeader, MAX_NUTZDATEN_LAENGE};

/// Empfangspuffer: Header + ein voller PCM-Frame + Reserve
const UDP_BUFFER_SIZE: usize = RelayPacketHeader::SIZE + MAX_NUTZDATEN_LAENGE + 256;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den UDP-Transport
#[derive(Debug, Clone)]
pub struct UdpTransportConfig {
    /// Lokale Bind-Adresse (z.B. "0.0.0.0:0")
    pub bind_addr: SocketAddr,
    /// Adresse des Voice-Relays
    pub relay_addr: SocketAddr,
    /// Eigene Sprecher-ID des Bots
    pub bot_id: SpeakerId,
    /// Maximale Wartezeit auf die Beitritts-Bestaetigung
    pub verbindungs_timeout: Duration,
}

impl UdpTransportConfig {
    pub fn neu(bind_addr: SocketAddr, relay_addr: SocketAddr, bot_id: SpeakerId) -> Self {
        Self {
            bind_addr,
            relay_addr,
            bot_id,
            verbindungs_timeout: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// UdpTransport
// ---------------------------------------------------------------------------

struct Verbindung {
    handle: TransportHandle,
    sequenz: AtomicU32,
}

impl Verbindung {
    fn naechste_sequenz(&self) -> u32 {
        self.sequenz.fetch_add(1, Ordering::Relaxed)
    }
}

struct UdpInner {
    config: UdpTransportConfig,
    socket: UdpSocket,
    ereignisse: mpsc::Sender<TransportEreignis>,
    verbunden: DashMap<ChannelId, Arc<Verbindung>>,
    ausstehend: DashMap<ChannelId, oneshot::Sender<()>>,
    /// Serialisiert den Verbindungsaufbau pro Kanal
    sperren: DashMap<ChannelId, Arc<tokio::sync::Mutex<()>>>,
    teilnehmer: DashMap<(ChannelId, SpeakerId), Sprecher>,
    naechste_verbindung: AtomicU64,
}

/// `VoiceTransport` ueber ein UDP-Relay (Clone ist billig)
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpInner>,
}

impl UdpTransport {
    /// Bindet den UDP-Socket
    ///
    /// Die Empfangs-Loop muss separat mit `empfangs_loop_starten` laufen.
    pub async fn binden(
        config: UdpTransportConfig,
        ereignisse: mpsc::Sender<TransportEreignis>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr).await?;
        tracing::info!(
            addr = %socket.local_addr()?,
            relay = %config.relay_addr,
            bot_id = %config.bot_id,
            "UDP-Transport gebunden"
        );

        Ok(Self {
            inner: Arc::new(UdpInner {
                config,
                socket,
                ereignisse,
                verbunden: DashMap::new(),
                ausstehend: DashMap::new(),
                sperren: DashMap::new(),
                teilnehmer: DashMap::new(),
                naechste_verbindung: AtomicU64::new(1),
            }),
        })
    }

    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.inner.socket.local_addr()
    }

    /// Empfangs-Loop (laeuft bis `shutdown` ausgeloest wird)
    pub async fn empfangs_loop_starten(&self, shutdown: CancellationToken) {
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];

        tracing::info!("Relay-Empfangs-Loop gestartet");

        loop {
            tokio::select! {
                result = self.inner.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, absender)) => {
                            if absender != self.inner.config.relay_addr {
                                tracing::debug!(absender = %absender, "Paket von fremder Adresse ignoriert");
                                continue;
                            }
                            self.paket_verarbeiten(&buf[..len]);
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "UDP-Empfangsfehler");
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                    }
                }

                _ = shutdown.cancelled() => {
                    tracing::info!("Relay-Empfangs-Loop: Shutdown-Signal empfangen");
                    break;
                }
            }
        }

        tracing::info!("Relay-Empfangs-Loop beendet");
    }

    // -----------------------------------------------------------------------
    // Internes Paket-Processing
    // -----------------------------------------------------------------------

    fn paket_verarbeiten(&self, daten: &[u8]) {
        let paket = match RelayPacket::decode(daten) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(fehler = %e, bytes = daten.len(), "Ungueltiges Relay-Paket");
                return;
            }
        };
        let kanal = paket.header.kanal_id;
        let sprecher_id = paket.header.sprecher_id;

        match paket.header.packet_type {
            PacketType::Beitreten => {
                if sprecher_id == self.inner.config.bot_id {
                    if let Some((_, tx)) = self.inner.ausstehend.remove(&kanal) {
                        let _ = tx.send(());
                    }
                }
            }
            PacketType::Verlassen => {
                if sprecher_id == self.inner.config.bot_id
                    && self.inner.verbunden.remove(&kanal).is_some()
                {
                    self.teilnehmer_entfernen(kanal);
                    tracing::warn!(kanal = %kanal, "Relay hat den Bot getrennt");
                    self.ereignis_einreihen(TransportEreignis::Getrennt { kanal });
                }
            }
            PacketType::Teilnehmer => {
                let name = paket.teilnehmer_name().unwrap_or_default();
                let sprecher = Sprecher {
                    id: sprecher_id,
                    name,
                    ist_bot: paket.ist_bot(),
                };
                let neu = self
                    .inner
                    .teilnehmer
                    .insert((kanal, sprecher_id), sprecher.clone())
                    .is_none();
                if neu && sprecher_id != self.inner.config.bot_id {
                    self.ereignis_einreihen(TransportEreignis::TeilnehmerBeigetreten {
                        kanal,
                        sprecher,
                    });
                }
            }
            PacketType::TeilnehmerWeg => {
                if self.inner.teilnehmer.remove(&(kanal, sprecher_id)).is_some() {
                    self.ereignis_einreihen(TransportEreignis::TeilnehmerVerlassen {
                        kanal,
                        sprecher_id,
                    });
                }
            }
            PacketType::Audio | PacketType::Stille => {
                if !self.inner.verbunden.contains_key(&kanal) {
                    tracing::trace!(kanal = %kanal, "Audio fuer nicht verbundenen Kanal verworfen");
                    return;
                }
                if !sprecher_id.ist_gueltig() {
                    tracing::trace!(kanal = %kanal, "Audio ohne Absender verworfen");
                    return;
                }
                let sprecher = self.sprecher_aufloesen(kanal, sprecher_id, paket.ist_bot());
                let audio = if paket.header.packet_type == PacketType::Stille {
                    Bytes::new()
                } else {
                    Bytes::from(paket.payload)
                };
                self.ereignis_einreihen(TransportEreignis::Paket {
                    kanal,
                    sprecher,
                    audio,
                });
            }
            PacketType::Keepalive => {
                tracing::trace!(kanal = %kanal, "Keepalive vom Relay");
            }
        }
    }

    fn sprecher_aufloesen(&self, kanal: ChannelId, id: SpeakerId, bot_flag: bool) -> Sprecher {
        match self.inner.teilnehmer.get(&(kanal, id)) {
            Some(bekannt) => {
                let mut sprecher = bekannt.clone();
                sprecher.ist_bot |= bot_flag;
                sprecher
            }
            None => Sprecher {
                id,
                name: format!("Sprecher {}", id.inner()),
                ist_bot: bot_flag,
            },
        }
    }

    fn teilnehmer_entfernen(&self, kanal: ChannelId) {
        self.inner.teilnehmer.retain(|(k, _), _| *k != kanal);
    }

    fn ereignis_einreihen(&self, ereignis: TransportEreignis) {
        if let Err(e) = self.inner.ereignisse.try_send(ereignis) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!("Ereignis-Queue voll, Ereignis verworfen");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::debug!("Ereignis-Queue geschlossen");
                }
            }
        }
    }

    async fn senden(&self, paket: &RelayPacket) -> Result<()> {
        self.inner
            .socket
            .send_to(&paket.encode(), self.inner.config.relay_addr)
            .await
            .map_err(|e| VoxbotError::Transport(format!("UDP-Sendefehler: {e}")))?;
        Ok(())
    }

    fn aktive_verbindung(&self, handle: &TransportHandle) -> Result<Arc<Verbindung>> {
        match self.inner.verbunden.get(&handle.kanal) {
            Some(v) if v.handle == *handle => Ok(Arc::clone(v.value())),
            _ => Err(VoxbotError::KanalNichtVerbunden(handle.kanal.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceTransport
// ---------------------------------------------------------------------------

#[async_trait]
impl VoiceTransport for UdpTransport {
    async fn verbinden(&self, kanal: ChannelId) -> Result<TransportHandle> {
        if let Some(v) = self.inner.verbunden.get(&kanal) {
            return Ok(v.handle.clone());
        }

        let sperre = Arc::clone(self.inner.sperren.entry(kanal).or_default().value());
        let _guard = sperre.lock().await;

        if let Some(v) = self.inner.verbunden.get(&kanal) {
            return Ok(v.handle.clone());
        }

        let (tx, rx) = oneshot::channel();
        self.inner.ausstehend.insert(kanal, tx);

        if let Err(e) = self
            .senden(&RelayPacket::neu_beitreten(kanal, self.inner.config.bot_id))
            .await
        {
            self.inner.ausstehend.remove(&kanal);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.config.verbindungs_timeout, rx).await {
            Ok(Ok(())) => {
                let handle = TransportHandle {
                    kanal,
                    verbindung: self.inner.naechste_verbindung.fetch_add(1, Ordering::Relaxed),
                };
                self.inner.verbunden.insert(
                    kanal,
                    Arc::new(Verbindung {
                        handle: handle.clone(),
                        sequenz: AtomicU32::new(0),
                    }),
                );
                tracing::info!(kanal = %kanal, verbindung = handle.verbindung, "Relay-Verbindung hergestellt");
                Ok(handle)
            }
            Ok(Err(_)) => {
                self.inner.ausstehend.remove(&kanal);
                Err(VoxbotError::Verbindung(format!(
                    "Beitritts-Bestaetigung fuer {kanal} verworfen"
                )))
            }
            Err(_) => {
                self.inner.ausstehend.remove(&kanal);
                Err(VoxbotError::Zeitlimit(format!("Beitritt zu {kanal}")))
            }
        }
    }

    async fn trennen(&self, handle: &TransportHandle) -> Result<()> {
        let entfernt = self
            .inner
            .verbunden
            .remove_if(&handle.kanal, |_, v| v.handle == *handle)
            .is_some();
        if !entfernt {
            return Ok(());
        }
        self.teilnehmer_entfernen(handle.kanal);
        tracing::info!(kanal = %handle.kanal, verbindung = handle.verbindung, "Relay-Verbindung getrennt");
        self.senden(&RelayPacket::neu_verlassen(handle.kanal, self.inner.config.bot_id))
            .await
    }

    async fn abspielen(&self, handle: &TransportHandle, audio: Bytes) -> Result<()> {
        let verbindung = self.aktive_verbindung(handle)?;
        let frames: Vec<&[u8]> = audio.chunks(audio_format::FRAME_BYTES).collect();
        let letzter = frames.len().saturating_sub(1);

        let mut takt =
            tokio::time::interval(Duration::from_millis(audio_format::FRAME_DAUER_MS));

        for (i, frame) in frames.into_iter().enumerate() {
            takt.tick().await;
            if !self
                .inner
                .verbunden
                .get(&handle.kanal)
                .is_some_and(|v| v.handle == *handle)
            {
                return Err(VoxbotError::Getrennt(format!(
                    "{} waehrend der Wiedergabe getrennt",
                    handle.kanal
                )));
            }

            let mut paket = RelayPacket::neu_audio(
                verbindung.naechste_sequenz(),
                handle.kanal,
                self.inner.config.bot_id,
                frame.to_vec(),
            );
            paket.header.flags |= RelayFlags::BOT;
            if i == 0 {
                paket.header.flags |= RelayFlags::SPEAKING_START;
            }
            if i == letzter {
                paket.header.flags |= RelayFlags::SPEAKING_STOP;
            }
            self.senden(&paket).await?;
        }
        Ok(())
    }

    async fn keepalive(&self, handle: &TransportHandle) -> Result<()> {
        let verbindung = self.aktive_verbindung(handle)?;
        self.senden(&RelayPacket::neu_keepalive(
            verbindung.naechste_sequenz(),
            handle.kanal,
            self.inner.config.bot_id,
        ))
        .await
    }

    fn ist_verbunden(&self, kanal: ChannelId) -> bool {
        self.inner.verbunden.contains_key(&kanal)
    }

    fn menschliche_teilnehmer(&self, kanal: ChannelId) -> usize {
        self.inner
            .teilnehmer
            .iter()
            .filter(|e| e.key().0 == kanal && !e.value().ist_bot)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
