//! Event-Bus Trait-Definitionen
//!
//! Definiert die Schnittstelle fuer den internen Event-Bus. Die Voice-Engine
//! meldet darueber Aeusserungen, Antworten und Verbindungswechsel; der Server
//! leitet daraus Metriken ab. Die Implementierung erfolgt im Server-Crate
//! via tokio broadcast.

use crate::types::{ChannelId, SpeakerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Alle systemweiten Ereignisse die ueber den Event-Bus fliessen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BotEvent {
    // --- Kanal-Ereignisse ---
    /// Der Bot hat einen Voice-Kanal betreten
    KanalBetreten { kanal_id: ChannelId },
    /// Der Bot hat einen Voice-Kanal verlassen
    KanalVerlassen { kanal_id: ChannelId },

    // --- Segmentierung ---
    /// Puffer eines Sprechers war voll, aeltestes Paket verworfen
    PufferUeberlauf {
        kanal_id: ChannelId,
        sprecher_id: SpeakerId,
    },
    /// Eine Aeusserung wurde abgeschlossen und an die Pipeline uebergeben
    AeusserungErkannt {
        kanal_id: ChannelId,
        sprecher_id: SpeakerId,
        pakete: usize,
        bytes: usize,
    },
    /// Zu kurze Aeusserung (Rauschen) verworfen
    RauschenVerworfen {
        kanal_id: ChannelId,
        sprecher_id: SpeakerId,
        pakete: usize,
    },

    // --- Pipeline ---
    /// Transkription erfolgreich
    TranskriptErstellt {
        kanal_id: ChannelId,
        sprecher_id: SpeakerId,
        zeichen: usize,
    },
    /// Transkription leer oder fehlgeschlagen
    TranskriptionFehlgeschlagen {
        kanal_id: ChannelId,
        sprecher_id: SpeakerId,
    },
    /// Der Bot antwortet (angesprochen oder per Zufall)
    AntwortAusgeloest {
        kanal_id: ChannelId,
        angesprochen: bool,
    },
    /// Antwort-Generierung fehlgeschlagen
    GenerierungFehlgeschlagen { kanal_id: ChannelId },
    /// Wiedergabe beendet (erfolgreich, fehlgeschlagen oder unterbrochen)
    WiedergabeBeendet {
        kanal_id: ChannelId,
        erfolgreich: bool,
    },

    // --- Verbindung ---
    /// Keepalive an den Transport fehlgeschlagen
    KeepaliveFehlgeschlagen { kanal_id: ChannelId },
    /// Verbindung gilt als ungesund, Reconnect beginnt
    ReconnectGestartet { kanal_id: ChannelId },
    /// Reconnect erfolgreich
    ReconnectErfolgreich { kanal_id: ChannelId },
    /// Reconnect fehlgeschlagen – Kanal ist gestoert
    ReconnectFehlgeschlagen { kanal_id: ChannelId, grund: String },
}

/// Trait fuer den Event-Bus
pub trait EventBus: Send + Sync + 'static {
    /// Sendet ein Ereignis an alle Abonnenten
    fn senden(&self, event: BotEvent) -> crate::Result<()>;

    /// Abonniert alle zukuenftigen Ereignisse
    fn abonnieren(&self) -> Box<dyn EventEmpfaenger + Send>;
}

/// Empfaenger-Seite eines Event-Bus-Abonnements
#[async_trait]
pub trait EventEmpfaenger {
    /// Empfaengt das naechste Ereignis; `None` wenn der Bus geschlossen wurde
    async fn empfangen(&mut self) -> Option<BotEvent>;
}

/// Event-Bus ohne Abonnenten (verwirft alle Ereignisse)
#[derive(Debug, Default, Clone, Copy)]
pub struct KeinEventBus;

struct LeererEmpfaenger;

#[async_trait]
impl EventEmpfaenger for LeererEmpfaenger {
    async fn empfangen(&mut self) -> Option<BotEvent> {
        None
    }
}

impl EventBus for KeinEventBus {
    fn senden(&self, _event: BotEvent) -> crate::Result<()> {
        Ok(())
    }

    fn abonnieren(&self) -> Box<dyn EventEmpfaenger + Send> {
        Box::new(LeererEmpfaenger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ist_serde_kompatibel() {
        let event = BotEvent::AeusserungErkannt {
            kanal_id: ChannelId::neu(1),
            sprecher_id: SpeakerId::neu(2),
            pakete: 50,
            bytes: 192_000,
        };
        let json = serde_json::to_string(&event).unwrap();
        let zurueck: BotEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, zurueck);
    }

    #[tokio::test]
    async fn kein_event_bus_verwirft() {
        let bus = KeinEventBus;
        assert!(bus
            .senden(BotEvent::KanalBetreten {
                kanal_id: ChannelId::neu(1)
            })
            .is_ok());
        let mut rx = bus.abonnieren();
        assert!(rx.empfangen().await.is_none());
    }
}
