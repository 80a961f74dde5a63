//! Event-Bus ueber tokio broadcast
//!
//! Langsame Abonnenten verlieren die aeltesten Ereignisse statt den Bot zu
//! bremsen; verpasste Ereignisse werden gezaehlt und geloggt.

use async_trait::async_trait;
use tokio::sync::broadcast;
use voxbot_core::event::{BotEvent, EventBus, EventEmpfaenger};

/// Standard-Kapazitaet der Broadcast-Queue
pub const EVENT_QUEUE_GROESSE: usize = 1024;

/// `EventBus`-Implementierung auf Basis von `tokio::sync::broadcast`
#[derive(Clone)]
pub struct BroadcastEventBus {
    tx: broadcast::Sender<BotEvent>,
}

impl BroadcastEventBus {
    pub fn neu(kapazitaet: usize) -> Self {
        let (tx, _) = broadcast::channel(kapazitaet.max(1));
        Self { tx }
    }

    pub fn abonnenten(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::neu(EVENT_QUEUE_GROESSE)
    }
}

impl EventBus for BroadcastEventBus {
    fn senden(&self, event: BotEvent) -> voxbot_core::Result<()> {
        // Ohne Abonnenten liefert broadcast einen Fehler; das ist kein Problem
        if self.tx.send(event).is_err() {
            tracing::trace!("Ereignis ohne Abonnenten verworfen");
        }
        Ok(())
    }

    fn abonnieren(&self) -> Box<dyn EventEmpfaenger + Send> {
        Box::new(BroadcastEmpfaenger {
            rx: self.tx.subscribe(),
        })
    }
}

struct BroadcastEmpfaenger {
    rx: broadcast::Receiver<BotEvent>,
}

#[async_trait]
impl EventEmpfaenger for BroadcastEmpfaenger {
    async fn empfangen(&mut self) -> Option<BotEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(verpasst)) => {
                    tracing::warn!(verpasst, "Event-Abonnent zu langsam, Ereignisse verpasst");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxbot_core::types::ChannelId;

    fn betreten(id: u64) -> BotEvent {
        BotEvent::KanalBetreten {
            kanal_id: ChannelId::neu(id),
        }
    }

    #[tokio::test]
    async fn alle_abonnenten_empfangen() {
        let bus = BroadcastEventBus::default();
        let mut a = bus.abonnieren();
        let mut b = bus.abonnieren();
        assert_eq!(bus.abonnenten(), 2);

        bus.senden(betreten(1)).unwrap();
        assert_eq!(a.empfangen().await, Some(betreten(1)));
        assert_eq!(b.empfangen().await, Some(betreten(1)));
    }

    #[test]
    fn senden_ohne_abonnenten_ist_ok() {
        let bus = BroadcastEventBus::default();
        assert!(bus.senden(betreten(1)).is_ok());
    }

    #[tokio::test]
    async fn langsamer_abonnent_ueberspringt_alte_ereignisse() {
        let bus = BroadcastEventBus::neu(2);
        let mut rx = bus.abonnieren();
        for id in 1..=5 {
            bus.senden(betreten(id)).unwrap();
        }
        // Nur die letzten zwei passen in die Queue
        assert_eq!(rx.empfangen().await, Some(betreten(4)));
        assert_eq!(rx.empfangen().await, Some(betreten(5)));
    }

    #[tokio::test]
    async fn geschlossener_bus_liefert_none() {
        let bus = BroadcastEventBus::default();
        let mut rx = bus.abonnieren();
        drop(bus);
        assert_eq!(rx.empfangen().await, None);
    }
}
