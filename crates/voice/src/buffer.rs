//! Sprecher-Puffer – begrenzter Audio-Puffer pro (Kanal, Sprecher)
//!
//! Jeder Sprecher bekommt beim ersten Paket einen eigenen Puffer. Ist der
//! Puffer voll, wird das aelteste Paket verworfen (FIFO). Jedes Anhaengen
//! vergibt einen neuen Aktivitaets-Stempel, an dem der Segmenter erkennt ob
//! seit der Planung einer Pruefung neues Audio eingetroffen ist.
//!
//! Gesperrt wird pro Eintrag (DashMap-Shard), nicht global: Sprecher in
//! verschiedenen Kanaelen behindern sich nicht.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use voxbot_core::types::{ChannelId, SpeakerId};

/// Schluessel eines Sprecher-Puffers
pub type PufferSchluessel = (ChannelId, SpeakerId);

// ---------------------------------------------------------------------------
// SprecherPuffer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SprecherPuffer {
    pakete: VecDeque<Bytes>,
    stempel: u64,
    letzte_aktivitaet: Instant,
    sprecher_name: String,
    erfasst_von: DateTime<Utc>,
    erfasst_bis: DateTime<Utc>,
}

/// Ergebnis eines `anhaengen`-Aufrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anhaengen {
    /// Neuer Aktivitaets-Stempel
    pub stempel: u64,
    /// Paketanzahl nach dem Anhaengen
    pub laenge: usize,
    /// Ein aelteres Paket wurde verdraengt
    pub ueberlauf: bool,
}

/// Entnommener Pufferinhalt
#[derive(Debug, Default)]
pub struct Entnahme {
    /// Pakete in Ankunftsreihenfolge
    pub pakete: Vec<Bytes>,
    pub sprecher_name: Option<String>,
    pub erfasst_von: Option<DateTime<Utc>>,
    pub erfasst_bis: Option<DateTime<Utc>>,
}

impl Entnahme {
    pub fn ist_leer(&self) -> bool {
        self.pakete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pakete.len()
    }

    fn aus_puffer(puffer: SprecherPuffer) -> Self {
        Self {
            pakete: puffer.pakete.into(),
            sprecher_name: Some(puffer.sprecher_name),
            erfasst_von: Some(puffer.erfasst_von),
            erfasst_bis: Some(puffer.erfasst_bis),
        }
    }
}

// ---------------------------------------------------------------------------
// SpeakerBufferManager
// ---------------------------------------------------------------------------

/// Verwaltet alle Sprecher-Puffer
///
/// Clone ist billig (Arc intern).
#[derive(Clone)]
pub struct SpeakerBufferManager {
    inner: Arc<PufferInner>,
}

struct PufferInner {
    puffer: DashMap<PufferSchluessel, SprecherPuffer>,
    max_pakete: usize,
    stempel: AtomicU64,
}

impl SpeakerBufferManager {
    /// Erstellt einen Manager mit `max_pakete` Paketen pro Sprecher
    pub fn neu(max_pakete: usize) -> Self {
        Self {
            inner: Arc::new(PufferInner {
                puffer: DashMap::new(),
                max_pakete: max_pakete.max(1),
                stempel: AtomicU64::new(0),
            }),
        }
    }

    /// Haengt ein Paket an den Puffer des Sprechers an
    ///
    /// Ist der Puffer voll, wird zuerst das aelteste Paket verworfen.
    pub fn anhaengen(
        &self,
        kanal: ChannelId,
        sprecher: SpeakerId,
        sprecher_name: &str,
        paket: Bytes,
    ) -> Anhaengen {
        let stempel = self.inner.stempel.fetch_add(1, Ordering::Relaxed) + 1;
        let jetzt = Utc::now();

        let mut eintrag = self
            .inner
            .puffer
            .entry((kanal, sprecher))
            .or_insert_with(|| SprecherPuffer {
                pakete: VecDeque::with_capacity(64),
                stempel,
                letzte_aktivitaet: Instant::now(),
                sprecher_name: sprecher_name.to_string(),
                erfasst_von: jetzt,
                erfasst_bis: jetzt,
            });

        let mut ueberlauf = false;
        if eintrag.pakete.len() >= self.inner.max_pakete {
            eintrag.pakete.pop_front();
            ueberlauf = true;
        }
        eintrag.pakete.push_back(paket);
        eintrag.stempel = stempel;
        eintrag.letzte_aktivitaet = Instant::now();
        eintrag.erfasst_bis = jetzt;
        if eintrag.sprecher_name != sprecher_name {
            eintrag.sprecher_name = sprecher_name.to_string();
        }
        let laenge = eintrag.pakete.len();
        drop(eintrag);

        if ueberlauf {
            tracing::warn!(
                kanal = %kanal,
                sprecher = %sprecher,
                max = self.inner.max_pakete,
                "Sprecher-Puffer voll – aeltestes Paket verworfen"
            );
        }

        Anhaengen {
            stempel,
            laenge,
            ueberlauf,
        }
    }

    /// Entnimmt den gesamten Puffer (leer wenn keiner existiert)
    pub fn entnehmen(&self, kanal: ChannelId, sprecher: SpeakerId) -> Entnahme {
        self.inner
            .puffer
            .remove(&(kanal, sprecher))
            .map(|(_, p)| Entnahme::aus_puffer(p))
            .unwrap_or_default()
    }

    /// Entnimmt den Puffer nur wenn seit `stempel` nichts angehaengt wurde
    ///
    /// `None` wenn neuere Aktivitaet vorliegt oder kein Puffer existiert.
    pub fn entnehmen_wenn_unveraendert(
        &self,
        kanal: ChannelId,
        sprecher: SpeakerId,
        stempel: u64,
    ) -> Option<Entnahme> {
        self.inner
            .puffer
            .remove_if(&(kanal, sprecher), |_, p| p.stempel == stempel)
            .map(|(_, p)| Entnahme::aus_puffer(p))
    }

    /// Aktivitaets-Stempel und Zeitpunkt des letzten Anhaengens
    pub fn aktivitaet(&self, kanal: ChannelId, sprecher: SpeakerId) -> Option<(u64, Instant)> {
        self.inner
            .puffer
            .get(&(kanal, sprecher))
            .map(|p| (p.stempel, p.letzte_aktivitaet))
    }

    pub fn laenge(&self, kanal: ChannelId, sprecher: SpeakerId) -> usize {
        self.inner
            .puffer
            .get(&(kanal, sprecher))
            .map(|p| p.pakete.len())
            .unwrap_or(0)
    }

    /// Verwirft alle Puffer eines Kanals, gibt die Anzahl zurueck
    pub fn kanal_leeren(&self, kanal: ChannelId) -> usize {
        let vorher = self.inner.puffer.len();
        self.inner.puffer.retain(|(k, _), _| *k != kanal);
        vorher.saturating_sub(self.inner.puffer.len())
    }

    /// Verwirft Puffer ohne Aktivitaet seit `max_alter`
    pub fn aufraeumen(&self, max_alter: Duration) -> usize {
        let vorher = self.inner.puffer.len();
        self.inner
            .puffer
            .retain(|_, p| p.letzte_aktivitaet.elapsed() <= max_alter);
        vorher.saturating_sub(self.inner.puffer.len())
    }

    /// (Anzahl Puffer, Anzahl Pakete) eines Kanals
    pub fn kanal_statistik(&self, kanal: ChannelId) -> (usize, usize) {
        self.inner
            .puffer
            .iter()
            .filter(|e| e.key().0 == kanal)
            .fold((0, 0), |(puffer, pakete), e| (puffer + 1, pakete + e.pakete.len()))
    }

    pub fn anzahl(&self) -> usize {
        self.inner.puffer.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
