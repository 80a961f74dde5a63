//! Kanal-Register – Zustand aller verbundenen Voice-Kanaele
//!
//! Pro Kanal existiert genau eine `KanalSitzung` mit einer kleinen
//! Zustandsmaschine:
//!
//! ```text
//!            verbunden()                wiedergabe_beginnen()
//!   Idle ───────────────> Listening <───────────────────────> Speaking
//!    │                      │   ^        wiedergabe_beenden()     │
//!    │reconnect_beginnen()  │   │ verbunden()                     │
//!    │                      v   │                                 │
//!    │                   Reconnecting <───────────────────────────┘
//!    │                      │
//!    │                      └── reconnect_fehlgeschlagen() ──> Gestoert
//!    └── beitritt_fehlgeschlagen() ───────────────────────────> Gestoert
//! ```
//!
//! Nach `beenden()` nimmt die Sitzung keine Verbindung mehr an; ein danach
//! aufgebautes Handle muss der Aufrufer selbst trennen.
//!
//! Alle Uebergaenge sind Check-and-Set unter dem Zustands-Lock. Der
//! Paket-Empfang haengt Audio nur unter demselben Lock an
//! (`wenn_zuhoerend`), damit kein Paket durchrutscht waehrend die
//! Wiedergabe beginnt.

use crate::transport::TransportHandle;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voxbot_core::types::ChannelId;

/// Fortlaufende Wiedergabe-IDs (prozessweit eindeutig)
static NAECHSTE_WIEDERGABE: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// KanalZustand
// ---------------------------------------------------------------------------

/// Zustand eines Voice-Kanals aus Sicht des Bots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KanalZustand {
    /// Registriert, Transport noch nicht verbunden
    Idle,
    /// Verbunden, eingehendes Audio wird segmentiert
    Listening,
    /// Bot spielt eine Antwort ab (Wiedergabe-ID)
    Speaking { wiedergabe: u64 },
    /// Verbindung wird neu aufgebaut
    Reconnecting,
    /// Letzter Reconnect fehlgeschlagen
    Gestoert,
}

impl KanalZustand {
    pub fn spricht(&self) -> bool {
        matches!(self, Self::Speaking { .. })
    }
}

// ---------------------------------------------------------------------------
// Wiedergabe
// ---------------------------------------------------------------------------

/// Laufende Wiedergabe eines Kanals
#[derive(Debug, Clone)]
pub struct Wiedergabe {
    pub id: u64,
    /// Wird abgebrochen wenn eine neuere Wiedergabe startet oder der Kanal
    /// verlassen wird
    pub abbruch: CancellationToken,
}

// ---------------------------------------------------------------------------
// KanalSitzung
// ---------------------------------------------------------------------------

/// Zustand eines einzelnen Voice-Kanals
#[derive(Debug)]
pub struct KanalSitzung {
    kanal: ChannelId,
    zustand: Mutex<KanalZustand>,
    /// Nur unter dem Zustands-Lock geschrieben
    beendet: AtomicBool,
    handle: Mutex<Option<TransportHandle>>,
    letztes_paket: Mutex<Instant>,
    letzter_keepalive: Mutex<Instant>,
    letzter_reconnect: Mutex<Option<Instant>>,
    /// Bricht Finalisierungs-Timer und Wiedergabe des Kanals ab
    abbruch: Mutex<CancellationToken>,
    wiedergabe: Mutex<Option<Wiedergabe>>,
}

impl KanalSitzung {
    pub fn neu(kanal: ChannelId) -> Self {
        let jetzt = Instant::now();
        Self {
            kanal,
            zustand: Mutex::new(KanalZustand::Idle),
            beendet: AtomicBool::new(false),
            handle: Mutex::new(None),
            letztes_paket: Mutex::new(jetzt),
            letzter_keepalive: Mutex::new(jetzt),
            letzter_reconnect: Mutex::new(None),
            abbruch: Mutex::new(CancellationToken::new()),
            wiedergabe: Mutex::new(None),
        }
    }

    pub fn kanal(&self) -> ChannelId {
        self.kanal
    }

    pub fn zustand(&self) -> KanalZustand {
        *self.zustand.lock()
    }

    pub fn spricht(&self) -> bool {
        self.zustand.lock().spricht()
    }

    pub fn handle(&self) -> Option<TransportHandle> {
        self.handle.lock().clone()
    }

    /// Nimmt das Transport-Handle heraus (zum Trennen)
    pub fn handle_nehmen(&self) -> Option<TransportHandle> {
        self.handle.lock().take()
    }

    // -----------------------------------------------------------------------
    // Uebergaenge
    // -----------------------------------------------------------------------

    /// Transport verbunden: Zeitstempel zuruecksetzen und zuhoeren
    ///
    /// `nach_reconnect` startet zusaetzlich die Schonfrist fuer veraltete
    /// Pakete. Gibt `false` zurueck (und uebernimmt das Handle nicht) wenn
    /// die Sitzung bereits beendet wurde.
    #[must_use]
    pub fn verbunden(&self, handle: TransportHandle, nach_reconnect: bool) -> bool {
        let mut zustand = self.zustand.lock();
        if self.beendet.load(Ordering::Acquire) {
            return false;
        }
        let jetzt = Instant::now();
        *self.handle.lock() = Some(handle);
        *self.letztes_paket.lock() = jetzt;
        *self.letzter_keepalive.lock() = jetzt;
        if nach_reconnect {
            *self.letzter_reconnect.lock() = Some(jetzt);
        }
        *zustand = KanalZustand::Listening;
        true
    }

    /// Erster Verbindungsaufbau fehlgeschlagen
    ///
    /// Die Sitzung bleibt registriert, damit der Health-Monitor sie wie
    /// einen fehlgeschlagenen Reconnect erneut versucht.
    pub fn beitritt_fehlgeschlagen(&self) {
        let mut zustand = self.zustand.lock();
        if *zustand == KanalZustand::Idle && !self.beendet.load(Ordering::Acquire) {
            *zustand = KanalZustand::Gestoert;
        }
    }

    /// Fuehrt `f` nur aus wenn der Kanal zuhoert
    ///
    /// Der Zustands-Lock bleibt waehrend `f` gehalten, eine gleichzeitig
    /// beginnende Wiedergabe wartet also bis `f` fertig ist.
    pub fn wenn_zuhoerend<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let zustand = self.zustand.lock();
        if *zustand == KanalZustand::Listening {
            Some(f())
        } else {
            None
        }
    }

    /// Markiert den Kanal als sprechend (last-writer-wins)
    ///
    /// Eine laufende Wiedergabe wird abgebrochen. Gibt `None` zurueck wenn
    /// der Kanal gerade nicht verbunden ist.
    pub fn wiedergabe_beginnen(&self) -> Option<Wiedergabe> {
        let mut zustand = self.zustand.lock();
        match *zustand {
            KanalZustand::Listening | KanalZustand::Speaking { .. } => {}
            _ => return None,
        }

        let mut aktiv = self.wiedergabe.lock();
        if let Some(alt) = aktiv.take() {
            alt.abbruch.cancel();
        }

        let wiedergabe = Wiedergabe {
            id: NAECHSTE_WIEDERGABE.fetch_add(1, Ordering::Relaxed),
            abbruch: self.abbruch.lock().child_token(),
        };
        *aktiv = Some(wiedergabe.clone());
        *zustand = KanalZustand::Speaking {
            wiedergabe: wiedergabe.id,
        };
        Some(wiedergabe)
    }

    /// Hebt die Sprech-Markierung auf, falls sie noch zu `id` gehoert
    ///
    /// Gibt `true` zurueck wenn der Kanal dadurch wieder zuhoert.
    pub fn wiedergabe_beenden(&self, id: u64) -> bool {
        let mut zustand = self.zustand.lock();
        let mut aktiv = self.wiedergabe.lock();
        if aktiv.as_ref().is_some_and(|w| w.id == id) {
            *aktiv = None;
        }
        if *zustand == (KanalZustand::Speaking { wiedergabe: id }) {
            *zustand = KanalZustand::Listening;
            true
        } else {
            false
        }
    }

    /// Check-and-Set auf `Reconnecting`
    ///
    /// Gibt `false` zurueck wenn bereits ein Reconnect laeuft oder der Kanal
    /// noch nie verbunden war.
    pub fn reconnect_beginnen(&self) -> bool {
        let mut zustand = self.zustand.lock();
        match *zustand {
            KanalZustand::Listening | KanalZustand::Speaking { .. } | KanalZustand::Gestoert => {
                *zustand = KanalZustand::Reconnecting;
                self.wiedergabe_verwerfen();
                true
            }
            KanalZustand::Idle | KanalZustand::Reconnecting => false,
        }
    }

    /// Reconnect fehlgeschlagen
    pub fn reconnect_fehlgeschlagen(&self) {
        let mut zustand = self.zustand.lock();
        if *zustand == KanalZustand::Reconnecting {
            *zustand = KanalZustand::Gestoert;
        }
    }

    /// Kanal wird verlassen: alles abbrechen, zurueck auf Idle
    ///
    /// Endgueltig; spaetere `verbunden`-Aufrufe werden abgelehnt.
    pub fn beenden(&self) {
        let mut zustand = self.zustand.lock();
        self.beendet.store(true, Ordering::Release);
        *zustand = KanalZustand::Idle;
        self.wiedergabe_verwerfen();
        drop(zustand);
        self.abbrechen();
    }

    fn wiedergabe_verwerfen(&self) {
        if let Some(alt) = self.wiedergabe.lock().take() {
            alt.abbruch.cancel();
        }
    }

    // -----------------------------------------------------------------------
    // Abbruch
    // -----------------------------------------------------------------------

    /// Token fuer Aufgaben die an die aktuelle Verbindung gebunden sind
    pub fn abbruch_token(&self) -> CancellationToken {
        self.abbruch.lock().clone()
    }

    /// Bricht alle an den Kanal gebundenen Aufgaben ab und setzt ein neues
    /// Token fuer nachfolgende Aufgaben ein
    pub fn abbrechen(&self) {
        let alt = std::mem::replace(&mut *self.abbruch.lock(), CancellationToken::new());
        alt.cancel();
    }

    // -----------------------------------------------------------------------
    // Zeitstempel
    // -----------------------------------------------------------------------

    /// Ein echtes Paket (oder das Ende einer Wiedergabe) wurde gesehen
    pub fn paket_gesehen(&self) {
        *self.letztes_paket.lock() = Instant::now();
    }

    pub fn seit_letztem_paket(&self) -> Duration {
        self.letztes_paket.lock().elapsed()
    }

    /// Liegt der letzte Reconnect weniger als `schonfrist` zurueck?
    pub fn in_schonfrist(&self, schonfrist: Duration) -> bool {
        self.letzter_reconnect
            .lock()
            .is_some_and(|zeitpunkt| zeitpunkt.elapsed() < schonfrist)
    }

    pub fn keepalive_faellig(&self, intervall: Duration) -> bool {
        self.letzter_keepalive.lock().elapsed() >= intervall
    }

    pub fn keepalive_gesendet(&self) {
        *self.letzter_keepalive.lock() = Instant::now();
    }
}

// ---------------------------------------------------------------------------
// KanalRegister
// ---------------------------------------------------------------------------

/// Ergebnis von `KanalRegister::reservieren`
pub enum Reservierung {
    /// Neu angelegt; der Aufrufer baut die Verbindung auf
    Neu(Arc<KanalSitzung>),
    /// Bereits vorhanden (verbunden oder im Aufbau)
    Vorhanden(Arc<KanalSitzung>),
}

/// Thread-sicheres Register aller Kanal-Sitzungen
#[derive(Clone, Default)]
pub struct KanalRegister {
    inner: Arc<DashMap<ChannelId, Arc<KanalSitzung>>>,
}

impl KanalRegister {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Legt eine Sitzung an, falls noch keine existiert (atomar)
    pub fn reservieren(&self, kanal: ChannelId) -> Reservierung {
        match self.inner.entry(kanal) {
            dashmap::mapref::entry::Entry::Occupied(e) => {
                Reservierung::Vorhanden(Arc::clone(e.get()))
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let sitzung = Arc::new(KanalSitzung::neu(kanal));
                e.insert(Arc::clone(&sitzung));
                Reservierung::Neu(sitzung)
            }
        }
    }

    pub fn holen(&self, kanal: &ChannelId) -> Option<Arc<KanalSitzung>> {
        self.inner.get(kanal).map(|e| Arc::clone(e.value()))
    }

    pub fn entfernen(&self, kanal: &ChannelId) -> Option<Arc<KanalSitzung>> {
        self.inner.remove(kanal).map(|(_, s)| s)
    }

    /// Ist genau diese Sitzung noch registriert?
    pub fn ist_aktuell(&self, sitzung: &Arc<KanalSitzung>) -> bool {
        self.inner
            .get(&sitzung.kanal())
            .is_some_and(|s| Arc::ptr_eq(s.value(), sitzung))
    }

    /// Momentaufnahme aller Sitzungen
    pub fn alle(&self) -> Vec<Arc<KanalSitzung>> {
        self.inner.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn anzahl(&self) -> usize {
        self.inner.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
