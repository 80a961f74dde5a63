//! Gespraechs-Kontext pro Kanal
//!
//! Begrenzt nach Anzahl und Alter; beides wird beim Einfuegen durchgesetzt.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use voxbot_core::types::ChannelId;

/// Ein erinnerter Gespraechsbeitrag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KontextEintrag {
    pub sprecher: String,
    pub text: String,
    pub zeitpunkt: Instant,
}

#[derive(Debug)]
struct KanalKontext {
    eintraege: VecDeque<KontextEintrag>,
    /// Juengster je eingefuegte Zeitpunkt (Bezug fuer das Alter)
    juengster: Instant,
}

/// Kontext-Speicher aller Kanaele
#[derive(Clone)]
pub struct KontextSpeicher {
    inner: Arc<KontextInner>,
}

struct KontextInner {
    eintraege: DashMap<ChannelId, KanalKontext>,
    max_eintraege: usize,
    max_alter: Duration,
}

impl KontextSpeicher {
    pub fn neu(max_eintraege: usize, max_alter: Duration) -> Self {
        Self {
            inner: Arc::new(KontextInner {
                eintraege: DashMap::new(),
                max_eintraege: max_eintraege.max(1),
                max_alter,
            }),
        }
    }

    pub fn anhaengen(&self, kanal: ChannelId, sprecher: &str, text: &str) {
        self.anhaengen_mit_zeit(kanal, sprecher, text, Instant::now());
    }

    /// Fuegt einen Eintrag mit explizitem Zeitpunkt ein
    ///
    /// Bezugspunkt fuer das Alter ist der juengste je gesehene Zeitpunkt des
    /// Kanals, damit auch nachgereichte Eintraege die Grenzen einhalten.
    pub fn anhaengen_mit_zeit(
        &self,
        kanal: ChannelId,
        sprecher: &str,
        text: &str,
        zeitpunkt: Instant,
    ) {
        let mut kontext = self
            .inner
            .eintraege
            .entry(kanal)
            .or_insert_with(|| KanalKontext {
                eintraege: VecDeque::with_capacity(self.inner.max_eintraege + 1),
                juengster: zeitpunkt,
            });
        kontext.juengster = kontext.juengster.max(zeitpunkt);
        kontext.eintraege.push_back(KontextEintrag {
            sprecher: sprecher.to_string(),
            text: text.to_string(),
            zeitpunkt,
        });

        let juengster = kontext.juengster;
        let max_alter = self.inner.max_alter;
        kontext
            .eintraege
            .retain(|e| juengster.saturating_duration_since(e.zeitpunkt) <= max_alter);

        while kontext.eintraege.len() > self.inner.max_eintraege {
            kontext.eintraege.pop_front();
        }
    }

    /// Rendert die letzten `n` noch gueltigen Eintraege als `name: text`-Zeilen
    ///
    /// Aeltester zuerst; leer wenn es keinen Kontext gibt.
    pub fn zusammenfassung(&self, kanal: ChannelId, n: usize) -> String {
        let Some(kontext) = self.inner.eintraege.get(&kanal) else {
            return String::new();
        };
        let gueltig: Vec<&KontextEintrag> = kontext
            .eintraege
            .iter()
            .filter(|e| e.zeitpunkt.elapsed() <= self.inner.max_alter)
            .collect();
        let start = gueltig.len().saturating_sub(n);
        gueltig[start..]
            .iter()
            .map(|e| format!("{}: {}", e.sprecher, e.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn eintraege(&self, kanal: ChannelId) -> Vec<KontextEintrag> {
        self.inner
            .eintraege
            .get(&kanal)
            .map(|k| k.eintraege.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn kanal_leeren(&self, kanal: ChannelId) {
        self.inner.eintraege.remove(&kanal);
    }

    /// Entfernt abgelaufene Eintraege und leere Kanaele
    pub fn aufraeumen(&self) -> usize {
        let max_alter = self.inner.max_alter;
        let mut entfernt = 0;
        self.inner.eintraege.retain(|_, kontext| {
            let vorher = kontext.eintraege.len();
            kontext.eintraege.retain(|e| e.zeitpunkt.elapsed() <= max_alter);
            entfernt += vorher - kontext.eintraege.len();
            !kontext.eintraege.is_empty()
        });
        entfernt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const KANAL: ChannelId = ChannelId(3);

    #[tokio::test]
    async fn zusammenfassung_aeltester_zuerst() {
        let kontext = KontextSpeicher::neu(5, Duration::from_secs(300));
        kontext.anhaengen(KANAL, "Ana", "hola");
        kontext.anhaengen(KANAL, "Luis", "que onda");
        assert_eq!(kontext.zusammenfassung(KANAL, 5), "Ana: hola\nLuis: que onda");
        assert_eq!(kontext.zusammenfassung(KANAL, 1), "Luis: que onda");
        assert_eq!(kontext.zusammenfassung(ChannelId::neu(99), 5), "");
    }

    #[tokio::test]
    async fn anzahl_begrenzt() {
        let kontext = KontextSpeicher::neu(5, Duration::from_secs(300));
        for i in 0..8 {
            kontext.anhaengen(KANAL, "Ana", &format!("satz {i}"));
        }
        let eintraege = kontext.eintraege(KANAL);
        assert_eq!(eintraege.len(), 5);
        assert_eq!(eintraege[0].text, "satz 3");
        assert_eq!(eintraege[4].text, "satz 7");
    }

    #[tokio::test(start_paused = true)]
    async fn alte_eintraege_verfallen() {
        let kontext = KontextSpeicher::neu(5, Duration::from_secs(300));
        kontext.anhaengen(KANAL, "Ana", "alt");
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(kontext.zusammenfassung(KANAL, 5), "", "abgelaufen beim Lesen");
        kontext.anhaengen(KANAL, "Luis", "neu");
        let eintraege = kontext.eintraege(KANAL);
        assert_eq!(eintraege.len(), 1);
        assert_eq!(eintraege[0].text, "neu");
    }

    #[tokio::test(start_paused = true)]
    async fn aufraeumen_entfernt_leere_kanaele() {
        let kontext = KontextSpeicher::neu(5, Duration::from_secs(60));
        kontext.anhaengen(KANAL, "Ana", "a");
        kontext.anhaengen(ChannelId::neu(4), "Eva", "b");
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(kontext.aufraeumen(), 2);
        assert!(kontext.eintraege(KANAL).is_empty());
    }

    #[tokio::test]
    async fn grenzen_gelten_fuer_zufaellige_einfuegungen() {
        let mut rng = StdRng::seed_from_u64(42);
        let max_alter = Duration::from_secs(300);
        for runde in 0..20 {
            let max = rng.gen_range(1..8);
            let kontext = KontextSpeicher::neu(max, max_alter);
            let basis = Instant::now();
            let mut juengster = basis;
            for i in 0..100 {
                // Schuebe mit kurzen Abstaenden, dazwischen lange Pausen
                let sprung = if rng.gen_bool(0.1) {
                    rng.gen_range(100..600)
                } else {
                    rng.gen_range(0..10)
                };
                // gelegentlich verspaetete Eintraege
                let zeitpunkt = if rng.gen_bool(0.05) {
                    juengster.checked_sub(Duration::from_secs(rng.gen_range(0..400))).unwrap_or(basis)
                } else {
                    juengster + Duration::from_secs(sprung)
                };
                juengster = juengster.max(zeitpunkt);
                kontext.anhaengen_mit_zeit(KANAL, "x", &format!("{runde}-{i}"), zeitpunkt);

                let eintraege = kontext.eintraege(KANAL);
                assert!(eintraege.len() <= max, "mehr als {max} Eintraege");
                for e in &eintraege {
                    assert!(
                        juengster.saturating_duration_since(e.zeitpunkt) <= max_alter,
                        "Eintrag aelter als {max_alter:?}"
                    );
                }
            }
        }
    }
}
