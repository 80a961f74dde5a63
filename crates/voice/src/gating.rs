//! Antwort-Entscheidung – angesprochen oder per Zufall
//!
//! Die Ansprache-Erkennung ist eine reine String-Heuristik; alle Listen und
//! Schwellen kommen aus `AnspracheConfig`.

use crate::config::AnspracheConfig;
use std::sync::Arc;

/// Warum der Bot antwortet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntwortGrund {
    Angesprochen,
    Zufall,
}

// ---------------------------------------------------------------------------
// AnspracheErkennung
// ---------------------------------------------------------------------------

/// Erkennt ob ein Transkript den Bot anspricht
#[derive(Debug, Clone)]
pub struct AnspracheErkennung {
    trigger_namen: Vec<String>,
    aufmerksamkeit: Vec<String>,
    fragen: Vec<String>,
    max_woerter: usize,
}

impl AnspracheErkennung {
    pub fn neu(config: &AnspracheConfig) -> Self {
        let klein = |liste: &[String]| -> Vec<String> {
            liste
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            trigger_namen: klein(&config.trigger_namen),
            aufmerksamkeit: klein(&config.aufmerksamkeits_woerter),
            fragen: klein(&config.frage_woerter),
            max_woerter: config.max_woerter,
        }
    }

    /// Spricht `text` den Bot an?
    ///
    /// - ein Trigger-Name kommt vor (kurze Namen nur als ganzes Wort,
    ///   laengere auch innerhalb eines Wortes wie "golfobot")
    /// - oder Aufmerksamkeitswort plus Fragewort in einer kurzen Aeusserung
    pub fn ist_angesprochen(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        let woerter: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if woerter.is_empty() {
            return false;
        }

        let name_genannt = self.trigger_namen.iter().any(|name| {
            woerter.iter().any(|wort| {
                *wort == name.as_str() || (name.chars().count() >= 4 && wort.contains(name.as_str()))
            })
        });
        if name_genannt {
            return true;
        }

        let aufmerksamkeit = woerter
            .iter()
            .any(|wort| self.aufmerksamkeit.iter().any(|a| a == wort));
        if !aufmerksamkeit || woerter.len() > self.max_woerter {
            return false;
        }

        let normalisiert = woerter.join(" ");
        self.fragen.iter().any(|frage| {
            if frage.contains(' ') {
                format!(" {normalisiert} ").contains(&format!(" {frage} "))
            } else {
                woerter.iter().any(|wort| wort == frage)
            }
        })
    }
}

// ---------------------------------------------------------------------------
// AntwortEntscheider
// ---------------------------------------------------------------------------

/// Zufallsquelle im Bereich [0, 1)
pub type Zufallsquelle = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Entscheidet ob auf ein Transkript geantwortet wird
#[derive(Clone)]
pub struct AntwortEntscheider {
    ansprache: AnspracheErkennung,
    wahrscheinlichkeit: f64,
    zufall: Zufallsquelle,
}

impl AntwortEntscheider {
    pub fn neu(ansprache: AnspracheErkennung, wahrscheinlichkeit: f64) -> Self {
        Self::mit_zufallsquelle(ansprache, wahrscheinlichkeit, Arc::new(rand::random::<f64>))
    }

    /// Mit eigener Zufallsquelle (Tests, deterministische Replays)
    pub fn mit_zufallsquelle(
        ansprache: AnspracheErkennung,
        wahrscheinlichkeit: f64,
        zufall: Zufallsquelle,
    ) -> Self {
        Self {
            ansprache,
            wahrscheinlichkeit: wahrscheinlichkeit.clamp(0.0, 1.0),
            zufall,
        }
    }

    /// `None` wenn der Bot schweigt
    ///
    /// Gewuerfelt wird nur wenn der Bot nicht angesprochen wurde.
    pub fn entscheiden(&self, text: &str) -> Option<AntwortGrund> {
        if self.ansprache.ist_angesprochen(text) {
            return Some(AntwortGrund::Angesprochen);
        }
        if (self.zufall)() < self.wahrscheinlichkeit {
            return Some(AntwortGrund::Zufall);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn erkennung() -> AnspracheErkennung {
        AnspracheErkennung::neu(&AnspracheConfig::default())
    }

    #[test]
    fn trigger_name_im_wort() {
        let e = erkennung();
        assert!(e.ist_angesprochen("oye golfobot que hora es"));
        assert!(e.ist_angesprochen("Golfito, pon música"));
        assert!(e.ist_angesprochen("que opinas bro"));
    }

    #[test]
    fn kurze_namen_nur_als_ganzes_wort() {
        let e = erkennung();
        // "ai" steckt in "traigo", zaehlt aber nicht
        assert!(!e.ist_angesprochen("yo traigo las papas"));
        assert!(e.ist_angesprochen("ai dime algo"));
    }

    #[test]
    fn ohne_ansprache() {
        let e = erkennung();
        assert!(!e.ist_angesprochen("vamos al rio"));
        assert!(!e.ist_angesprochen(""));
        assert!(!e.ist_angesprochen("   ...  "));
    }

    #[test]
    fn aufmerksamkeit_plus_frage() {
        let e = erkennung();
        assert!(e.ist_angesprochen("oye, ¿cómo se llama esa canción?"));
        assert!(e.ist_angesprochen("hey por qué no jugamos"));
        assert!(!e.ist_angesprochen("oye pasame la sal"), "keine Frage");
        assert!(!e.ist_angesprochen("como se llama esa cancion"), "keine Aufmerksamkeit");
    }

    #[test]
    fn lange_aeusserung_gilt_nicht_als_frage() {
        let e = erkennung();
        let lang = format!("oye que {}", "palabra ".repeat(25));
        assert!(!e.ist_angesprochen(&lang));
    }

    #[test]
    fn zufall_nur_ohne_ansprache() {
        let nie = AntwortEntscheider::mit_zufallsquelle(erkennung(), 0.2, Arc::new(|| 0.99));
        assert_eq!(nie.entscheiden("vamos al rio"), None);
        assert_eq!(
            nie.entscheiden("oye golfobot que hora es"),
            Some(AntwortGrund::Angesprochen)
        );

        let immer = AntwortEntscheider::mit_zufallsquelle(erkennung(), 0.2, Arc::new(|| 0.05));
        assert_eq!(immer.entscheiden("vamos al rio"), Some(AntwortGrund::Zufall));
    }

    #[test]
    fn wahrscheinlichkeit_null_antwortet_nie_zufaellig() {
        let e = AntwortEntscheider::neu(erkennung(), 0.0);
        for _ in 0..100 {
            assert_eq!(e.entscheiden("vamos al rio"), None);
        }
    }
}
