//! Transkription ueber einen HTTP-Dienst
//!
//! Das PCM wird als WAV hochgeladen (`multipart/form-data`, Feld `file`),
//! die Sprache steht im Feld `language`. Antwort: `{"text": "..."}`.
//! Die konfigurierten Sprachen werden der Reihe nach versucht.

use crate::wav::pcm_zu_wav;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use voxbot_core::{Result, Transkriptor, VoxbotError};

/// Parameter des Transkriptions-Dienstes
#[derive(Debug, Clone)]
pub struct TranskriptionConfig {
    pub url: String,
    /// Sprachen in Versuchsreihenfolge (z.B. `es-MX`, dann `en-US`)
    pub sprachen: Vec<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for TranskriptionConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000/transcribe".into(),
            sprachen: vec!["es-MX".into(), "en-US".into()],
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranskriptionAntwort {
    #[serde(default)]
    text: String,
}

/// Blockierender HTTP-Transkriptor
///
/// Der Client wird erst beim ersten Aufruf erstellt, also im Blocking-Pool
/// und nicht im async-Kontext.
pub struct HttpTranskriptor {
    config: TranskriptionConfig,
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpTranskriptor {
    pub fn neu(config: TranskriptionConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| VoxbotError::Transkription(format!("HTTP-Client: {e}")))?;
        Ok(self.client.get_or_init(|| client))
    }

    fn versuchen(&self, wav: &[u8], sprache: &str) -> Result<String> {
        let datei = reqwest::blocking::multipart::Part::bytes(wav.to_vec())
            .file_name("aeusserung.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoxbotError::Transkription(e.to_string()))?;
        let formular = reqwest::blocking::multipart::Form::new()
            .part("file", datei)
            .text("language", sprache.to_string());

        let mut anfrage = self.client()?.post(&self.config.url).multipart(formular);
        if let Some(key) = &self.config.api_key {
            anfrage = anfrage.bearer_auth(key);
        }

        let antwort = anfrage.send().map_err(|e| {
            if e.is_timeout() {
                VoxbotError::Zeitlimit(format!("Transkription ({sprache})"))
            } else {
                VoxbotError::Transkription(e.to_string())
            }
        })?;
        let status = antwort.status();
        if !status.is_success() {
            let body = antwort.text().unwrap_or_default();
            return Err(VoxbotError::Transkription(format!(
                "Dienst antwortet mit {status}: {body}"
            )));
        }

        let antwort: TranskriptionAntwort = antwort
            .json()
            .map_err(|e| VoxbotError::Transkription(format!("Ungueltige Antwort: {e}")))?;
        let text = antwort.text.trim();
        if text.is_empty() {
            return Err(VoxbotError::NichtsErkannt);
        }
        Ok(text.to_string())
    }
}

impl Transkriptor for HttpTranskriptor {
    fn transkribieren(&self, audio: &[u8]) -> Result<String> {
        if audio.is_empty() {
            return Err(VoxbotError::NichtsErkannt);
        }
        let wav = pcm_zu_wav(audio)?;

        let mut letzter_fehler = VoxbotError::NichtsErkannt;
        for sprache in &self.config.sprachen {
            match self.versuchen(&wav, sprache) {
                Ok(text) => {
                    tracing::debug!(sprache = %sprache, zeichen = text.len(), "Transkription erfolgreich");
                    return Ok(text);
                }
                Err(VoxbotError::NichtsErkannt) => {
                    tracing::debug!(sprache = %sprache, "Nichts erkannt, naechste Sprache");
                }
                Err(e) => {
                    tracing::debug!(sprache = %sprache, fehler = %e, "Transkription fehlgeschlagen, naechste Sprache");
                    letzter_fehler = e;
                }
            }
        }
        Err(letzter_fehler)
    }
}
