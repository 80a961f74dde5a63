//! Sprachsynthese ueber einen HTTP-Dienst
//!
//! POST `{"text": ..., "language": ...}`, Antwort ist eine WAV-Datei
//! (beliebige Abtastrate, Mono oder Stereo; wird auf 48 kHz Stereo umgerechnet).

use crate::wav::wav_zu_pcm;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use voxbot_core::{Result, Synthesizer, VoxbotError};

#[derive(Debug, Clone)]
pub struct SyntheseConfig {
    pub url: String,
    pub sprache: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for SyntheseConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000/tts".into(),
            sprache: "es-MX".into(),
            api_key: None,
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Serialize)]
struct SyntheseAnfrage<'a> {
    text: &'a str,
    language: &'a str,
}

pub struct HttpSynthesizer {
    client: reqwest::Client,
    config: SyntheseConfig,
}

impl HttpSynthesizer {
    pub fn neu(config: SyntheseConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VoxbotError::Konfiguration(format!("HTTP-Client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthetisieren(&self, text: &str) -> Result<Bytes> {
        let mut request = self.client.post(&self.config.url).json(&SyntheseAnfrage {
            text,
            language: &self.config.sprache,
        });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let antwort = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VoxbotError::Zeitlimit("Sprachsynthese".into())
            } else {
                VoxbotError::Synthese(e.to_string())
            }
        })?;
        let status = antwort.status();
        if !status.is_success() {
            return Err(VoxbotError::Synthese(format!("Dienst antwortet mit {status}")));
        }

        let wav = antwort
            .bytes()
            .await
            .map_err(|e| VoxbotError::Synthese(e.to_string()))?;
        let pcm = wav_zu_pcm(&wav)?;
        tracing::debug!(zeichen = text.len(), bytes = pcm.len(), "Synthese abgeschlossen");
        Ok(pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::io::Cursor;

    fn mono_wav(samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    async fn tts(Json(body): Json<serde_json::Value>) -> (StatusCode, Vec<u8>) {
        if body["text"] == "hola" && body["language"] == "es-MX" {
            (StatusCode::OK, mono_wav(&[5, 6, 7]))
        } else {
            (StatusCode::BAD_REQUEST, Vec::new())
        }
    }

    async fn dienst_starten() -> String {
        let app = Router::new().route("/tts", post(tts));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/tts")
    }

    #[tokio::test]
    async fn liefert_stereo_pcm() {
        let url = dienst_starten().await;
        let synth = HttpSynthesizer::neu(SyntheseConfig {
            url,
            ..SyntheseConfig::default()
        })
        .unwrap();

        let pcm = synth.synthetisieren("hola").await.unwrap();
        // 3 Mono-Samples -> 6 Stereo-Samples -> 12 Bytes
        assert_eq!(pcm.len(), 12);
    }

    #[tokio::test]
    async fn fehlerstatus_ist_synthesefehler() {
        let url = dienst_starten().await;
        let synth = HttpSynthesizer::neu(SyntheseConfig {
            url,
            ..SyntheseConfig::default()
        })
        .unwrap();

        assert!(matches!(
            synth.synthetisieren("adios").await,
            Err(VoxbotError::Synthese(_))
        ));
    }
}
