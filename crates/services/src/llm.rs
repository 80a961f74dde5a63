//! Antwort-Generierung ueber den Chat-Backend-Endpunkt `/dev/llm_reply`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use voxbot_core::{AntwortAnfrage, AntwortGenerator, Result, VoxbotError};

/// Parameter des Antwort-Dienstes
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Basis-URL ohne Pfad (z.B. `http://127.0.0.1:5000`)
    pub basis_url: String,
    /// Gilde/Server der Plattform; ohne Angabe wird die Kanal-ID gesendet
    pub gilde_id: Option<u64>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            basis_url: "http://127.0.0.1:5000".into(),
            gilde_id: None,
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct ReplyRequest<'a> {
    content: &'a str,
    username: &'a str,
    user_id: String,
    guild_id: String,
    channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ReplyResponse {
    #[serde(default)]
    reply: String,
}

pub struct HttpAntwortGenerator {
    client: reqwest::Client,
    url: String,
    gilde_id: Option<u64>,
    api_key: Option<String>,
}

impl HttpAntwortGenerator {
    pub fn neu(config: GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VoxbotError::Konfiguration(format!("HTTP-Client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/dev/llm_reply", config.basis_url.trim_end_matches('/')),
            gilde_id: config.gilde_id,
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl AntwortGenerator for HttpAntwortGenerator {
    async fn generieren(&self, anfrage: &AntwortAnfrage) -> Result<String> {
        let gilde = self
            .gilde_id
            .unwrap_or_else(|| anfrage.kanal_id.inner())
            .to_string();
        let body = ReplyRequest {
            content: &anfrage.text,
            username: &anfrage.sprecher_name,
            user_id: anfrage.sprecher_id.inner().to_string(),
            guild_id: gilde,
            channel_id: anfrage.kanal_id.inner().to_string(),
            context: anfrage.kontext.as_deref().filter(|k| !k.is_empty()),
        };
        if let Some(kontext) = body.context {
            tracing::debug!(zeichen = kontext.len(), "Sende Gespraechskontext mit");
        }

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let antwort = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VoxbotError::Zeitlimit("Antwort-Generierung".into())
            } else {
                VoxbotError::Generierung(e.to_string())
            }
        })?;
        let status = antwort.status();
        if !status.is_success() {
            return Err(VoxbotError::Generierung(format!(
                "Endpunkt antwortet mit {status}"
            )));
        }

        let antwort: ReplyResponse = antwort
            .json()
            .await
            .map_err(|e| VoxbotError::Generierung(format!("Ungueltige Antwort: {e}")))?;
        Ok(antwort.reply.trim().to_string())
    }
}
