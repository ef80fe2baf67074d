//! # Remote Text-to-Speech Client
//!
//! Sends reply text to the configured synthesis endpoint and returns the
//! synthesized audio. The endpoint contract is a single JSON POST:
//!
//! ```json
//! { "text": "reply" }  →  { "audio": "<base64>" }
//! ```
//!
//! "No audio available" is a valid outcome, not a fault: the service may
//! answer `204 No Content` or omit the `audio` field, and the client is
//! expected to fall back to local speech synthesis.

use crate::config::SpeechConfig;
use crate::services::{ServiceError, SynthesisService, SynthesizedAudio};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct RemoteSynthesis {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    #[serde(default)]
    audio: Option<String>,
}

impl RemoteSynthesis {
    pub fn new(config: &SpeechConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.synthesis_url.clone(),
        })
    }
}

#[async_trait]
impl SynthesisService for RemoteSynthesis {
    async fn synthesize(&self, text: &str) -> Result<Option<SynthesizedAudio>, ServiceError> {
        debug!(chars = text.len(), "Sending synthesis request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&SynthesizeRequest { text })
            .send()
            .await
            .map_err(|err| ServiceError::Transport(err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body: SynthesizeResponse = response
            .json()
            .await
            .map_err(|err| ServiceError::InvalidResponse(err.to_string()))?;

        Ok(body
            .audio
            .filter(|audio| !audio.is_empty())
            .map(|audio| SynthesizedAudio { audio }))
    }
}
