//! # Remote Speech-to-Text Client
//!
//! Sends base64 audio to the configured transcription endpoint and returns
//! the recognized text. The endpoint contract is a single JSON POST:
//!
//! ```json
//! { "audio": "<base64>" }  →  { "text": "recognized speech" }
//! ```
//!
//! A missing, empty, or whitespace-only `text` means the service understood
//! nothing. That is reported as `Ok(None)`, not as a fault; the session
//! controller decides how to surface it to the client.

use crate::config::SpeechConfig;
use crate::services::{ServiceError, TranscriptionService};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct RemoteTranscription {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    audio: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    text: Option<String>,
}

impl RemoteTranscription {
    pub fn new(config: &SpeechConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.transcription_url.clone(),
        })
    }
}

#[async_trait]
impl TranscriptionService for RemoteTranscription {
    async fn transcribe(&self, audio: &str) -> Result<Option<String>, ServiceError> {
        debug!(bytes = audio.len(), "Sending transcription request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&TranscribeRequest { audio })
            .send()
            .await
            .map_err(|err| ServiceError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|err| ServiceError::InvalidResponse(err.to_string()))?;

        Ok(body.text.filter(|text| !text.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_maps_to_none() {
        let body: TranscribeResponse = serde_json::from_str(r#"{"text": "   "}"#).unwrap();
        assert!(body.text.filter(|t| !t.trim().is_empty()).is_none());

        let body: TranscribeResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(body.text.is_none());
    }

    #[test]
    fn test_recognized_text_survives() {
        let body: TranscribeResponse =
            serde_json::from_str(r#"{"text": "tell me about the RV400"}"#).unwrap();
        assert_eq!(
            body.text.filter(|t| !t.trim().is_empty()).as_deref(),
            Some("tell me about the RV400")
        );
    }
}
