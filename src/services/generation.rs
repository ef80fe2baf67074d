//! # Gemini Generation Client
//!
//! Text completion against the Gemini `generateContent` REST API. The
//! client sends the full conversation history plus fixed system
//! instructions and the configured generation parameters, and extracts the
//! first candidate's text from the response.
//!
//! ## Request anatomy:
//! - `contents`: the ordered conversation turns (`user` / `model` roles)
//! - `systemInstruction`: the assistant persona (see [`SYSTEM_INSTRUCTIONS`])
//! - `generationConfig`: temperature, topK, topP, maxOutputTokens
//! - `safetySettings`: content-safety thresholds
//!
//! A non-2xx answer is an upstream fault carrying the status and body; a
//! 2xx answer without a usable candidate is a distinct shape fault.

use crate::config::GeminiConfig;
use crate::services::{GenerationClient, ServiceError};
use crate::session::history::Turn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Fixed system instructions sent with every generation request.
///
/// The assistant persona: "Rev", the voice assistant for Revolt Motors'
/// electric motorcycles.
pub const SYSTEM_INSTRUCTIONS: &str = "You are Rev, the official voice assistant for Revolt Motors, India's leading electric motorcycle company.

Key Information about Revolt Motors:
- Revolt Motors is India's first AI-enabled electric motorcycle company
- Main products: RV400 and RV1+ electric motorcycles
- Founded with a mission to make electric mobility accessible and exciting
- Offers innovative features like swappable batteries, mobile app connectivity, and AI-powered riding insights
- Focus on sustainable transportation solutions for Indian roads
- Customer-centric approach with nationwide service network

Your Role:
- Speak naturally and conversationally in a friendly, helpful tone
- Answer questions about Revolt Motors products, features, pricing, and services
- Help users understand electric motorcycle benefits
- Provide information about dealerships, test rides, and purchasing options
- If asked about topics unrelated to Revolt Motors, politely redirect the conversation back to Revolt Motors and electric mobility
- Keep responses concise but informative (2-3 sentences max)
- Show enthusiasm for electric vehicles and sustainable transportation

Always maintain focus on Revolt Motors and avoid discussing competitor brands or unrelated topics.";

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for the Gemini generation API.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    config: GeminiConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: SystemInstruction,
    generation_config: GenerationParameters,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParameters {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ListModelsResponse {
    models: Option<Vec<ModelInfo>>,
}

/// One model advertised by the generation API, as exposed on
/// `GET /api/v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl GeminiClient {
    /// Build a client from the configured API key, model and parameters.
    /// The request timeout applies to every call made through this client.
    pub fn new(config: GeminiConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
            config,
        })
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.config.model, self.config.api_key
        )
    }

    fn build_request(&self, history: &[Turn]) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: history
                .iter()
                .map(|turn| Content {
                    role: turn.role.as_str().to_string(),
                    parts: vec![Part {
                        text: turn.text.clone(),
                    }],
                })
                .collect(),
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTIONS.to_string(),
                }],
            },
            generation_config: GenerationParameters {
                temperature: self.config.temperature,
                top_k: self.config.top_k,
                top_p: self.config.top_p,
                max_output_tokens: self.config.max_output_tokens,
            },
            safety_settings: default_safety_settings(),
        }
    }

    /// One-shot connectivity probe used by `GET /api/v1/test-api`: sends a
    /// single "Hello" turn and returns the completion text.
    pub async fn probe(&self) -> Result<String, ServiceError> {
        self.generate(&[Turn::user("Hello")]).await
    }

    /// List the models the generation API advertises
    /// (`GET /api/v1/models` pass-through).
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ServiceError> {
        let url = format!("{}/models?key={}", self.base_url, self.config.api_key);

        let response = self
            .http
            .get(&url)
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

        let body: ListModelsResponse = response
            .json()
            .await
            .map_err(|err| ServiceError::InvalidResponse(err.to_string()))?;

        Ok(body.models.unwrap_or_default())
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(&self, history: &[Turn]) -> Result<String, ServiceError> {
        debug!(
            model = %self.config.model,
            turns = history.len(),
            "Sending generation request"
        );

        let request = self.build_request(history);

        let response = self
            .http
            .post(self.generate_url())
            .json(&request)
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

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| ServiceError::InvalidResponse(err.to_string()))?;

        extract_reply(body)
    }
}

/// Pull the first candidate's text out of a response, treating every
/// missing layer as the same shape fault.
fn extract_reply(response: GenerateContentResponse) -> Result<String, ServiceError> {
    response
        .candidates
        .and_then(|mut candidates| {
            if candidates.is_empty() {
                None
            } else {
                Some(candidates.remove(0))
            }
        })
        .and_then(|candidate| candidate.content)
        .and_then(|content| content.parts.into_iter().next())
        .map(|part| part.text)
        .ok_or_else(|| {
            ServiceError::InvalidResponse("response carried no completion candidate".to_string())
        })
}

fn default_safety_settings() -> Vec<SafetySetting> {
    const THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";
    vec![
        SafetySetting {
            category: "HARM_CATEGORY_HARASSMENT",
            threshold: THRESHOLD,
        },
        SafetySetting {
            category: "HARM_CATEGORY_HATE_SPEECH",
            threshold: THRESHOLD,
        },
        SafetySetting {
            category: "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            threshold: THRESHOLD,
        },
        SafetySetting {
            category: "HARM_CATEGORY_DANGEROUS_CONTENT",
            threshold: THRESHOLD,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::history::Turn;

    fn test_client() -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            api_key: "test-key".to_string(),
            model: "gemini-1.5-flash".to_string(),
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 150,
            request_timeout_secs: 30,
        })
        .unwrap()
    }

    #[test]
    fn test_request_uses_camel_case_wire_names() {
        let client = test_client();
        let request = client.build_request(&[Turn::user("hi"), Turn::model("hello")]);
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains(r#""systemInstruction""#));
        assert!(json.contains(r#""generationConfig""#));
        assert!(json.contains(r#""maxOutputTokens":150"#));
        assert!(json.contains(r#""topK":40"#));
        assert!(json.contains(r#""safetySettings""#));
        assert!(json.contains(r#""role":"user""#));
        assert!(json.contains(r#""role":"model""#));
    }

    #[test]
    fn test_extract_reply_from_valid_response() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{
                "candidates": [
                    {"content": {"role": "model", "parts": [{"text": "The RV400 tops out at 85 km/h."}]}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            extract_reply(response).unwrap(),
            "The RV400 tops out at 85 km/h."
        );
    }

    #[test]
    fn test_missing_candidates_is_a_shape_fault() {
        let empty: GenerateContentResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(matches!(
            extract_reply(empty),
            Err(ServiceError::InvalidResponse(_))
        ));

        let no_content: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates": [{}]}"#).unwrap();
        assert!(matches!(
            extract_reply(no_content),
            Err(ServiceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_model_listing_deserialization() {
        let body: ListModelsResponse = serde_json::from_str(
            r#"{
                "models": [
                    {"name": "models/gemini-1.5-flash", "displayName": "Gemini 1.5 Flash", "description": "Fast multimodal model"},
                    {"name": "models/embedding-001"}
                ]
            }"#,
        )
        .unwrap();

        let models = body.models.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(
            models[0].display_name.as_deref(),
            Some("Gemini 1.5 Flash")
        );
        assert!(models[1].display_name.is_none());
    }
}
