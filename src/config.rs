//! # Configuration Management
//!
//! Loads application settings from layered sources, lowest priority first:
//! built-in defaults, a `config.toml` file, then environment variables with
//! an `APP_` prefix. Deployment-platform variables (`HOST`, `PORT`) and the
//! `GEMINI_API_KEY` secret are honored as special cases on top.
//!
//! ## Key Rust Concepts Used:
//! - **Serde derive macros**: one `#[derive(Serialize, Deserialize)]` makes
//!   each settings struct readable from TOML, JSON, and env layers alike
//! - **The builder pattern**: the `config` crate stacks sources and merges
//!   them into one typed struct
//! - **Result<T, E> + ?**: every load step can fail and propagates early
//!
//! ## Section Layout:
//! Settings are grouped by concern: `server` (bind address), `gemini`
//! (generation backend), `speech` (transcription/synthesis endpoints), and
//! `session` (per-connection behavior), so each part of the system reads
//! only its own block.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gemini: GeminiConfig,
    pub speech: SpeechConfig,
    pub session: SessionConfig,
}

/// Where the HTTP/WebSocket server listens.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: localhost only (development)
/// - `host = "0.0.0.0"`: any interface (production behind a proxy)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Generation backend settings.
///
/// ## Fields:
/// - `api_key`: Gemini API key; normally supplied via the `GEMINI_API_KEY`
///   environment variable rather than a file
/// - `model`: model name sent in the request path (e.g. "gemini-1.5-flash")
/// - `temperature` / `top_k` / `top_p` / `max_output_tokens`: sampling
///   parameters forwarded verbatim in every generation request
/// - `request_timeout_secs`: per-call timeout; a timeout is treated as a
///   transport fault, never retried by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
}

/// Speech service endpoints (remote speech-to-text and text-to-speech).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub transcription_url: String,
    pub synthesis_url: String,
    pub request_timeout_secs: u64,
}

/// Per-connection session behavior.
///
/// ## Fields:
/// - `max_history_turns`: bounded conversation window; oldest turns are
///   dropped in pairs past this count (`0` = unbounded)
/// - `max_concurrent_sessions`: WebSocket connections accepted at once;
///   further upgrade requests are answered `503`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_history_turns: usize,
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            gemini: GeminiConfig {
                api_key: String::new(), // Supplied via GEMINI_API_KEY
                model: "gemini-1.5-flash".to_string(),
                temperature: 0.7,
                top_k: 40,
                top_p: 0.95,
                max_output_tokens: 150, // Voice replies stay short by design
                request_timeout_secs: 30,
            },
            speech: SpeechConfig {
                transcription_url: "http://127.0.0.1:8090/v1/transcribe".to_string(),
                synthesis_url: "http://127.0.0.1:8090/v1/synthesize".to_string(),
                request_timeout_secs: 30,
            },
            session: SessionConfig {
                max_history_turns: 50,
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml`, and environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_PORT=8080`: override the listen port
    /// - `APP_GEMINI_MODEL=gemini-1.5-pro`: override the generation model
    /// - `GEMINI_API_KEY=...`: the upstream API key (special case)
    /// - `HOST` / `PORT`: deployment-platform overrides (special case)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms and secret managers set these without the
        // APP_ prefix convention.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(api_key) = env::var("GEMINI_API_KEY") {
            settings = settings.set_override("gemini.api_key", api_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the loaded values can actually run a server.
    ///
    /// Catching bad values here produces one clear startup error instead
    /// of a confusing failure on the first request.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.gemini.model.is_empty() {
            return Err(anyhow::anyhow!("Generation model name cannot be empty"));
        }

        if !(0.0..=2.0).contains(&self.gemini.temperature) {
            return Err(anyhow::anyhow!(
                "Generation temperature must be between 0.0 and 2.0"
            ));
        }

        if self.gemini.max_output_tokens == 0 {
            return Err(anyhow::anyhow!("Max output tokens must be greater than 0"));
        }

        if self.gemini.request_timeout_secs == 0 || self.speech.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Request timeouts must be greater than 0"));
        }

        if self.session.max_history_turns == 1 {
            return Err(anyhow::anyhow!(
                "Max history turns must be 0 (unbounded) or at least 2"
            ));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent sessions must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Apply a partial update from a JSON body (the `PUT /api/v1/config`
    /// handler). Only the fields present in the JSON change; the API key
    /// is deliberately not updatable through this path.
    ///
    /// Example: `{"gemini": {"temperature": 0.4}}` changes one knob and
    /// leaves everything else alone.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(gemini) = partial.get("gemini") {
            if let Some(model) = gemini.get("model").and_then(|v| v.as_str()) {
                self.gemini.model = model.to_string();
            }
            if let Some(temperature) = gemini.get("temperature").and_then(|v| v.as_f64()) {
                self.gemini.temperature = temperature as f32;
            }
            if let Some(top_k) = gemini.get("top_k").and_then(|v| v.as_u64()) {
                self.gemini.top_k = top_k as u32;
            }
            if let Some(top_p) = gemini.get("top_p").and_then(|v| v.as_f64()) {
                self.gemini.top_p = top_p as f32;
            }
            if let Some(max_tokens) = gemini.get("max_output_tokens").and_then(|v| v.as_u64()) {
                self.gemini.max_output_tokens = max_tokens as u32;
            }
        }

        if let Some(speech) = partial.get("speech") {
            if let Some(url) = speech.get("transcription_url").and_then(|v| v.as_str()) {
                self.speech.transcription_url = url.to_string();
            }
            if let Some(url) = speech.get("synthesis_url").and_then(|v| v.as_str()) {
                self.speech.synthesis_url = url.to_string();
            }
        }

        if let Some(session) = partial.get("session") {
            if let Some(turns) = session.get("max_history_turns").and_then(|v| v.as_u64()) {
                self.session.max_history_turns = turns as usize;
            }
            if let Some(sessions) = session
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.session.max_concurrent_sessions = sessions as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}
