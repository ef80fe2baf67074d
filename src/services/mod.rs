//! # Upstream AI Services
//!
//! Clients for the three remote services the reply pipeline sequences:
//!
//! ## Key Components:
//! - **Generation Client**: text completion over the Gemini
//!   `generateContent` REST API
//! - **Transcription Service**: remote speech-to-text over HTTP
//! - **Synthesis Service**: remote text-to-speech over HTTP
//!
//! Each service sits behind a trait so the session controller can be
//! exercised in tests with scripted in-memory implementations. The real
//! implementations all speak JSON over `reqwest` with a per-request
//! timeout; a timeout is reported as a transport fault, never retried
//! here (retry is a client decision).
//!
//! ## Fault taxonomy (shared by all three):
//! - **Transport**: the service was unreachable or timed out
//! - **Upstream**: the service answered with a non-success HTTP status
//! - **InvalidResponse**: a success status carried an unexpected body
//!   shape; surfaced as a fault, never silently defaulted
//!
//! "The service understood nothing" (empty transcription) and "no audio
//! available" (silent synthesis) are *results*, not faults: the traits
//! model them as `Ok(None)`.

pub mod generation; // Gemini generateContent client
pub mod synthesis; // Remote text-to-speech client
pub mod transcription; // Remote speech-to-text client

pub use generation::GeminiClient;
pub use synthesis::RemoteSynthesis;
pub use transcription::RemoteTranscription;

use crate::session::history::Turn;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Failure modes of a remote service call.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// The service could not be reached, or the call timed out
    Transport(String),

    /// The service answered with a non-success HTTP status
    Upstream {
        /// HTTP status code returned by the service
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The call succeeded but the response body had an unexpected shape
    InvalidResponse(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Transport(msg) => write!(f, "transport error: {}", msg),
            ServiceError::Upstream { status, body } => {
                write!(f, "upstream returned status {}: {}", status, body)
            }
            ServiceError::InvalidResponse(msg) => write!(f, "invalid response shape: {}", msg),
        }
    }
}

/// Audio produced by the synthesis service.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    /// Base64-encoded audio payload, passed to the client as-is
    pub audio: String,
}

/// Text completion over an ordered conversation history.
///
/// The history is sent verbatim, oldest turn first, together with the
/// service's fixed system instructions.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, history: &[Turn]) -> Result<String, ServiceError>;
}

/// Speech-to-text. `Ok(None)` means the audio was understood to contain
/// no usable speech, a non-fault outcome the caller decides how to report.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(&self, audio: &str) -> Result<Option<String>, ServiceError>;
}

/// Text-to-speech. `Ok(None)` means no audio is available for this text,
/// a non-fault outcome; the client falls back to local speech synthesis.
#[async_trait]
pub trait SynthesisService: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Option<SynthesizedAudio>, ServiceError>;
}

/// The three service handles a session controller drives, wired once at
/// startup and shared by every connection.
pub struct ServiceSet {
    pub generation: Arc<dyn GenerationClient>,
    pub transcription: Arc<dyn TranscriptionService>,
    pub synthesis: Arc<dyn SynthesisService>,
}
