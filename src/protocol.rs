//! # Session Protocol Envelope
//!
//! Typed message envelope for the `/ws` conversational session protocol.
//! Every WebSocket frame carries exactly one JSON object whose `type` field
//! selects the variant. Frames are decoded once at the connection boundary,
//! so the session controller only ever operates on typed events and never
//! performs ad-hoc field lookups.
//!
//! ## Protocol Flow:
//! - **Client → Server**: `start_session`, `text_message`, `audio_data`,
//!   `interrupt`, `clear_history`
//! - **Server → Client**: `session_started`, `user_transcript`,
//!   `text_response`, `audio_response`, `interrupted`, `history_cleared`,
//!   `error`
//!
//! A frame that fails to decode is answered with an `error` event by the
//! WebSocket layer; it never reaches the controller and changes no state.

use serde::{Deserialize, Serialize};

/// Events sent by the client over the WebSocket connection.
///
/// ## Rust Concepts:
/// - **#[serde(tag = "type")]**: The JSON `type` field picks the variant
///   (an "internally tagged" enum), matching the wire protocol directly
/// - **rename_all = "snake_case"**: `TextMessage` becomes `"text_message"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Handshake; acknowledged with `session_started`, no state change
    StartSession,

    /// A typed user utterance to run through the reply pipeline
    TextMessage {
        /// The raw user text
        text: String,
    },

    /// A recorded user utterance; transcribed first, then treated as text
    AudioData {
        /// Base64-encoded audio payload
        audio: String,
    },

    /// Cancel the in-flight pipeline (cooperative; see session controller)
    Interrupt,

    /// Discard all conversation history for this session
    ClearHistory,
}

/// Events emitted by the server over the WebSocket connection.
///
/// For one request the emission order is fixed: `user_transcript`, then
/// `text_response`, then optionally `audio_response`; or nothing at all
/// once the pipeline has been interrupted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Acknowledges `start_session`
    SessionStarted,

    /// Echo of the user's utterance (typed text or a finished transcription)
    UserTranscript {
        /// The user text as it entered the conversation history
        text: String,
    },

    /// The generated reply text
    TextResponse {
        /// The model's reply as it entered the conversation history
        text: String,
    },

    /// Synthesized speech for the reply; omitted entirely when the
    /// synthesis service yields no audio (the client falls back to local
    /// speech synthesis)
    AudioResponse {
        /// Base64-encoded audio payload
        audio: String,
        /// The reply text the audio was synthesized from
        transcript: String,
    },

    /// Acknowledges `interrupt`; later results of the cancelled pipeline
    /// are discarded, not delivered
    Interrupted,

    /// Acknowledges `clear_history`
    HistoryCleared,

    /// A protocol, transport, shape, or transcription fault
    Error {
        /// Human-readable diagnostic message
        message: String,
    },
}

impl ServerEvent {
    /// Build an `error` event from any displayable message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_decoding() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type": "text_message", "text": "hello"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::TextMessage {
                text: "hello".to_string()
            }
        );

        let event: ClientEvent = serde_json::from_str(r#"{"type": "interrupt"}"#).unwrap();
        assert_eq!(event, ClientEvent::Interrupt);

        let event: ClientEvent = serde_json::from_str(r#"{"type": "clear_history"}"#).unwrap();
        assert_eq!(event, ClientEvent::ClearHistory);
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        // Unknown `type` values must fail decoding so the boundary can
        // answer with an `error` event instead of guessing.
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type": "resume"}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"text": "no type field"}"#).is_err());
    }

    #[test]
    fn test_missing_payload_field_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type": "text_message"}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type": "audio_data"}"#).is_err());
    }

    #[test]
    fn test_server_event_wire_format() {
        let json = serde_json::to_string(&ServerEvent::TextResponse {
            text: "The RV400 is an electric motorcycle.".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"text_response""#));

        let json = serde_json::to_string(&ServerEvent::AudioResponse {
            audio: "UklGRg==".to_string(),
            transcript: "hello".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"audio_response""#));
        assert!(json.contains(r#""transcript":"hello""#));

        let json = serde_json::to_string(&ServerEvent::SessionStarted).unwrap();
        assert_eq!(json, r#"{"type":"session_started"}"#);
    }

    #[test]
    fn test_error_event_helper() {
        let event = ServerEvent::error("Could not understand audio");
        assert_eq!(
            event,
            ServerEvent::Error {
                message: "Could not understand audio".to_string()
            }
        );
    }
}
