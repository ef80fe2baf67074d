//! # Session Controller
//!
//! The per-connection state machine behind the `/ws` protocol. One
//! controller owns one conversation history and one processing flag, and
//! drives the reply pipeline: transcribe (audio only) → generate →
//! synthesize, emitting protocol events through a channel the WebSocket
//! actor forwards to the client.
//!
//! ## Single-flight:
//! At most one pipeline runs per session. While a pipeline is in flight a
//! new `text_message` or `audio_data` is silently dropped: back-pressure
//! by rejection, not by queueing. The client re-sends if it cares.
//!
//! ## Cooperative interruption:
//! `interrupt` never aborts an in-flight remote call. It cancels the
//! current pipeline's token and resets the processing flag so a fresh
//! request can start immediately; the cancelled pipeline re-checks its
//! token after *every* suspension point and discards results instead of
//! emitting them. A stale completion racing with a fresh request therefore
//! never reaches the client.
//!
//! ## Flag release:
//! The flag always returns to `Idle` when a pipeline concludes (success,
//! fault, or interrupt) through an RAII guard. A pipeline whose token was
//! cancelled no longer owns the flag (a fresh pipeline may already hold
//! it) and leaves it alone.

use crate::protocol::ServerEvent;
use crate::services::ServiceSet;
use crate::session::history::{ConversationHistory, Turn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-connection session state machine.
///
/// ## Thread Safety:
/// actix handles connections on OS threads, so the session state is
/// protected: the processing flag is atomic, and the history and current
/// cancellation token sit behind mutexes that are never held across an
/// await.
pub struct SessionController {
    /// Connection identifier, used only for logging
    session_id: String,

    /// Ordered user/model turn log owned by this session
    history: Mutex<ConversationHistory>,

    /// Single-flight gate: `true` while a pipeline is in flight
    processing: AtomicBool,

    /// Cancellation token of the current (or most recent) pipeline
    cancel: Mutex<CancellationToken>,

    /// Upstream service handles shared across all sessions
    services: Arc<ServiceSet>,

    /// Outbound protocol events, forwarded to the client by the WebSocket
    /// actor
    events: mpsc::UnboundedSender<ServerEvent>,
}

/// Releases the processing flag when a pipeline concludes, unless an
/// interrupt already took ownership away from this pipeline.
struct PipelineGuard<'a> {
    controller: &'a SessionController,
    token: CancellationToken,
}

impl Drop for PipelineGuard<'_> {
    fn drop(&mut self) {
        if !self.token.is_cancelled() {
            self.controller.processing.store(false, Ordering::SeqCst);
        }
    }
}

impl SessionController {
    /// Create a controller with an empty history.
    ///
    /// `max_history_turns` bounds the conversation window (`0` disables
    /// the bound; see [`ConversationHistory`]).
    pub fn new(
        session_id: String,
        services: Arc<ServiceSet>,
        max_history_turns: usize,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            session_id,
            history: Mutex::new(ConversationHistory::new(max_history_turns)),
            processing: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            services,
            events,
        }
    }

    /// Whether a pipeline is currently in flight.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Acknowledge the session handshake. No state change.
    pub fn start_session(&self) {
        self.emit(ServerEvent::SessionStarted);
    }

    /// Cooperatively cancel the in-flight pipeline (if any) and reset the
    /// flag to idle unconditionally. Always acknowledged, even when
    /// nothing was running.
    pub fn interrupt(&self) {
        self.cancel.lock().unwrap().cancel();
        self.processing.store(false, Ordering::SeqCst);
        info!(session_id = %self.session_id, "Session interrupted");
        self.emit(ServerEvent::Interrupted);
    }

    /// Discard every conversation turn. Allowed at any time, including
    /// while a pipeline is in flight.
    pub fn clear_history(&self) {
        self.history.lock().unwrap().clear();
        info!(session_id = %self.session_id, "Conversation history cleared");
        self.emit(ServerEvent::HistoryCleared);
    }

    /// Run the text pipeline for a typed user message. A no-op while
    /// another pipeline is in flight.
    pub async fn handle_text_message(&self, text: String) {
        let Some(token) = self.try_begin() else {
            debug!(
                session_id = %self.session_id,
                "Dropping text_message: a pipeline is already in flight"
            );
            return;
        };
        let _guard = PipelineGuard {
            controller: self,
            token: token.clone(),
        };

        self.run_text_pipeline(text, &token).await;
    }

    /// Run the audio pipeline: transcribe, then delegate into the text
    /// pipeline under the *same* processing flag. A no-op while another
    /// pipeline is in flight.
    pub async fn handle_audio_data(&self, audio: String) {
        let Some(token) = self.try_begin() else {
            debug!(
                session_id = %self.session_id,
                "Dropping audio_data: a pipeline is already in flight"
            );
            return;
        };
        let _guard = PipelineGuard {
            controller: self,
            token: token.clone(),
        };

        let transcript = self.services.transcription.transcribe(&audio).await;
        if token.is_cancelled() {
            debug!(session_id = %self.session_id, "Discarding transcription after interrupt");
            return;
        }

        match transcript {
            Ok(Some(text)) if !text.trim().is_empty() => {
                self.run_text_pipeline(text, &token).await;
            }
            Ok(_) => {
                // Understood nothing: a non-fault outcome reported as an
                // error event by protocol policy. History stays untouched.
                self.emit(ServerEvent::error("Could not understand audio"));
            }
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "Transcription request failed");
                self.emit(ServerEvent::error(format!(
                    "Failed to transcribe audio: {}",
                    err
                )));
            }
        }
    }

    /// Claim the processing flag and install a fresh cancellation token.
    /// Returns `None` when another pipeline already holds the flag.
    fn try_begin(&self) -> Option<CancellationToken> {
        if self.processing.swap(true, Ordering::SeqCst) {
            return None;
        }
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap() = token.clone();
        Some(token)
    }

    /// Steps 2–5 of the text pipeline. The caller holds the processing
    /// flag and its guard; `token` is re-checked after every suspension
    /// point.
    async fn run_text_pipeline(&self, text: String, token: &CancellationToken) {
        // The user turn lands in history *before* the generation
        // suspension point; an interrupt later suppresses only the model
        // turn and its events.
        self.history.lock().unwrap().append(Turn::user(text.clone()));
        self.emit(ServerEvent::UserTranscript { text });

        let snapshot = self.history.lock().unwrap().snapshot();
        let reply = self.services.generation.generate(&snapshot).await;
        if token.is_cancelled() {
            debug!(session_id = %self.session_id, "Discarding generation result after interrupt");
            return;
        }

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "Generation request failed");
                self.emit(ServerEvent::error(format!(
                    "Failed to generate response: {}",
                    err
                )));
                return;
            }
        };

        self.history.lock().unwrap().append(Turn::model(reply.clone()));
        self.emit(ServerEvent::TextResponse {
            text: reply.clone(),
        });

        let audio = self.services.synthesis.synthesize(&reply).await;
        if token.is_cancelled() {
            debug!(session_id = %self.session_id, "Discarding synthesized audio after interrupt");
            return;
        }

        match audio {
            Ok(Some(audio)) => {
                self.emit(ServerEvent::AudioResponse {
                    audio: audio.audio,
                    transcript: reply,
                });
            }
            // No audio available: valid silence, the client falls back to
            // local speech synthesis.
            Ok(None) => {}
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "Synthesis request failed");
                self.emit(ServerEvent::error(format!(
                    "Failed to synthesize audio: {}",
                    err
                )));
            }
        }
    }

    /// Send an event to the client. A send error only means the
    /// connection is gone; the pipeline finishes quietly.
    fn emit(&self, event: ServerEvent) {
        if self.events.send(event).is_err() {
            debug!(session_id = %self.session_id, "Dropping event for closed connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        GenerationClient, ServiceError, SynthesisService, SynthesizedAudio, TranscriptionService,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Generation fake driven by a per-call script of
    /// `(delay_ms, result)` steps. Panics on unscripted calls, which
    /// doubles as an assertion that dropped messages never reach the
    /// service.
    struct ScriptedGeneration {
        script: Mutex<VecDeque<(u64, Result<String, ServiceError>)>>,
    }

    impl ScriptedGeneration {
        fn with_script(steps: Vec<(u64, Result<String, ServiceError>)>) -> Self {
            Self {
                script: Mutex::new(steps.into_iter().collect()),
            }
        }

        fn replying(reply: &str) -> Self {
            Self::with_script(vec![(0, Ok(reply.to_string()))])
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedGeneration {
        async fn generate(&self, _history: &[Turn]) -> Result<String, ServiceError> {
            let (delay_ms, result) = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted generation call");
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            result
        }
    }

    struct FixedTranscription {
        delay_ms: u64,
        result: Result<Option<String>, ServiceError>,
    }

    impl FixedTranscription {
        fn hearing(text: &str) -> Self {
            Self {
                delay_ms: 0,
                result: Ok(Some(text.to_string())),
            }
        }

        fn hearing_nothing() -> Self {
            Self {
                delay_ms: 0,
                result: Ok(None),
            }
        }
    }

    #[async_trait]
    impl TranscriptionService for FixedTranscription {
        async fn transcribe(&self, _audio: &str) -> Result<Option<String>, ServiceError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.result.clone()
        }
    }

    struct FixedSynthesis {
        result: Result<Option<SynthesizedAudio>, ServiceError>,
    }

    impl FixedSynthesis {
        fn speaking(audio: &str) -> Self {
            Self {
                result: Ok(Some(SynthesizedAudio {
                    audio: audio.to_string(),
                })),
            }
        }

        fn silent() -> Self {
            Self { result: Ok(None) }
        }
    }

    #[async_trait]
    impl SynthesisService for FixedSynthesis {
        async fn synthesize(&self, _text: &str) -> Result<Option<SynthesizedAudio>, ServiceError> {
            self.result.clone()
        }
    }

    fn controller_with(
        generation: ScriptedGeneration,
        transcription: FixedTranscription,
        synthesis: FixedSynthesis,
    ) -> (
        Arc<SessionController>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        let services = Arc::new(ServiceSet {
            generation: Arc::new(generation),
            transcription: Arc::new(transcription),
            synthesis: Arc::new(synthesis),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Arc::new(SessionController::new(
            "test-session".to_string(),
            services,
            0,
            tx,
        ));
        (controller, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn history_len(controller: &SessionController) -> usize {
        controller.history.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_text_pipeline_emits_ordered_events() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::replying("The RV400 is our flagship electric motorcycle."),
            FixedTranscription::hearing_nothing(),
            FixedSynthesis::speaking("UklGRg=="),
        );

        controller
            .handle_text_message("Tell me about the RV400".to_string())
            .await;

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ServerEvent::UserTranscript {
                    text: "Tell me about the RV400".to_string()
                },
                ServerEvent::TextResponse {
                    text: "The RV400 is our flagship electric motorcycle.".to_string()
                },
                ServerEvent::AudioResponse {
                    audio: "UklGRg==".to_string(),
                    transcript: "The RV400 is our flagship electric motorcycle.".to_string()
                },
            ]
        );
        assert_eq!(history_len(&controller), 2);
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_synthesis_empty_is_silent() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::replying("reply"),
            FixedTranscription::hearing_nothing(),
            FixedSynthesis::silent(),
        );

        controller.handle_text_message("hello".to_string()).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            ServerEvent::TextResponse {
                text: "reply".to_string()
            }
        );
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_generation_fault_emits_error_and_keeps_user_turn() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::with_script(vec![(
                0,
                Err(ServiceError::Upstream {
                    status: 503,
                    body: "model overloaded".to_string(),
                }),
            )]),
            FixedTranscription::hearing_nothing(),
            FixedSynthesis::silent(),
        );

        controller.handle_text_message("hello".to_string()).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            ServerEvent::Error { message } if message.contains("503")
        ));
        // The failed step appended nothing: only the user turn is present.
        assert_eq!(history_len(&controller), 1);
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_synthesis_fault_emits_error_after_text_response() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::replying("reply"),
            FixedTranscription::hearing_nothing(),
            FixedSynthesis {
                result: Err(ServiceError::Transport("connection reset".to_string())),
            },
        );

        controller.handle_text_message("hello".to_string()).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[1], ServerEvent::TextResponse { .. }));
        assert!(matches!(&events[2], ServerEvent::Error { .. }));
        // The reply itself survived; only the audio step failed.
        assert_eq!(history_len(&controller), 2);
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_single_flight_drops_messages_while_processing() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::with_script(vec![(100, Ok("slow reply".to_string()))]),
            FixedTranscription::hearing_nothing(),
            FixedSynthesis::silent(),
        );

        let running = controller.clone();
        let pipeline = tokio::spawn(async move {
            running.handle_text_message("first".to_string()).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(controller.is_processing());

        // Dropped without any state change or event. The generation fake
        // would panic if this ever reached the service.
        controller.handle_text_message("second".to_string()).await;
        controller.handle_audio_data("Zm9v".to_string()).await;

        pipeline.await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ServerEvent::UserTranscript {
                    text: "first".to_string()
                },
                ServerEvent::TextResponse {
                    text: "slow reply".to_string()
                },
            ]
        );
        assert_eq!(history_len(&controller), 2);
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_interrupt_suppresses_stale_generation_result() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::with_script(vec![(100, Ok("stale reply".to_string()))]),
            FixedTranscription::hearing_nothing(),
            FixedSynthesis::speaking("UklGRg=="),
        );

        let running = controller.clone();
        let pipeline = tokio::spawn(async move {
            running.handle_text_message("question".to_string()).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        controller.interrupt();
        assert!(!controller.is_processing());

        pipeline.await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ServerEvent::UserTranscript {
                    text: "question".to_string()
                },
                ServerEvent::Interrupted,
            ]
        );
        // The user turn was appended before the suspension point, so it
        // is present; the model turn was suppressed.
        assert_eq!(history_len(&controller), 1);
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_fresh_request_after_interrupt_is_not_clobbered() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::with_script(vec![
                (100, Ok("stale reply".to_string())),
                (0, Ok("fresh reply".to_string())),
            ]),
            FixedTranscription::hearing_nothing(),
            FixedSynthesis::silent(),
        );

        let running = controller.clone();
        let stale = tokio::spawn(async move {
            running.handle_text_message("first".to_string()).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.interrupt();

        // A fresh request right after the interrupt runs to completion
        // while the stale pipeline is still waiting on its remote call.
        controller.handle_text_message("second".to_string()).await;
        stale.await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ServerEvent::UserTranscript {
                    text: "first".to_string()
                },
                ServerEvent::Interrupted,
                ServerEvent::UserTranscript {
                    text: "second".to_string()
                },
                ServerEvent::TextResponse {
                    text: "fresh reply".to_string()
                },
            ]
        );
        // Two consecutive user turns: the documented alternation
        // looseness after an interrupt.
        assert_eq!(history_len(&controller), 3);
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_audio_pipeline_delegates_to_text_pipeline() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::replying("About 150 km per charge."),
            FixedTranscription::hearing("what is the range"),
            FixedSynthesis::silent(),
        );

        controller.handle_audio_data("Zm9v".to_string()).await;

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ServerEvent::UserTranscript {
                    text: "what is the range".to_string()
                },
                ServerEvent::TextResponse {
                    text: "About 150 km per charge.".to_string()
                },
            ]
        );
        assert_eq!(history_len(&controller), 2);
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_empty_transcription_reports_error_and_leaves_history_alone() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::with_script(vec![]),
            FixedTranscription::hearing_nothing(),
            FixedSynthesis::silent(),
        );

        controller.handle_audio_data("Zm9v".to_string()).await;

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![ServerEvent::error("Could not understand audio")]
        );
        assert_eq!(history_len(&controller), 0);
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_transcription_fault_reports_error() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::with_script(vec![]),
            FixedTranscription {
                delay_ms: 0,
                result: Err(ServiceError::Transport("connection refused".to_string())),
            },
            FixedSynthesis::silent(),
        );

        controller.handle_audio_data("Zm9v".to_string()).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ServerEvent::Error { message } if message.contains("connection refused")
        ));
        assert_eq!(history_len(&controller), 0);
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_interrupt_discards_pending_transcription() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::with_script(vec![]),
            FixedTranscription {
                delay_ms: 100,
                result: Ok(Some("too late".to_string())),
            },
            FixedSynthesis::silent(),
        );

        let running = controller.clone();
        let pipeline = tokio::spawn(async move {
            running.handle_audio_data("Zm9v".to_string()).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.interrupt();
        pipeline.await.unwrap();

        // The transcription resolved after the interrupt: nothing was
        // delegated, nothing was appended.
        let events = drain(&mut rx);
        assert_eq!(events, vec![ServerEvent::Interrupted]);
        assert_eq!(history_len(&controller), 0);
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_interrupt_while_idle_still_acknowledges() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::with_script(vec![]),
            FixedTranscription::hearing_nothing(),
            FixedSynthesis::silent(),
        );

        controller.interrupt();

        assert_eq!(drain(&mut rx), vec![ServerEvent::Interrupted]);
        assert!(!controller.is_processing());
    }

    #[tokio::test]
    async fn test_start_session_acknowledges() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::with_script(vec![]),
            FixedTranscription::hearing_nothing(),
            FixedSynthesis::silent(),
        );

        controller.start_session();

        assert_eq!(drain(&mut rx), vec![ServerEvent::SessionStarted]);
    }

    #[tokio::test]
    async fn test_clear_history_resets_the_log() {
        let (controller, mut rx) = controller_with(
            ScriptedGeneration::replying("reply"),
            FixedTranscription::hearing_nothing(),
            FixedSynthesis::silent(),
        );

        controller.handle_text_message("hello".to_string()).await;
        assert_eq!(history_len(&controller), 2);

        controller.clear_history();

        let events = drain(&mut rx);
        assert_eq!(events.last(), Some(&ServerEvent::HistoryCleared));
        assert_eq!(history_len(&controller), 0);
    }
}
