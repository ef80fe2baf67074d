//! # WebSocket Connection Multiplexer
//!
//! Accepts duplex connections on `/ws` and gives each one a fresh
//! [`SessionController`] with an empty conversation history. The actor
//! owns nothing but glue: it decodes inbound frames into typed
//! [`ClientEvent`]s, routes them to the controller, and forwards the
//! controller's [`ServerEvent`]s back out as JSON text frames.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: plain HTTP upgrade, no query parameters required
//! 2. **Frames**: one JSON envelope per text frame (see `protocol`)
//! 3. **Pipelines**: `text_message`/`audio_data` run on a spawned task so
//!    the actor keeps reading, which is what lets an `interrupt` frame
//!    overtake an in-flight reply
//! 4. **Teardown**: on disconnect the controller and its history are
//!    dropped; there is no session resumption
//!
//! ## Session Management:
//! Each connection is one session. Live connections are capped by
//! `session.max_concurrent_sessions`; upgrades past the cap are answered
//! `503` before the WebSocket handshake completes.

use crate::protocol::{ClientEvent, ServerEvent};
use crate::session::SessionController;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// How often the server pings an idle connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a connection may stay silent before it is closed.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket actor for one conversational session.
///
/// ## Actor Model:
/// Each connection is an independent Actix actor; inbound frames for one
/// connection are handled in order on its context, while pipeline work
/// runs on spawned tasks and reports back through the event channel.
pub struct ChatWebSocket {
    /// Connection identifier, used for logging only
    session_id: String,

    /// The session state machine owned by this connection
    controller: Arc<SessionController>,

    /// Receiving half of the controller's event channel; moved into the
    /// actor context once the connection starts
    events: Option<mpsc::UnboundedReceiver<ServerEvent>>,

    /// Shared state, for session metrics
    app_state: web::Data<AppState>,

    /// Last time the peer gave any sign of life
    last_heartbeat: Instant,
}

impl ChatWebSocket {
    fn new(
        session_id: String,
        controller: Arc<SessionController>,
        events: mpsc::UnboundedReceiver<ServerEvent>,
        app_state: web::Data<AppState>,
    ) -> Self {
        Self {
            session_id,
            controller,
            events: Some(events),
            app_state,
            last_heartbeat: Instant::now(),
        }
    }

    /// Route a decoded client event. Handshake and control events touch
    /// session state directly; pipeline events are spawned so this actor
    /// keeps reading frames (otherwise `interrupt` could never overtake a
    /// running pipeline).
    fn dispatch(&self, event: ClientEvent) {
        match event {
            ClientEvent::StartSession => self.controller.start_session(),
            ClientEvent::TextMessage { text } => {
                let controller = self.controller.clone();
                tokio::spawn(async move {
                    controller.handle_text_message(text).await;
                });
            }
            ClientEvent::AudioData { audio } => {
                let controller = self.controller.clone();
                tokio::spawn(async move {
                    controller.handle_audio_data(audio).await;
                });
            }
            ClientEvent::Interrupt => self.controller.interrupt(),
            ClientEvent::ClearHistory => self.controller.clear_history(),
        }
    }

    /// Serialize an event straight onto the socket, bypassing the
    /// controller channel. Used for protocol faults the controller never
    /// sees.
    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(session_id = %self.session_id, error = %err, "Failed to serialize event"),
        }
    }
}

impl Actor for ChatWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "WebSocket session started");
        self.app_state.increment_active_sessions();

        // Forward controller events to the client as they are emitted.
        if let Some(events) = self.events.take() {
            ctx.add_stream(UnboundedReceiverStream::new(events));
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "WebSocket session stopped");
        self.app_state.decrement_active_sessions();

        // Cancel any in-flight pipeline; its events would go nowhere now,
        // and the remote results are discarded at the next check.
        self.controller.interrupt();
    }
}

/// Outbound leg: controller events become JSON text frames.
impl StreamHandler<ServerEvent> for ChatWebSocket {
    fn handle(&mut self, event: ServerEvent, ctx: &mut Self::Context) {
        self.send_event(ctx, &event);
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // The controller outlives every pipeline, so its channel only
        // closes when the actor itself is going away. Nothing to do.
    }
}

/// Inbound leg: WebSocket frames become client events.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChatWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        debug!(session_id = %self.session_id, "Dispatching client event");
                        self.dispatch(event);
                    }
                    Err(err) => {
                        // Protocol fault: report it, change nothing.
                        warn!(session_id = %self.session_id, error = %err, "Unparsable client frame");
                        self.send_event(
                            ctx,
                            &ServerEvent::error(format!("Invalid message: {}", err)),
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                self.send_event(
                    ctx,
                    &ServerEvent::error(
                        "Binary frames are not part of the session protocol; send JSON envelopes",
                    ),
                );
            }
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, ?reason, "WebSocket closed by client");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session_id, "Unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection a fresh session controller wired to the shared services.
pub async fn chat_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let config = app_state.get_config();

    if app_state.active_sessions() >= config.session.max_concurrent_sessions as u32 {
        warn!("Rejecting WebSocket connection: session limit reached");
        return Ok(HttpResponse::ServiceUnavailable().json(json!({
            "error": "Maximum concurrent sessions reached, try again later"
        })));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    info!(
        session_id = %session_id,
        peer = ?req.connection_info().peer_addr(),
        "New WebSocket connection"
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let controller = Arc::new(SessionController::new(
        session_id.clone(),
        app_state.services(),
        config.session.max_history_turns,
        events_tx,
    ));

    ws::start(
        ChatWebSocket::new(session_id, controller, events_rx, app_state),
        &req,
        stream,
    )
}
