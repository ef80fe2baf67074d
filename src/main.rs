//! # Voice Agent Backend - Main Application Entry Point
//!
//! Entry point for the voice-agent-backend server: a real-time
//! conversational backend that mediates WebSocket sessions between clients
//! and the Gemini generation API, with remote speech-to-text and
//! text-to-speech services on either side of the reply pipeline.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the whole server is asynchronous; pipelines suspend
//!   at remote calls instead of blocking worker threads
//! - **Arc**: upstream service clients are built once and shared by every
//!   connection
//! - **Result<T, E> + ?**: startup fails fast with a clear error when the
//!   configuration or service wiring is wrong
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state and metrics
//! - **protocol**: the typed WebSocket message envelope
//! - **session**: per-connection controller and conversation history
//! - **services**: Gemini generation, transcription, synthesis clients
//! - **websocket**: the `/ws` connection multiplexer
//! - **health / handlers**: the auxiliary HTTP surface
//! - **middleware / error**: request telemetry and HTTP error mapping

mod config; // Configuration management (config.rs)
mod error; // Error handling types (error.rs)
mod handlers; // REST handlers (handlers/ directory)
mod health; // Health check endpoints (health.rs)
mod middleware; // Request telemetry (middleware/ directory)
mod protocol; // WebSocket message envelope (protocol.rs)
mod services; // Upstream AI service clients (services/ directory)
mod session; // Session controller and history (session/ directory)
mod state; // Application state management (state.rs)
mod websocket; // WebSocket connection multiplexer (websocket.rs)

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use services::{GeminiClient, RemoteSynthesis, RemoteTranscription, ServiceSet};
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handler task and polled by
/// the main task to stop the server gracefully.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** via `tracing`
/// 3. **Wires the upstream service clients** (generation, speech)
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** on SIGTERM/SIGINT
#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; environment variables still apply.
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-agent-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}, model {}",
        config.server.host, config.server.port, config.gemini.model
    );
    if config.gemini.api_key.is_empty() {
        // The server still starts so /health and /config work, but every
        // generation call will fail until GEMINI_API_KEY is provided.
        error!("No Gemini API key configured (set GEMINI_API_KEY)");
    }

    // Upstream clients are built once and shared by every connection; the
    // Gemini client is additionally kept as its concrete type for the
    // diagnostics endpoints.
    let gemini = Arc::new(GeminiClient::new(config.gemini.clone())?);
    let services = Arc::new(ServiceSet {
        generation: gemini.clone(),
        transcription: Arc::new(RemoteTranscription::new(&config.speech)?),
        synthesis: Arc::new(RemoteSynthesis::new(&config.speech)?),
    });

    let app_state = AppState::new(config.clone(), services, gemini);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::RequestTelemetry)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/models", web::get().to(handlers::list_models))
                    .route("/test-api", web::get().to(handlers::test_api)),
            )
            // Root-level conveniences: the liveness probe and the session
            // socket itself.
            .route("/health", web::get().to(health::health_check))
            .route("/ws", web::get().to(websocket::chat_websocket))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` controls the filter; without it the backend logs at debug
/// and actix at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_agent_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT on a background task and raise the global
/// shutdown flag, so in-flight requests get to finish before the process
/// exits.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag without busy-waiting.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
