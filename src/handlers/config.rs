use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`: the live configuration, with the API key
/// reduced to a configured/not-configured flag.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_body(&config)
    })))
}

/// `PUT /api/v1/config`: partial runtime update. The body names only the
/// fields to change; the merged result is validated before it replaces the
/// live configuration. Upstream clients read their settings at startup,
/// so endpoint and timeout changes take effect on restart.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_body(&current_config)
    })))
}

fn config_body(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "gemini": {
            "model": config.gemini.model,
            "temperature": config.gemini.temperature,
            "top_k": config.gemini.top_k,
            "top_p": config.gemini.top_p,
            "max_output_tokens": config.gemini.max_output_tokens,
            "request_timeout_secs": config.gemini.request_timeout_secs,
            "api_key_configured": !config.gemini.api_key.is_empty()
        },
        "speech": {
            "transcription_url": config.speech.transcription_url,
            "synthesis_url": config.speech.synthesis_url,
            "request_timeout_secs": config.speech.request_timeout_secs
        },
        "session": {
            "max_history_turns": config.session.max_history_turns,
            "max_concurrent_sessions": config.session.max_concurrent_sessions
        }
    })
}
