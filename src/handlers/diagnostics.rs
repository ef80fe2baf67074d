//! Diagnostics endpoint for verifying upstream generation connectivity
//! without opening a WebSocket session.
//!
//! `GET /api/v1/test-api` sends a one-shot "Hello" completion and reports
//! whether the configured API key and model actually work:
//! - upstream answered → `200` with the reply text
//! - upstream rejected the call (bad key, bad model) → `400` with details
//! - transport or shape fault → `500` with the diagnostic

use crate::services::ServiceError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn test_api(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    info!(model = %config.gemini.model, "Testing generation API connectivity");

    match state.gemini().probe().await {
        Ok(reply) => HttpResponse::Ok().json(json!({
            "status": "API key is working",
            "model": config.gemini.model,
            "response": reply
        })),
        Err(ServiceError::Upstream { status, body }) => HttpResponse::BadRequest().json(json!({
            "status": "API key issue",
            "model": config.gemini.model,
            "upstream_status": status,
            "details": body
        })),
        Err(err) => HttpResponse::InternalServerError().json(json!({
            "status": "Error testing API",
            "model": config.gemini.model,
            "error": err.to_string()
        })),
    }
}
