//! # Model Listing Handler
//!
//! Pass-through diagnostics over the generation API's model catalogue.
//!
//! ## Available Endpoints:
//! - `GET /api/v1/models` - List the models the Gemini API advertises
//!
//! ## Response:
//! ```json
//! {
//!   "timestamp": "2025-01-01T12:00:00Z",
//!   "models": [
//!     {
//!       "name": "models/gemini-1.5-flash",
//!       "displayName": "Gemini 1.5 Flash",
//!       "description": "Fast multimodal model"
//!     }
//!   ]
//! }
//! ```
//!
//! Upstream failures surface as `502` with the upstream status and body in
//! the error message; nothing is cached or retried here.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn list_models(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let models = state.gemini().list_models().await?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "models": models
    })))
}
