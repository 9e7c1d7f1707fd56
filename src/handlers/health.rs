use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;

use crate::state::AppState;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let limiter = state.governor.limiter();
    Json(serde_json::json!({
        "status": "healthy",
        "profile": state.profile.name(),
        "queue_len": limiter.queue_len(),
        "window_len": limiter.window_len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
