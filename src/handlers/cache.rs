use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::info;

use crate::error::GovernorError;
use crate::state::AppState;

pub async fn invalidate_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<StatusCode, GovernorError> {
    state.governor.cache().del(&key).await?;
    info!(key = %key, "cache entry invalidated");
    Ok(StatusCode::NO_CONTENT)
}
