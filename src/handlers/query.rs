use axum::{Json, extract::State};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::make_cache_key;
use crate::error::GovernorError;
use crate::metrics::{REQUEST_LATENCY, REQUEST_TOTAL};
use crate::models::{QueryRequest, UpstreamResponse};
use crate::state::AppState;

pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<UpstreamResponse>, GovernorError> {
    REQUEST_TOTAL.inc();
    let start_time = Instant::now();

    let QueryRequest {
        key,
        query,
        variables,
        options,
    } = payload;
    let key = key.unwrap_or_else(|| make_cache_key(&query, variables.as_ref()));

    let upstream = state.upstream.clone();
    let operation = move || {
        let upstream = upstream.clone();
        let query = query.clone();
        let variables = variables.clone();
        async move { upstream.query(&query, variables.as_ref()).await }
    };

    // The batch keeps running if the caller gives up waiting
    let result = tokio::time::timeout(
        state.max_waiting_time,
        state.governor.add(key, operation, options),
    )
    .await
    .map_err(|_| GovernorError::WaitExceeded(state.max_waiting_time))?;

    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());

    result.map(Json)
}
