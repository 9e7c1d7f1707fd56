mod cache;
mod health;
mod metrics;
mod query;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::GovernorError;

pub use cache::invalidate_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use query::query_handler;

impl IntoResponse for GovernorError {
    fn into_response(self) -> Response {
        let status = match &self {
            GovernorError::QueueTimeout(_) => StatusCode::TOO_MANY_REQUESTS,
            GovernorError::WaitExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            GovernorError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Upstream 4xx keeps its status, anything else is a bad gateway
            _ => self
                .status()
                .filter(|status| (400..500).contains(status))
                .and_then(|status| StatusCode::from_u16(status).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn client_errors_keep_their_status() {
        let err = GovernorError::BatchEntry {
            key: "product:missing".to_string(),
            message: "Product not found".to_string(),
            status: Some(404),
        };
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn server_and_timeout_errors_map_to_gateway_statuses() {
        let server = GovernorError::api("HTTP Error: Internal Server Error", "HTTP_ERROR", Some(500));
        assert_eq!(server.into_response().status(), StatusCode::BAD_GATEWAY);

        let queued = GovernorError::QueueTimeout(Duration::from_secs(10));
        assert_eq!(queued.into_response().status(), StatusCode::TOO_MANY_REQUESTS);

        let waited = GovernorError::WaitExceeded(Duration::from_secs(5));
        assert_eq!(waited.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
