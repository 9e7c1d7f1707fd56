use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{GovernorError, Result};
use crate::models::UpstreamResponse;

// Every failure comes back as a classified GovernorError::Api
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    endpoint: String,
    token_header: String,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl UpstreamClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        token_header: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        // add https:// if not present
        let endpoint = if endpoint.starts_with("http") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        };
        Self {
            client,
            endpoint,
            token_header: token_header.into(),
            access_token,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn query(&self, query: &str, variables: Option<&Value>) -> Result<UpstreamResponse> {
        let mut payload = json!({ "query": query });
        if let Some(variables) = variables {
            payload["variables"] = variables.clone();
        }

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(token) = &self.access_token {
            request = request.header(self.token_header.as_str(), token);
        }

        // Transport failures map to NETWORK_ERROR / 500 via From<reqwest::Error>
        let res = request.send().await?;
        let status = res.status();
        let body: Value = res.json().await?;
        debug!(status = status.as_u16(), "upstream responded");

        classify(status.as_u16(), status.canonical_reason(), body)
    }
}

fn classify(status: u16, reason: Option<&str>, body: Value) -> Result<UpstreamResponse> {
    if let Some(first) = body
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
    {
        let error: GraphqlError = serde_json::from_value(first.clone()).unwrap_or(GraphqlError {
            message: first.to_string(),
            code: None,
        });
        return Err(GovernorError::api(
            error.message,
            error.code.unwrap_or_else(|| "UNKNOWN_ERROR".to_string()),
            Some(status),
        ));
    }

    if !(200..300).contains(&status) {
        return Err(GovernorError::api(
            format!("HTTP Error: {}", reason.unwrap_or("Unknown")),
            "HTTP_ERROR",
            Some(status),
        ));
    }

    Ok(UpstreamResponse { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_errors_use_first_message_and_code() {
        let body = json!({
            "errors": [
                { "message": "Throttled", "code": "THROTTLED" },
                { "message": "ignored" }
            ]
        });
        let err = classify(200, Some("OK"), body).unwrap_err();
        match err {
            GovernorError::Api { message, code, status } => {
                assert_eq!(message, "Throttled");
                assert_eq!(code, "THROTTLED");
                assert_eq!(status, Some(200));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_code_defaults_to_unknown() {
        let body = json!({ "errors": [{ "message": "bad query" }] });
        let err = classify(400, Some("Bad Request"), body).unwrap_err();
        assert!(err.is_client_error());
        assert!(matches!(err, GovernorError::Api { ref code, .. } if code == "UNKNOWN_ERROR"));
    }

    #[test]
    fn non_success_status_is_http_error() {
        let err = classify(503, Some("Service Unavailable"), json!({})).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Upstream API error (HTTP_ERROR): HTTP Error: Service Unavailable");
    }

    #[test]
    fn success_passes_body_through() {
        let body = json!({ "data": { "shop": { "name": "Demo" } } });
        let res = classify(200, Some("OK"), body.clone()).unwrap();
        assert_eq!(res, UpstreamResponse { status: 200, body });
    }

    #[test]
    fn endpoint_gets_scheme() {
        let client = UpstreamClient::new(reqwest::Client::new(), "shop.example/api/graphql.json", "X-Token", None);
        assert_eq!(client.endpoint(), "https://shop.example/api/graphql.json");
    }
}
