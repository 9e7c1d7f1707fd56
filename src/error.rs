use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GovernorError>;

#[derive(Debug, Error)]
pub enum GovernorError {
    /// Queued caller was not admitted within the configured queue timeout
    #[error("Rate limit queue timeout after {0:?}")]
    QueueTimeout(Duration),

    #[error("Rate limiter shut down before admission")]
    LimiterClosed,

    /// Classified failure reported by the upstream API
    #[error("Upstream API error ({code}): {message}")]
    Api {
        message: String,
        code: String,
        status: Option<u16>,
    },

    /// One key of a batch failed; siblings are unaffected
    #[error("Batch entry '{key}' failed: {message}")]
    BatchEntry {
        key: String,
        message: String,
        status: Option<u16>,
    },

    #[error("Batch was dropped before it completed")]
    BatchAborted,

    #[error("Operation failed after retries")]
    RetriesExhausted,

    #[error("Request did not complete within {0:?}")]
    WaitExceeded(Duration),

    #[error("Cache Error: {0}")]
    Cache(String),

    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config Error: {0}")]
    Config(String),
}

impl GovernorError {
    pub fn api(message: impl Into<String>, code: impl Into<String>, status: Option<u16>) -> Self {
        GovernorError::Api {
            message: message.into(),
            code: code.into(),
            status,
        }
    }

    /// 4xx upstream errors are never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GovernorError::Api { status: Some(status), .. } if (400..500).contains(status)
        )
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_client_error()
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GovernorError::Api { status, .. } | GovernorError::BatchEntry { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<redis::RedisError> for GovernorError {
    fn from(err: redis::RedisError) -> Self {
        GovernorError::Cache(err.to_string())
    }
}

impl From<reqwest::Error> for GovernorError {
    fn from(err: reqwest::Error) -> Self {
        GovernorError::api(err.to_string(), "NETWORK_ERROR", Some(500))
    }
}
