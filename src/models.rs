use serde::{Deserialize, Serialize};
use serde_json::Value;

// Request priority as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    // larger is admitted first
    pub fn value(self) -> u32 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

// Per-request options for the batcher; unset fields take their defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchOptions {
    pub cache: Option<bool>,
    /// Cache TTL in seconds
    pub ttl: Option<u64>,
    pub priority: Option<Priority>,
    pub retries: Option<u32>,
}

impl FetchOptions {
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    // retries is capped at the governor's configured ceiling
    pub fn resolve(&self, default_ttl: u64, max_retries: u32) -> ResolvedOptions {
        ResolvedOptions {
            cache: self.cache.unwrap_or(true),
            ttl: self.ttl.unwrap_or(default_ttl),
            priority: self.priority.unwrap_or_default(),
            retries: self.retries.unwrap_or(max_retries).min(max_retries),
        }
    }
}

// Options after defaults have been applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub cache: bool,
    pub ttl: u64,
    pub priority: Priority,
    pub retries: u32,
}

// GraphQL request accepted by the gateway
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct QueryRequest {
    /// Logical resource key; derived from query + variables when absent
    #[serde(default)]
    pub key: Option<String>,
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub options: FetchOptions,
}

// Successful upstream reply
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}
