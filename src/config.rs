use clap::{Parser, ValueEnum};
use std::time::Duration;

use crate::error::{GovernorError, Result};
use crate::retry::RetryOptions;

// Named rate limit presets, one selection mechanism for all of them
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitProfile {
    Development,
    // "default" resolves to the conservative preset
    #[default]
    #[value(alias = "default")]
    Production,
    Aggressive,
    Relaxed,
}

impl RateLimitProfile {
    pub fn config(self) -> RateLimitConfig {
        match self {
            RateLimitProfile::Development => RateLimitConfig {
                requests_per_window: 100,
                window: Duration::from_secs(1),
                max_waiting_time: Duration::from_secs(10),
                queue_timeout: Duration::from_secs(15),
            },
            RateLimitProfile::Production => RateLimitConfig {
                requests_per_window: 50,
                window: Duration::from_secs(60),
                max_waiting_time: Duration::from_secs(5),
                queue_timeout: Duration::from_secs(10),
            },
            RateLimitProfile::Aggressive => RateLimitConfig {
                requests_per_window: 200,
                window: Duration::from_secs(1),
                max_waiting_time: Duration::from_secs(5),
                queue_timeout: Duration::from_secs(5),
            },
            RateLimitProfile::Relaxed => RateLimitConfig {
                requests_per_window: 25,
                window: Duration::from_secs(60),
                max_waiting_time: Duration::from_secs(20),
                queue_timeout: Duration::from_secs(30),
            },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RateLimitProfile::Development => "development",
            RateLimitProfile::Production => "production",
            RateLimitProfile::Aggressive => "aggressive",
            RateLimitProfile::Relaxed => "relaxed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Max admitted requests per rolling window
    pub requests_per_window: usize,
    pub window: Duration,
    /// Upper bound a caller of the HTTP surface waits for its result
    pub max_waiting_time: Duration,
    /// Max time a request may sit in the admission queue
    pub queue_timeout: Duration,
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.requests_per_window == 0 {
            return Err(GovernorError::Config(
                "requests_per_window must be at least 1".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(GovernorError::Config("window must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitProfile::default().config()
    }
}

/// Everything needed to assemble a governor instance.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub rate_limit: RateLimitConfig,
    /// Coalescing window of the batcher
    pub batch_window: Duration,
    /// Pause between successive admissions out of the queue
    pub admission_spacing: Duration,
    pub default_cache_ttl: u64,
    pub cache_prefix: String,
    pub retry: RetryOptions,
}

impl GovernorConfig {
    pub fn from_profile(profile: RateLimitProfile) -> Self {
        Self {
            rate_limit: profile.config(),
            ..Self::default()
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            batch_window: Duration::from_millis(50),
            admission_spacing: Duration::from_millis(50),
            default_cache_ttl: 3600,
            cache_prefix: "shop:".to_string(),
            retry: RetryOptions::default(),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Redis,
}

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "storefront-governor")]
#[command(about = "Rate limiting, batching and caching gateway for a storefront GraphQL API")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    // Upstream GraphQL endpoint
    #[arg(short, long, env = "STOREFRONT_ENDPOINT")]
    pub endpoint: String,

    #[arg(long, env = "STOREFRONT_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    #[arg(long, default_value = "X-Shopify-Storefront-Access-Token")]
    pub token_header: String,

    // Rate limit preset
    #[arg(long, value_enum, env = "RATE_LIMIT_PROFILE", default_value = "production")]
    pub profile: RateLimitProfile,

    #[arg(long, value_enum, default_value = "memory")]
    pub cache_backend: CacheBackendKind,

    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    pub redis_url: String,

    // Default cache TTL in seconds
    #[arg(short, long, default_value_t = 3600)]
    pub cache_ttl: u64,

    // Expired entry sweep interval for the memory cache (seconds, 0 disables)
    #[arg(long, default_value_t = 60)]
    pub sweep_interval: u64,
}

impl Args {
    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            default_cache_ttl: self.cache_ttl,
            ..GovernorConfig::from_profile(self.profile)
        }
    }
}
