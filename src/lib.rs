pub mod batcher;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod retry;
pub mod state;
pub mod upstream;

pub use batcher::BatchCoalescer;
pub use cache::{MemoryCache, RedisCache, ResultCache};
pub use clock::{Clock, TokioClock};
pub use config::{GovernorConfig, RateLimitConfig, RateLimitProfile};
pub use error::{GovernorError, Result};
pub use models::{FetchOptions, Priority};
pub use rate_limit::RateLimiter;
pub use retry::{RetryOptions, with_retry};
