use std::time::Duration;

use crate::batcher::BatchCoalescer;
use crate::config::RateLimitProfile;
use crate::upstream::UpstreamClient;

// app's shared state
pub struct AppState {
    pub governor: BatchCoalescer,
    pub upstream: UpstreamClient,
    pub profile: RateLimitProfile,
    pub max_waiting_time: Duration, // how long a caller may wait for its result
}
