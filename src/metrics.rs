use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, Histogram, register_counter, register_gauge, register_histogram};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("governor_requests_total", "Total number of governed requests").unwrap();
    pub static ref CACHE_HITS: Counter =
        register_counter!("governor_cache_hits_total", "Total cache hits").unwrap();
    pub static ref CACHE_MISSES: Counter =
        register_counter!("governor_cache_misses_total", "Total cache misses").unwrap();
    pub static ref CACHE_SIZE: Gauge =
        register_gauge!("governor_cache_size", "Current number of items in the memory cache").unwrap();
    pub static ref QUEUE_TIMEOUTS: Counter =
        register_counter!("governor_queue_timeouts_total", "Requests rejected after waiting in the admission queue").unwrap();
    pub static ref QUEUE_DEPTH: Gauge =
        register_gauge!("governor_queue_depth", "Requests waiting for rate limit admission").unwrap();
    pub static ref RETRY_ATTEMPTS: Counter =
        register_counter!("governor_retry_attempts_total", "Retries performed after transient failures").unwrap();
    pub static ref BATCH_SIZE: Histogram = register_histogram!(
        "governor_batch_size",
        "Requests executed per batch flush",
        vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0]
    )
    .unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "governor_request_latency_seconds",
        "Request latency in seconds"
    )
    .unwrap();
}
