use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{GovernorError, Result};
use crate::metrics::RETRY_ATTEMPTS;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.backoff_factor).min(self.max_delay)
    }
}

pub async fn with_retry<T, F, Fut>(
    clock: &dyn Clock,
    options: &RetryOptions,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    let mut delay = options.initial_delay;

    for attempt in 0..=options.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_client_error() => {
                debug!(error = %err, "client error, not retrying");
                return Err(err);
            }
            Err(err) => {
                if attempt == options.max_retries {
                    last_error = Some(err);
                    break;
                }
                warn!(
                    attempt = attempt + 1,
                    max_retries = options.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                RETRY_ATTEMPTS.inc();
                last_error = Some(err);
                clock.sleep(delay).await;
                delay = options.next_delay(delay);
            }
        }
    }

    Err(last_error.unwrap_or(GovernorError::RetriesExhausted))
}
