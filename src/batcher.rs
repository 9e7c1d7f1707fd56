use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::ResultCache;
use crate::clock::{Clock, TokioClock};
use crate::config::GovernorConfig;
use crate::error::{GovernorError, Result};
use crate::metrics::{BATCH_SIZE, CACHE_HITS, CACHE_MISSES};
use crate::models::{FetchOptions, ResolvedOptions};
use crate::rate_limit::RateLimiter;
use crate::retry::with_retry;

type OperationFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
type Operation = Box<dyn FnMut() -> OperationFuture + Send>;

// Per-key failure, kept as message plus upstream status
#[derive(Debug, Clone)]
struct EntryError {
    message: String,
    status: Option<u16>,
}

type BatchResults = HashMap<String, std::result::Result<Value, EntryError>>;

// Request waiting for the next flush
struct BatchedRequest {
    key: String,
    operation: Operation,
    options: ResolvedOptions,
}

struct PendingBatch {
    requests: Vec<BatchedRequest>,
    done_tx: watch::Sender<Option<Arc<BatchResults>>>,
}

struct CoalescerInner {
    config: GovernorConfig,
    limiter: RateLimiter,
    cache: Arc<dyn ResultCache>,
    clock: Arc<dyn Clock>,
    pending: Mutex<Option<PendingBatch>>,
}

impl CoalescerInner {
    fn pending(&self) -> MutexGuard<'_, Option<PendingBatch>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Requests added within one batch window share a single flush
#[derive(Clone)]
pub struct BatchCoalescer {
    inner: Arc<CoalescerInner>,
}

impl BatchCoalescer {
    pub fn new(
        config: GovernorConfig,
        limiter: RateLimiter,
        cache: Arc<dyn ResultCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(CoalescerInner {
                config,
                limiter,
                cache,
                clock,
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(config: GovernorConfig, cache: Arc<dyn ResultCache>) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let limiter =
            RateLimiter::with_clock(config.rate_limit.clone(), config.admission_spacing, clock.clone())?;
        Ok(Self::new(config, limiter, cache, clock))
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.inner.cache
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.inner.config
    }

    pub async fn add<T, F, Fut>(&self, key: impl Into<String>, operation: F, options: FetchOptions) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        let config = &self.inner.config;
        let options = options.resolve(config.default_cache_ttl, config.retry.max_retries);
        let boxed: Operation = Box::new(move || -> OperationFuture {
            let fut = operation();
            Box::pin(async move { Ok(serde_json::to_value(fut.await?)?) })
        });

        let mut done_rx = self.enqueue(BatchedRequest {
            key: key.clone(),
            operation: boxed,
            options,
        });

        let results = match done_rx.wait_for(|results| results.is_some()).await {
            Ok(results) => Option::clone(&results),
            Err(_) => None,
        };
        let results = results.ok_or(GovernorError::BatchAborted)?;

        match results.get(&key) {
            Some(Ok(value)) => Ok(serde_json::from_value(value.clone())?),
            Some(Err(failure)) => Err(GovernorError::BatchEntry {
                key,
                message: failure.message.clone(),
                status: failure.status,
            }),
            None => Err(GovernorError::BatchAborted),
        }
    }

    fn enqueue(&self, request: BatchedRequest) -> watch::Receiver<Option<Arc<BatchResults>>> {
        let mut pending = self.inner.pending();
        let batch = pending.get_or_insert_with(|| {
            let (done_tx, _) = watch::channel(None);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(flush_after_window(inner));
            PendingBatch {
                requests: Vec::new(),
                done_tx,
            }
        });
        debug!(key = %request.key, batch_len = batch.requests.len() + 1, "request joined batch");
        batch.requests.push(request);
        batch.done_tx.subscribe()
    }
}

async fn flush_after_window(inner: Arc<CoalescerInner>) {
    inner.clock.sleep(inner.config.batch_window).await;

    // Taken under the lock, so a later add opens a fresh batch
    let batch = inner.pending().take();
    let Some(batch) = batch else {
        return;
    };

    let results = execute_batch(&inner, batch.requests).await;
    // Receivers may all be gone; nothing to deliver then
    let _ = batch.done_tx.send(Some(Arc::new(results)));
}

async fn execute_batch(inner: &CoalescerInner, mut requests: Vec<BatchedRequest>) -> BatchResults {
    BATCH_SIZE.observe(requests.len() as f64);
    debug!(batch_len = requests.len(), "flushing batch");

    requests.sort_by(|a, b| b.options.priority.value().cmp(&a.options.priority.value()));

    let mut results = BatchResults::new();
    for mut request in requests {
        if request.options.cache {
            match inner.cache.get(&request.key).await {
                Ok(Some(value)) => {
                    CACHE_HITS.inc();
                    debug!(key = %request.key, "cache hit");
                    results.insert(request.key, Ok(value));
                    continue;
                }
                Ok(None) => CACHE_MISSES.inc(),
                Err(e) => {
                    CACHE_MISSES.inc();
                    warn!(key = %request.key, error = %e, "cache read failed, executing");
                }
            }
        }

        let retry = inner.config.retry.clone().with_max_retries(request.options.retries);
        let priority = request.options.priority.value();
        let outcome = async {
            inner.limiter.acquire_token(priority).await?;
            with_retry(inner.clock.as_ref(), &retry, || (request.operation)()).await
        }
        .await;
        inner.limiter.release_token();

        match outcome {
            Ok(value) => {
                if request.options.cache {
                    if let Err(e) = inner
                        .cache
                        .set(&request.key, value.clone(), Some(request.options.ttl))
                        .await
                    {
                        warn!(key = %request.key, error = %e, "cache write failed");
                    }
                }
                results.insert(request.key, Ok(value));
            }
            Err(e) => {
                warn!(key = %request.key, error = %e, "batched request failed");
                results.insert(
                    request.key,
                    Err(EntryError {
                        message: e.to_string(),
                        status: e.status(),
                    }),
                );
            }
        }
    }
    results
}
