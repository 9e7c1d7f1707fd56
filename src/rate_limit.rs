use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::RateLimitConfig;
use crate::error::{GovernorError, Result};
use crate::metrics::{QUEUE_DEPTH, QUEUE_TIMEOUTS};

// Waiting caller - owned by the queue until admitted or timed out
struct QueueEntry {
    priority: u32,
    seq: u64,
    enqueued_at: Instant,
    admit_tx: oneshot::Sender<()>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // BinaryHeap is a max-heap: higher priority wins, then the lower sequence
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct LimiterState {
    window: VecDeque<Instant>,
    queue: BinaryHeap<QueueEntry>,
    next_seq: u64,
    draining: bool,
}

struct LimiterInner {
    config: RateLimitConfig,
    admission_spacing: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<LimiterState>,
}

impl LimiterInner {
    fn state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prune(&self, state: &mut LimiterState, now: Instant) {
        while let Some(&oldest) = state.window.front() {
            if now.duration_since(oldest) >= self.config.window {
                state.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_capacity(&self, state: &LimiterState) -> bool {
        state.window.len() < self.config.requests_per_window
    }
}

// Clones share the same window and queue
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        Self::with_clock(config, Duration::from_millis(50), Arc::new(TokioClock))
    }

    pub fn with_clock(
        config: RateLimitConfig,
        admission_spacing: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        debug!(
            requests_per_window = config.requests_per_window,
            window_ms = config.window.as_millis() as u64,
            queue_timeout_ms = config.queue_timeout.as_millis() as u64,
            "rate limiter initialized"
        );
        Ok(Self {
            inner: Arc::new(LimiterInner {
                config,
                admission_spacing,
                clock,
                state: Mutex::new(LimiterState::default()),
            }),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.inner.config
    }

    pub async fn acquire_token(&self, priority: u32) -> Result<()> {
        let (seq, mut admit_rx) = {
            let mut state = self.inner.state();
            let now = self.inner.clock.now();
            self.inner.prune(&mut state, now);

            if self.inner.has_capacity(&state) {
                state.window.push_back(now);
                return Ok(());
            }

            let (admit_tx, admit_rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueueEntry {
                priority,
                seq,
                enqueued_at: now,
                admit_tx,
            });
            QUEUE_DEPTH.set(state.queue.len() as f64);
            debug!(priority, seq, queue_len = state.queue.len(), "request queued");
            (seq, admit_rx)
        };

        self.schedule_drain();

        let timeout = self.inner.config.queue_timeout;
        tokio::select! {
            admitted = &mut admit_rx => return admitted.map_err(|_| GovernorError::LimiterClosed),
            _ = self.inner.clock.sleep(timeout) => {}
        }

        let timed_out = {
            let mut state = self.inner.state();
            let before = state.queue.len();
            state.queue.retain(|entry| entry.seq != seq);
            QUEUE_DEPTH.set(state.queue.len() as f64);
            state.queue.len() < before
        };
        if timed_out {
            QUEUE_TIMEOUTS.inc();
            warn!(priority, timeout_ms = timeout.as_millis() as u64, "rate limit queue timeout");
            return Err(GovernorError::QueueTimeout(timeout));
        }

        // Admitted under the lock just before the timer fired
        admit_rx.await.map_err(|_| GovernorError::LimiterClosed)
    }

    pub fn release_token(&self) {
        self.schedule_drain();
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state().queue.len()
    }

    pub fn window_len(&self) -> usize {
        let mut state = self.inner.state();
        let now = self.inner.clock.now();
        self.inner.prune(&mut state, now);
        state.window.len()
    }

    fn schedule_drain(&self) {
        {
            let mut state = self.inner.state();
            if state.draining || state.queue.is_empty() {
                return;
            }
            state.draining = true;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(drain(inner));
    }
}

enum DrainStep {
    Admitted,
    WaitFor(Duration),
    Done,
}

// Single-flight: only one drain runs per limiter, guarded by `draining`
async fn drain(inner: Arc<LimiterInner>) {
    loop {
        let step = {
            let mut state = inner.state();
            let now = inner.clock.now();
            inner.prune(&mut state, now);

            if state.queue.is_empty() {
                state.draining = false;
                DrainStep::Done
            } else if !inner.has_capacity(&state) {
                // Sleep until the oldest timestamp leaves the window
                let oldest = state.window.front().copied().unwrap_or(now);
                let wait = (oldest + inner.config.window).saturating_duration_since(now);
                DrainStep::WaitFor(wait)
            } else {
                let mut step = DrainStep::Done;
                while let Some(entry) = state.queue.pop() {
                    // A dropped receiver means the caller went away
                    if entry.admit_tx.send(()).is_ok() {
                        state.window.push_back(now);
                        debug!(
                            priority = entry.priority,
                            seq = entry.seq,
                            waited_ms = now.duration_since(entry.enqueued_at).as_millis() as u64,
                            "queued request admitted"
                        );
                        step = DrainStep::Admitted;
                        break;
                    }
                }
                QUEUE_DEPTH.set(state.queue.len() as f64);
                if state.queue.is_empty() {
                    state.draining = false;
                    DrainStep::Done
                } else {
                    step
                }
            }
        };

        match step {
            DrainStep::Admitted => inner.clock.sleep(inner.admission_spacing).await,
            DrainStep::WaitFor(wait) => inner.clock.sleep(wait).await,
            DrainStep::Done => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(requests_per_window: usize, window_ms: u64, queue_timeout_ms: u64) -> RateLimiter {
        let config = RateLimitConfig {
            requests_per_window,
            window: Duration::from_millis(window_ms),
            max_waiting_time: Duration::from_millis(queue_timeout_ms),
            queue_timeout: Duration::from_millis(queue_timeout_ms),
        };
        RateLimiter::with_clock(config, Duration::from_millis(50), Arc::new(TokioClock)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn admits_immediately_under_quota() {
        let limiter = limiter(3, 1000, 5000);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire_token(1).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.window_len(), 3);
        assert_eq!(limiter.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_at_quota_until_window_expires() {
        let limiter = limiter(2, 1000, 5000);
        limiter.acquire_token(1).await.unwrap();
        limiter.acquire_token(1).await.unwrap();

        let waiting = tokio::spawn({
            let limiter = limiter.clone();
            async move { limiter.acquire_token(1).await }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!waiting.is_finished());
        assert_eq!(limiter.queue_len(), 1);

        limiter.release_token();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(waiting.is_finished());
        waiting.await.unwrap().unwrap();
        assert_eq!(limiter.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_timeout_rejects_and_never_admits() {
        let limiter = limiter(1, 10_000, 1000);
        limiter.acquire_token(1).await.unwrap();

        let start = Instant::now();
        let err = limiter.acquire_token(1).await.unwrap_err();
        assert!(matches!(err, GovernorError::QueueTimeout(_)));
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        assert_eq!(limiter.queue_len(), 0);

        // Capacity freeing later must not consume a slot for the rejected caller
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(limiter.window_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_by_priority_then_arrival() {
        let limiter = limiter(1, 1000, 60_000);
        limiter.acquire_token(1).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (name, priority) in [("low", 1), ("high", 3), ("medium", 2), ("medium-late", 2)] {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire_token(priority).await.unwrap();
                order.lock().unwrap().push(name);
            }));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            *order.lock().unwrap(),
            vec!["high", "medium", "medium-late", "low"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_admissions_from_queue() {
        let limiter = limiter(5, 1000, 60_000);
        for _ in 0..5 {
            limiter.acquire_token(1).await.unwrap();
        }

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..2 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire_token(1).await.unwrap();
                Instant::now()
            }));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap() - start);
        }
        admitted.sort();
        assert_eq!(admitted[0], Duration::from_millis(1000));
        assert_eq!(admitted[1], Duration::from_millis(1050));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_waiter_does_not_take_a_slot() {
        let limiter = limiter(1, 1000, 60_000);
        limiter.acquire_token(1).await.unwrap();

        let abandoned = tokio::spawn({
            let limiter = limiter.clone();
            async move { limiter.acquire_token(3).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        let live = tokio::spawn({
            let limiter = limiter.clone();
            async move { limiter.acquire_token(1).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(limiter.queue_len(), 2);

        abandoned.abort();
        assert!(abandoned.await.unwrap_err().is_cancelled());

        let start = Instant::now();
        live.await.unwrap().unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(998));
        assert_eq!(limiter.window_len(), 1);
        assert_eq!(limiter.queue_len(), 0);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = RateLimitConfig {
            requests_per_window: 0,
            ..RateLimitConfig::default()
        };
        assert!(RateLimiter::new(config).is_err());
    }
}
