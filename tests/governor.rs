use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use storefront_governor::{
    BatchCoalescer, Clock, FetchOptions, GovernorConfig, GovernorError, MemoryCache,
    RateLimitConfig, RateLimiter, RetryOptions, TokioClock,
};

fn governor(requests_per_window: usize, window: Duration, queue_timeout: Duration) -> BatchCoalescer {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let config = GovernorConfig {
        rate_limit: RateLimitConfig {
            requests_per_window,
            window,
            max_waiting_time: queue_timeout,
            queue_timeout,
        },
        retry: RetryOptions {
            initial_delay: Duration::from_millis(100),
            ..RetryOptions::default()
        },
        ..GovernorConfig::default()
    };
    let limiter =
        RateLimiter::with_clock(config.rate_limit.clone(), config.admission_spacing, clock.clone()).unwrap();
    let cache = Arc::new(MemoryCache::with_clock("shop:", 3600, clock.clone()));
    BatchCoalescer::new(config, limiter, cache, clock)
}

#[tokio::test(start_paused = true)]
async fn batch_over_quota_waits_for_window_expiry() {
    let governor = governor(2, Duration::from_secs(1), Duration::from_secs(10));
    let calls = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for i in 0..4u32 {
        let governor = governor.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            let value: u32 = governor
                .add(
                    format!("product:{i}"),
                    move || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(i * 10)
                        }
                    },
                    FetchOptions::default(),
                )
                .await
                .unwrap();
            (value, start.elapsed())
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let (value, elapsed) = handle.await.unwrap();
        assert_eq!(value, i as u32 * 10);
        // Everyone shares the flush, which ends once the second window opens
        assert_eq!(elapsed, Duration::from_millis(1050));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn queue_timeout_fails_only_the_waiting_key() {
    let governor = governor(1, Duration::from_secs(60), Duration::from_secs(1));
    let options = FetchOptions::default().cache(false);

    let first = tokio::spawn({
        let governor = governor.clone();
        let options = options.clone();
        async move {
            governor
                .add("cart:1", || async { Ok("cart-1".to_string()) }, options)
                .await
        }
    });
    let second = tokio::spawn({
        let governor = governor.clone();
        async move {
            governor
                .add("cart:2", || async { Ok("cart-2".to_string()) }, options)
                .await
        }
    });

    assert_eq!(first.await.unwrap().unwrap(), "cart-1");
    match second.await.unwrap() {
        Err(GovernorError::BatchEntry { key, message, .. }) => {
            assert_eq!(key, "cart:2");
            assert!(message.contains("queue timeout"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(governor.limiter().queue_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn cached_key_is_served_after_invalidation_refetch() {
    let governor = governor(10, Duration::from_secs(1), Duration::from_secs(10));
    let calls = Arc::new(AtomicUsize::new(0));

    let fetch = |governor: BatchCoalescer, calls: Arc<AtomicUsize>| async move {
        governor
            .add::<usize, _, _>(
                "collections",
                move || {
                    let calls = calls.clone();
                    async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }
                },
                FetchOptions::default().ttl(30),
            )
            .await
            .unwrap()
    };

    assert_eq!(fetch(governor.clone(), calls.clone()).await, 1);
    assert_eq!(fetch(governor.clone(), calls.clone()).await, 1);

    governor.cache().del("collections").await.unwrap();
    assert_eq!(fetch(governor.clone(), calls.clone()).await, 2);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(fetch(governor.clone(), calls.clone()).await, 3);
}
