// tests/resilience_stack.rs
// The resilience layers composed by hand, the way the orchestrator wires
// them, but each observable on its own: retry feeding the health monitor,
// breaker wrapping retry, fallback over both.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use event_aggregator::{
    CircuitBreaker, CircuitState, FallbackChain, HealthMonitor, HealthStatus, NullObserver,
    ResilienceConfig, RetryPolicy, SourceError,
};

fn cfg() -> ResilienceConfig {
    ResilienceConfig {
        max_attempts: 3,
        base_delay_ms: 100,
        max_delay_ms: 2_000,
        jitter_fraction: 0.2,
        ..ResilienceConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn retry_attempts_land_in_the_health_window() {
    let health = HealthMonitor::new();
    let policy = RetryPolicy::new(cfg());
    let calls = Arc::new(AtomicU32::new(0));

    let c = calls.clone();
    let result = policy
        .execute("serpapi", &health, move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(SourceError::Transient("503".into()))
                } else {
                    Ok("events")
                }
            }
        })
        .await;
    assert_eq!(result.unwrap(), "events");

    let snap = health.snapshot();
    assert_eq!(snap.sources.len(), 1);
    let s = &snap.sources[0];
    assert_eq!(s.samples, 3, "every attempt observed, not just the last");
    assert!((s.failure_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(health.status("serpapi"), HealthStatus::Unhealthy);
}

#[tokio::test(start_paused = true)]
async fn backoff_sequence_stays_within_jitter_bounds() {
    // base 100ms, max 2s, jitter 0.2: attempt k waits within
    // [0.8, 1.2] * min(2s, 100ms * 2^(k-1))
    let policy = RetryPolicy::new(ResilienceConfig {
        max_attempts: 6,
        ..cfg()
    });

    let start = tokio::time::Instant::now();
    let result: Result<(), _> = policy
        .execute("probe", &NullObserver, || async {
            Err(SourceError::Transient("always down".into()))
        })
        .await;
    assert!(matches!(result, Err(SourceError::RetriesExhausted { .. })));

    // five sleeps: 100 + 200 + 400 + 800 + 1600 = 3100ms deterministic
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(2480) && elapsed <= Duration::from_millis(3720),
        "total backoff {elapsed:?} outside jitter envelope"
    );
}

#[tokio::test(start_paused = true)]
async fn breaker_wraps_retry_and_counts_terminal_failures() {
    let breaker = CircuitBreaker::new(
        "instagram",
        ResilienceConfig {
            failure_threshold: 2,
            ..cfg()
        },
    );
    let policy = RetryPolicy::new(ResilienceConfig {
        max_attempts: 2,
        ..cfg()
    });
    let adapter_calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
        let calls = adapter_calls.clone();
        let policy = policy.clone();
        let result: Result<(), _> = breaker
            .call(|| {
                policy.execute("instagram", &NullObserver, move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(SourceError::Transient("down".into()))
                    }
                })
            })
            .await;
        // one breaker sample per orchestrated call, not per attempt
        assert!(matches!(result, Err(SourceError::RetriesExhausted { .. })));
    }
    assert_eq!(adapter_calls.load(Ordering::SeqCst), 4);
    assert_eq!(breaker.state(), CircuitState::Open);

    // open circuit rejects before the retry stack ever runs
    let calls = adapter_calls.clone();
    let result: Result<(), _> = breaker
        .call(|| {
            policy.execute("instagram", &NullObserver, move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SourceError::Transient("down".into()))
                }
            })
        })
        .await;
    assert!(matches!(result, Err(SourceError::CircuitOpen(_))));
    assert_eq!(adapter_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn fallback_returns_first_success_and_only_tries_listed_steps() {
    let tried = Arc::new(AtomicU32::new(0));
    let t1 = tried.clone();
    let t2 = tried.clone();
    let t3 = tried.clone();

    let result = FallbackChain::new()
        .step("search-api", move || async move {
            t1.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Transient("a down".into()))
        })
        .step("social-feed", move || async move {
            t2.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::RateLimited("b limited".into()))
        })
        .step("cached-page", move || async move {
            t3.fetch_add(1, Ordering::SeqCst);
            Ok("cached events")
        })
        .execute()
        .await;

    assert_eq!(result.unwrap(), "cached events");
    assert_eq!(tried.load(Ordering::SeqCst), 3, "exactly the listed steps");
}

#[tokio::test]
async fn exhausted_fallback_reports_every_step_error() {
    let result: Result<(), _> = FallbackChain::new()
        .step("search-api", || async { Err(SourceError::Transient("a".into())) })
        .step("cached-page", || async { Err(SourceError::Malformed("b".into())) })
        .execute()
        .await;

    match result {
        Err(SourceError::FallbackExhausted { errors }) => {
            let names: Vec<&str> = errors.iter().map(|(n, _)| n.as_str()).collect();
            assert_eq!(names, vec!["search-api", "cached-page"]);
        }
        other => panic!("expected FallbackExhausted, got {other:?}"),
    }
}
