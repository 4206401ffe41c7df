// src/resilience/breaker.rs
//! Per-source circuit breaker.
//!
//! Failing fast while a source is known-dead keeps the retry machinery
//! from burning the run's latency budget on it. The half-open state lets
//! exactly one probe through; everything else is rejected until the probe
//! settles.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::time::Instant;

use crate::config::ResilienceConfig;
use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Failing; calls rejected without invoking the source.
    Open,
    /// Recovery timer elapsed; a single probe call is in flight or pending.
    HalfOpen,
}

/// Point-in-time view of one breaker, for reports.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    /// Failures currently inside the rolling window.
    pub failure_count: usize,
    pub failure_threshold: u32,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// Timestamps of recent failures, pruned against the window.
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Three-state breaker guarding one source. State is only ever changed by
/// explicit events: a recorded outcome, the recovery timer observed at
/// call time, or a manual reset.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    cfg: ResilienceConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: ResilienceConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Run `op` under breaker protection. Rejected immediately with
    /// `CircuitOpen` if the circuit is open (or a probe is already in
    /// flight); the operation is never invoked in that case.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, SourceError>>,
    {
        self.try_acquire()?;
        let result = op().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }

    /// Gate check. Never holds the lock across an await.
    fn try_acquire(&self) -> Result<(), SourceError> {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or_else(|| self.cfg.recovery_timeout());
                if elapsed >= self.cfg.recovery_timeout() {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!(
                        target: "resilience",
                        circuit = %self.name,
                        "circuit half-open, probing"
                    );
                    Ok(())
                } else {
                    Err(SourceError::CircuitOpen(self.name.clone()))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(SourceError::CircuitOpen(self.name.clone()))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failures.clear();
                inner.opened_at = None;
                inner.probe_in_flight = false;
                tracing::info!(
                    target: "resilience",
                    circuit = %self.name,
                    "probe succeeded, circuit closed"
                );
            }
            // Success clears the rolling failure count: only consecutive
            // within-window failures may trip the breaker.
            _ => inner.failures.clear(),
        }
    }

    /// Record a failed (or cancelled) call. Public so the orchestrator can
    /// account for units cancelled by the overall deadline, whose futures
    /// never get to report back themselves.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        let now = Instant::now();
        match inner.state {
            CircuitState::HalfOpen => {
                // Probe failed: back to open, recovery timer restarts.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                tracing::warn!(
                    target: "resilience",
                    circuit = %self.name,
                    "probe failed, circuit re-opened"
                );
            }
            CircuitState::Closed => {
                inner.failures.push_back(now);
                let window = self.cfg.failure_window();
                while let Some(&t) = inner.failures.front() {
                    if now.duration_since(t) > window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len() >= self.cfg.failure_threshold as usize {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    tracing::warn!(
                        target: "resilience",
                        circuit = %self.name,
                        failure_count = inner.failures.len(),
                        recovery_timeout_secs = self.cfg.recovery_timeout_secs,
                        "circuit opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    pub fn status(&self) -> CircuitStatus {
        let inner = self.inner.lock().expect("breaker mutex poisoned");
        CircuitStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failures.len(),
            failure_threshold: self.cfg.failure_threshold,
        }
    }

    /// Operator action: force the breaker back to its initial state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }
}

/// Process-wide keyed breaker state: one instance per source id, created
/// on first reference, reset only by explicit action. An explicit registry
/// rather than globals, so tests can build isolated instances.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breaker for `source_id`, created with `cfg` on first reference.
    /// Later calls return the existing instance; its state survives across
    /// runs for as long as the registry lives.
    pub fn handle(&self, source_id: &str, cfg: &ResilienceConfig) -> Arc<CircuitBreaker> {
        let mut map = self.breakers.lock().expect("registry mutex poisoned");
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(source_id, cfg.clone())))
            .clone()
    }

    pub fn statuses(&self) -> Vec<CircuitStatus> {
        let map = self.breakers.lock().expect("registry mutex poisoned");
        let mut out: Vec<_> = map.values().map(|b| b.status()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn reset(&self, source_id: &str) {
        let map = self.breakers.lock().expect("registry mutex poisoned");
        if let Some(b) = map.get(source_id) {
            b.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::{advance, Duration};

    fn cfg(threshold: u32, recovery_secs: u64) -> ResilienceConfig {
        ResilienceConfig {
            failure_threshold: threshold,
            failure_window_secs: 60,
            recovery_timeout_secs: recovery_secs,
            ..ResilienceConfig::default()
        }
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), SourceError> {
        b.call(|| async { Err(SourceError::Transient("down".into())) })
            .await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<&'static str, SourceError> {
        b.call(|| async { Ok("ok") }).await
    }

    #[tokio::test(start_paused = true)]
    async fn starts_closed_and_passes_through() {
        let b = CircuitBreaker::new("serpapi", cfg(3, 60));
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(succeed(&b).await.unwrap(), "ok");
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let b = CircuitBreaker::new("serpapi", cfg(3, 60));
        for _ in 0..2 {
            let _ = fail(&b).await;
            assert_eq!(b.state(), CircuitState::Closed);
        }
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_rejects_without_invoking() {
        let b = CircuitBreaker::new("serpapi", cfg(1, 60));
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = b
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(SourceError::CircuitOpen(name)) if name == "serpapi"));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let b = CircuitBreaker::new("serpapi", cfg(3, 60));
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        let _ = succeed(&b).await;
        // two more failures after the reset: still under threshold
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_outside_window_do_not_count() {
        let b = CircuitBreaker::new(
            "serpapi",
            ResilienceConfig {
                failure_threshold: 2,
                failure_window_secs: 1,
                ..ResilienceConfig::default()
            },
        );
        let _ = fail(&b).await;
        advance(Duration::from_secs(2)).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed, "stale failure expired");
    }

    #[tokio::test(start_paused = true)]
    async fn probe_allowed_after_recovery_timeout() {
        let b = CircuitBreaker::new("serpapi", cfg(1, 60));
        let _ = fail(&b).await;
        assert!(matches!(
            succeed(&b).await,
            Err(SourceError::CircuitOpen(_))
        ));

        advance(Duration::from_secs(61)).await;
        assert_eq!(succeed(&b).await.unwrap(), "ok");
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_and_restarts_timer() {
        let b = CircuitBreaker::new("serpapi", cfg(1, 60));
        let _ = fail(&b).await;
        advance(Duration::from_secs(61)).await;
        let _ = fail(&b).await; // probe fails
        assert_eq!(b.state(), CircuitState::Open);

        // timer restarted at the probe failure, not the original open
        advance(Duration::from_secs(30)).await;
        assert!(matches!(
            succeed(&b).await,
            Err(SourceError::CircuitOpen(_))
        ));
        advance(Duration::from_secs(31)).await;
        assert_eq!(succeed(&b).await.unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_during_probe_is_rejected() {
        let b = Arc::new(CircuitBreaker::new("serpapi", cfg(1, 60)));
        let _ = fail(&b).await;
        advance(Duration::from_secs(61)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let b = b.clone();
            tokio::spawn(async move {
                b.call(|| async {
                    let _ = release_rx.await;
                    Ok("probe")
                })
                .await
            })
        };
        // let the probe task reach its await point
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        // only one probe in flight at a time
        assert!(matches!(
            succeed(&b).await,
            Err(SourceError::CircuitOpen(_))
        ));

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap().unwrap(), "probe");
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reset_restores_initial_state() {
        let b = CircuitBreaker::new("serpapi", cfg(1, 60));
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(succeed(&b).await.unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn registry_returns_same_instance_per_source() {
        let registry = BreakerRegistry::new();
        let cfg = cfg(1, 60);
        let a = registry.handle("serpapi", &cfg);
        let _ = fail(&a).await;

        let again = registry.handle("serpapi", &cfg);
        assert_eq!(again.state(), CircuitState::Open, "state survives lookups");
        assert!(Arc::ptr_eq(&a, &again));

        let other = registry.handle("instagram", &cfg);
        assert_eq!(other.state(), CircuitState::Closed);
    }
}
