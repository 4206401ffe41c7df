// src/resilience/retry.rs
//! Retry with exponential backoff and jitter.

use std::future::Future;

use tokio::time::{sleep, Duration, Instant};

use crate::config::ResilienceConfig;
use crate::error::SourceError;
use crate::resilience::{AttemptObserver, AttemptOutcome};

/// Re-invokes a fallible operation until it succeeds, fails fatally, or
/// the attempt budget runs out. Every attempt, success or failure, is
/// reported to the observer with its latency.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    cfg: ResilienceConfig,
    retry_on: fn(&SourceError) -> bool,
}

impl RetryPolicy {
    pub fn new(cfg: ResilienceConfig) -> Self {
        Self {
            cfg,
            retry_on: SourceError::is_retryable,
        }
    }

    /// Replace the default retryable-vs-fatal classification.
    pub fn with_classifier(mut self, retry_on: fn(&SourceError) -> bool) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Run `op` with retries. Attempt 1 runs immediately; attempt k+1 runs
    /// after `min(max_delay, base_delay * 2^(k-1))` scaled by uniform
    /// jitter. Jitter is there so parallel sources don't retry in
    /// lockstep. A non-retryable error returns at once without consuming
    /// the remaining budget.
    pub async fn execute<T, F, Fut>(
        &self,
        source_id: &str,
        observer: &dyn AttemptObserver,
        mut op: F,
    ) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let started = Instant::now();
            let result = op().await;
            let latency = started.elapsed();

            match result {
                Ok(value) => {
                    observer.on_attempt(source_id, &AttemptOutcome::success(latency, attempt));
                    if attempt > 1 {
                        tracing::info!(
                            target: "resilience",
                            source = source_id,
                            attempt,
                            "recovered after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    observer.on_attempt(
                        source_id,
                        &AttemptOutcome::failure(e.kind(), latency, attempt),
                    );

                    if !(self.retry_on)(&e) {
                        tracing::warn!(
                            target: "resilience",
                            source = source_id,
                            attempt,
                            error = %e,
                            "fatal error, not retrying"
                        );
                        return Err(e);
                    }

                    if attempt >= self.cfg.max_attempts {
                        tracing::warn!(
                            target: "resilience",
                            source = source_id,
                            max_attempts = self.cfg.max_attempts,
                            error = %e,
                            "retries exhausted"
                        );
                        return Err(SourceError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }

                    let delay = self.backoff_delay(attempt, &e);
                    tracing::warn!(
                        target: "resilience",
                        source = source_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after backoff"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Deterministic backoff after attempt k: `min(max_delay, base * 2^(k-1))`.
    fn base_backoff(&self, attempt: u32) -> Duration {
        // Cap the shift; past ~20 doublings max_delay has long since won.
        let exp = attempt.saturating_sub(1).min(20);
        self.cfg
            .base_delay()
            .saturating_mul(1u32 << exp)
            .min(self.cfg.max_delay())
    }

    fn backoff_delay(&self, attempt: u32, err: &SourceError) -> Duration {
        let jittered = apply_jitter(self.base_backoff(attempt), self.cfg.jitter_fraction);
        // Rate limits get a floor: the upstream asked us to slow down,
        // so even an early attempt waits at least this long.
        if matches!(err, SourceError::RateLimited(_)) {
            jittered.max(self.cfg.rate_limit_floor())
        } else {
            jittered
        }
    }
}

/// Scale `delay` by a uniform factor in `[1 - fraction, 1 + fraction]`.
fn apply_jitter(delay: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return delay;
    }
    use rand::Rng;
    let factor = rand::rng().random_range((1.0 - fraction)..=(1.0 + fraction));
    delay.mul_f64(factor)
}
