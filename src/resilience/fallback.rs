// src/resilience/fallback.rs
//! Ordered fallback execution for graceful degradation.

use std::future::Future;
use std::pin::Pin;

use crate::error::SourceError;

type StepFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;
type StepFn<'a, T> = Box<dyn FnOnce() -> StepFuture<'a, T> + Send + 'a>;

/// Tries named operations in order; the first success wins.
///
/// A one-element chain behaves exactly like calling the operation
/// directly: its error propagates unwrapped. With two or more steps, an
/// all-failed chain produces `FallbackExhausted` carrying every step's
/// error in the order tried.
pub struct FallbackChain<'a, T> {
    steps: Vec<(String, StepFn<'a, T>)>,
}

impl<'a, T> Default for FallbackChain<'a, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> FallbackChain<'a, T> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn step<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, SourceError>> + Send + 'a,
    {
        self.steps.push((name.into(), Box::new(move || Box::pin(f()))));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn execute(self) -> Result<T, SourceError> {
        let total = self.steps.len();
        let single = total == 1;
        let mut errors: Vec<(String, SourceError)> = Vec::new();

        for (i, (name, f)) in self.steps.into_iter().enumerate() {
            match f().await {
                Ok(value) => {
                    if i > 0 {
                        tracing::info!(
                            target: "resilience",
                            step = %name,
                            attempt = i + 1,
                            total,
                            "fallback step succeeded"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "resilience",
                        step = %name,
                        attempt = i + 1,
                        total,
                        error = %e,
                        "fallback step failed"
                    );
                    errors.push((name, e));
                }
            }
        }

        tracing::error!(
            target: "resilience",
            steps = total,
            "fallback chain exhausted"
        );
        if single {
            // Degenerate chain: behave like the bare operation.
            let (_, e) = errors.pop().expect("single step recorded");
            Err(e)
        } else {
            Err(SourceError::FallbackExhausted { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn first_success_wins_without_trying_later_steps() {
        let later = AtomicU32::new(0);
        let result = FallbackChain::new()
            .step("live", || async { Ok(1) })
            .step("cache", || async {
                later.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .execute()
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_through_in_order_until_success() {
        let result = FallbackChain::new()
            .step("live", || async { Err(SourceError::Transient("a".into())) })
            .step("mirror", || async { Err(SourceError::Timeout(std::time::Duration::from_secs(5))) })
            .step("cache", || async { Ok("cached") })
            .execute()
            .await;
        assert_eq!(result.unwrap(), "cached");
    }

    #[tokio::test]
    async fn exhausted_chain_aggregates_all_errors_in_order() {
        let result: Result<(), _> = FallbackChain::new()
            .step("live", || async { Err(SourceError::Transient("a".into())) })
            .step("cache", || async { Err(SourceError::Malformed("b".into())) })
            .execute()
            .await;
        match result {
            Err(SourceError::FallbackExhausted { errors }) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].0, "live");
                assert!(matches!(errors[0].1, SourceError::Transient(_)));
                assert_eq!(errors[1].0, "cache");
                assert!(matches!(errors[1].1, SourceError::Malformed(_)));
            }
            other => panic!("expected FallbackExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_step_chain_propagates_raw_error() {
        let result: Result<(), _> = FallbackChain::new()
            .step("live", || async { Err(SourceError::RateLimited("429".into())) })
            .execute()
            .await;
        assert!(matches!(result, Err(SourceError::RateLimited(_))));
    }
}
