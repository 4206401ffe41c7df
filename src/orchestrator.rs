// src/orchestrator.rs
//! Concurrent fan-out over all configured sources.
//!
//! Each source runs through its own fallback/breaker/retry stack; no
//! source ever waits on another, and no single failure aborts the run.
//! The run as a whole is bounded by one overall time budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use metrics::{counter, gauge};
use serde::Serialize;
use thiserror::Error;

use crate::error::{ErrorKind, SourceError};
use crate::model::RawEvent;
use crate::obs::ensure_metrics_described;
use crate::resilience::breaker::BreakerRegistry;
use crate::resilience::fallback::FallbackChain;
use crate::resilience::health::{HealthMonitor, HealthStatus};
use crate::resilience::retry::RetryPolicy;
use crate::resilience::AttemptOutcome;
use crate::source::{EventSource, SourceDescriptor};

const DEFAULT_OVERALL_BUDGET: Duration = Duration::from_secs(60);

/// How one source ended the run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub count: usize,
    pub error: Option<ErrorKind>,
    pub health: HealthStatus,
}

/// Per-source outcome table for one orchestrated run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub statuses: Vec<SourceStatus>,
    pub total_events: usize,
}

impl RunReport {
    pub fn failed_sources(&self) -> Vec<&str> {
        self.statuses
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.source_id.as_str())
            .collect()
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Fetch Run Complete ===")?;
        writeln!(f, "Events collected: {}", self.total_events)?;
        writeln!(f, "Sources:")?;
        for s in &self.statuses {
            match &s.error {
                None => writeln!(f, "  {:<12} {:>4} events  [{}]", s.source_id, s.count, s.health)?,
                Some(kind) => {
                    writeln!(f, "  {:<12} FAILED: {}  [{}]", s.source_id, kind, s.health)?
                }
            }
        }
        Ok(())
    }
}

/// Successful run: whatever events we could get, plus the status table.
#[derive(Debug)]
pub struct RunOutcome {
    pub events: Vec<RawEvent>,
    pub report: RunReport,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Every configured source failed; there is nothing to build from.
    #[error("no source returned any events ({} sources failed)", .report.statuses.len())]
    AllSourcesFailed { report: RunReport },
}

/// Fans out one unit of work per configured source, concurrently, under
/// an overall deadline. Breaker and health state live in the registries
/// handed in at construction and survive across runs.
pub struct SourceOrchestrator {
    health: Arc<HealthMonitor>,
    breakers: Arc<BreakerRegistry>,
    overall_budget: Duration,
}

impl SourceOrchestrator {
    pub fn new(health: Arc<HealthMonitor>, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            health,
            breakers,
            overall_budget: DEFAULT_OVERALL_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.overall_budget = budget;
        self
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Fetch from every source. Partial failure is normal: a source that
    /// exhausts its retries, trips its breaker, or runs out of fallbacks
    /// is recorded in the report and skipped. The run errors only when no
    /// source call succeeded at all.
    pub async fn run(
        &self,
        sources: &[SourceDescriptor],
    ) -> Result<RunOutcome, OrchestratorError> {
        ensure_metrics_described();
        let budget = self.overall_budget;

        let results: Vec<(String, Result<Vec<RawEvent>, SourceError>)> =
            stream::iter(sources.iter().map(|desc| {
                let unit = self.fetch_source(desc);
                async move {
                    match tokio::time::timeout(budget, unit).await {
                        Ok(done) => done,
                        Err(_) => {
                            // The deadline cancelled this unit mid-flight.
                            // Its own reporting never ran, so account for
                            // it here: one Timeout outcome for health, one
                            // failure sample for the breaker.
                            self.health.record(
                                &desc.source_id,
                                &AttemptOutcome::failure(ErrorKind::Timeout, budget, 0),
                            );
                            self.breakers
                                .handle(&desc.source_id, &desc.resilience)
                                .record_failure();
                            tracing::warn!(
                                target: "orchestrator",
                                source = %desc.source_id,
                                budget_secs = budget.as_secs(),
                                "source cancelled by overall deadline"
                            );
                            (
                                desc.source_id.clone(),
                                Err(SourceError::Timeout(budget)),
                            )
                        }
                    }
                }
            }))
            .buffer_unordered(sources.len().max(1))
            .collect()
            .await;

        let mut by_id: HashMap<String, Result<Vec<RawEvent>, SourceError>> =
            results.into_iter().collect();

        let mut events = Vec::new();
        let mut statuses = Vec::with_capacity(sources.len());
        for desc in sources {
            let result = by_id
                .remove(&desc.source_id)
                .unwrap_or_else(|| Err(SourceError::Timeout(budget)));
            match result {
                Ok(batch) => {
                    statuses.push(SourceStatus {
                        source_id: desc.source_id.clone(),
                        count: batch.len(),
                        error: None,
                        health: self.health.status(&desc.source_id),
                    });
                    events.extend(batch);
                }
                Err(e) => {
                    counter!("fetch_source_failures_total").increment(1);
                    statuses.push(SourceStatus {
                        source_id: desc.source_id.clone(),
                        count: 0,
                        error: Some(e.kind()),
                        health: self.health.status(&desc.source_id),
                    });
                }
            }
        }

        counter!("fetch_events_total").increment(events.len() as u64);
        gauge!("fetch_run_last_ts").set(chrono::Utc::now().timestamp().max(0) as f64);

        let report = RunReport {
            total_events: events.len(),
            statuses,
        };

        tracing::info!(
            target: "orchestrator",
            events = events.len(),
            failed = report.failed_sources().len(),
            sources = sources.len(),
            "fetch run finished"
        );

        if report.statuses.iter().all(|s| s.error.is_some()) {
            return Err(OrchestratorError::AllSourcesFailed { report });
        }
        Ok(RunOutcome { events, report })
    }

    /// One source's unit of work: a fallback chain where every step runs
    /// the shared per-source breaker around a retried adapter call.
    async fn fetch_source(
        &self,
        desc: &SourceDescriptor,
    ) -> (String, Result<Vec<RawEvent>, SourceError>) {
        let source_id = desc.source_id.clone();
        let breaker = self.breakers.handle(&source_id, &desc.resilience);
        let retry = RetryPolicy::new(desc.resilience.clone());

        let mut steps: Vec<(String, Arc<dyn EventSource>)> =
            vec![(desc.primary.name().to_string(), desc.primary.clone())];
        for fb in &desc.fallbacks {
            steps.push((fb.name.clone(), fb.source.clone()));
        }

        let mut chain = FallbackChain::new();
        for (name, src) in steps {
            let breaker = breaker.clone();
            let retry = retry.clone();
            let health = self.health.clone();
            let sid = source_id.clone();
            chain = chain.step(name, move || async move {
                breaker
                    .call(|| {
                        retry.execute(&sid, &*health, || {
                            counter!("fetch_attempts_total").increment(1);
                            let src = src.clone();
                            async move { src.fetch().await }
                        })
                    })
                    .await
            });
        }

        let result = chain.execute().await;
        if let Err(e) = &result {
            self.record_rejections(&source_id, e);
            tracing::warn!(
                target: "orchestrator",
                source = %source_id,
                error = %e,
                "source failed for this run"
            );
        }
        (source_id, result)
    }

    /// Circuit-open rejections never pass through the retry observer (the
    /// wrapped call does not run), so they are accounted for here.
    fn record_rejections(&self, source_id: &str, error: &SourceError) {
        let mut rejections = 0u64;
        match error {
            SourceError::CircuitOpen(_) => rejections = 1,
            SourceError::FallbackExhausted { errors } => {
                rejections = errors
                    .iter()
                    .filter(|(_, e)| matches!(e, SourceError::CircuitOpen(_)))
                    .count() as u64;
            }
            _ => {}
        }
        for _ in 0..rejections {
            self.health.record(
                source_id,
                &AttemptOutcome::failure(ErrorKind::CircuitOpen, Duration::ZERO, 0),
            );
        }
        if rejections > 0 {
            counter!("circuit_rejections_total").increment(rejections);
        }
    }
}
