// src/resilience/health.rs
//! Rolling per-source health.
//!
//! Purely observational: status feeds reports and operator tooling, it
//! never gates calls (the breaker does that). Keeping the two apart means
//! each can be tested on its own.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::error::ErrorKind;
use crate::resilience::{AttemptObserver, AttemptOutcome};

/// Outcomes considered per source when deriving status.
pub const DEFAULT_HEALTH_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => f.write_str("healthy"),
            HealthStatus::Degraded => f.write_str("degraded"),
            HealthStatus::Unhealthy => f.write_str("unhealthy"),
        }
    }
}

#[derive(Debug, Default)]
struct Record {
    /// Last N attempt outcomes as (succeeded, latency).
    window: VecDeque<(bool, Duration)>,
    /// Circuit-open rejections. The call never ran, so these stay out of
    /// the failure rate; an open breaker must not feed its own statistics.
    rejected: u64,
    last_error: Option<ErrorKind>,
}

/// Per-source health over a detailed report.
#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub source_id: String,
    pub status: HealthStatus,
    pub samples: usize,
    pub failure_rate: f64,
    pub rejected: u64,
    pub last_error: Option<ErrorKind>,
    pub mean_latency_ms: f64,
}

/// Full health report across all tracked sources.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub sources: Vec<SourceHealth>,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}

/// Keyed rolling windows of attempt outcomes. Created on first reference
/// to a source id; cleared only by explicit reset.
#[derive(Debug)]
pub struct HealthMonitor {
    window_size: usize,
    inner: Mutex<HashMap<String, Record>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_HEALTH_WINDOW)
    }

    pub fn with_window(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Record one completed attempt. Circuit-open outcomes are counted as
    /// rejections rather than failures.
    pub fn record(&self, source_id: &str, outcome: &AttemptOutcome) {
        let mut inner = self.inner.lock().expect("health mutex poisoned");
        let record = inner.entry(source_id.to_string()).or_default();

        if outcome.error_kind == Some(ErrorKind::CircuitOpen) {
            record.rejected += 1;
            return;
        }

        record.window.push_back((outcome.succeeded, outcome.latency));
        while record.window.len() > self.window_size {
            record.window.pop_front();
        }
        if !outcome.succeeded {
            record.last_error = outcome.error_kind;
        }
    }

    /// Status over the last N outcomes: failure rate >= 50% is unhealthy,
    /// >= 20% degraded, otherwise healthy. Unknown sources are healthy.
    pub fn status(&self, source_id: &str) -> HealthStatus {
        let inner = self.inner.lock().expect("health mutex poisoned");
        inner
            .get(source_id)
            .map(|r| derive_status(&r.window))
            .unwrap_or(HealthStatus::Healthy)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.lock().expect("health mutex poisoned");
        let mut sources: Vec<SourceHealth> = inner
            .iter()
            .map(|(id, r)| {
                let samples = r.window.len();
                let failures = r.window.iter().filter(|(ok, _)| !ok).count();
                let failure_rate = if samples > 0 {
                    failures as f64 / samples as f64
                } else {
                    0.0
                };
                let mean_latency_ms = if samples > 0 {
                    r.window
                        .iter()
                        .map(|(_, l)| l.as_secs_f64() * 1_000.0)
                        .sum::<f64>()
                        / samples as f64
                } else {
                    0.0
                };
                SourceHealth {
                    source_id: id.clone(),
                    status: derive_status(&r.window),
                    samples,
                    failure_rate,
                    rejected: r.rejected,
                    last_error: r.last_error,
                    mean_latency_ms,
                }
            })
            .collect();
        sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let healthy = sources
            .iter()
            .filter(|s| s.status == HealthStatus::Healthy)
            .count();
        let degraded = sources
            .iter()
            .filter(|s| s.status == HealthStatus::Degraded)
            .count();
        let unhealthy = sources.len() - healthy - degraded;
        HealthSnapshot {
            sources,
            healthy,
            degraded,
            unhealthy,
        }
    }

    /// Operator action: forget one source's history.
    pub fn reset(&self, source_id: &str) {
        let mut inner = self.inner.lock().expect("health mutex poisoned");
        inner.remove(source_id);
    }

    /// Operator action: forget everything.
    pub fn reset_all(&self) {
        let mut inner = self.inner.lock().expect("health mutex poisoned");
        inner.clear();
    }
}

impl AttemptObserver for HealthMonitor {
    fn on_attempt(&self, source_id: &str, outcome: &AttemptOutcome) {
        self.record(source_id, outcome);
    }
}

fn derive_status(window: &VecDeque<(bool, Duration)>) -> HealthStatus {
    if window.is_empty() {
        return HealthStatus::Healthy;
    }
    let failures = window.iter().filter(|(ok, _)| !ok).count();
    let rate = failures as f64 / window.len() as f64;
    if rate >= 0.5 {
        HealthStatus::Unhealthy
    } else if rate >= 0.2 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> AttemptOutcome {
        AttemptOutcome::success(Duration::from_millis(50), 1)
    }

    fn failed() -> AttemptOutcome {
        AttemptOutcome::failure(ErrorKind::Transient, Duration::from_millis(80), 1)
    }

    fn rejected() -> AttemptOutcome {
        AttemptOutcome::failure(ErrorKind::CircuitOpen, Duration::ZERO, 1)
    }

    #[test]
    fn unknown_source_is_healthy() {
        let m = HealthMonitor::new();
        assert_eq!(m.status("nobody"), HealthStatus::Healthy);
    }

    #[test]
    fn status_thresholds_over_window() {
        let m = HealthMonitor::new();
        for _ in 0..17 {
            m.record("serpapi", &ok());
        }
        for _ in 0..3 {
            m.record("serpapi", &failed());
        }
        // 3/20 = 15%
        assert_eq!(m.status("serpapi"), HealthStatus::Healthy);

        m.record("serpapi", &failed());
        // window slides: 4/20 = 20%
        assert_eq!(m.status("serpapi"), HealthStatus::Degraded);

        for _ in 0..6 {
            m.record("serpapi", &failed());
        }
        // 10/20 = 50%
        assert_eq!(m.status("serpapi"), HealthStatus::Unhealthy);
    }

    #[test]
    fn window_is_bounded() {
        let m = HealthMonitor::with_window(5);
        for _ in 0..5 {
            m.record("web", &failed());
        }
        assert_eq!(m.status("web"), HealthStatus::Unhealthy);
        for _ in 0..5 {
            m.record("web", &ok());
        }
        // old failures fell out of the window
        assert_eq!(m.status("web"), HealthStatus::Healthy);
    }

    #[test]
    fn rejections_do_not_enter_failure_rate() {
        let m = HealthMonitor::new();
        m.record("instagram", &ok());
        for _ in 0..10 {
            m.record("instagram", &rejected());
        }
        assert_eq!(m.status("instagram"), HealthStatus::Healthy);

        let snap = m.snapshot();
        let s = &snap.sources[0];
        assert_eq!(s.rejected, 10);
        assert_eq!(s.samples, 1);
    }

    #[test]
    fn snapshot_summarizes_sources() {
        let m = HealthMonitor::new();
        m.record("a", &ok());
        m.record("b", &failed());
        m.record("b", &failed());
        m.record("c", &ok());
        m.record("c", &failed());
        m.record("c", &ok());
        m.record("c", &ok());
        m.record("c", &ok());

        let snap = m.snapshot();
        assert_eq!(snap.sources.len(), 3);
        assert_eq!(snap.healthy, 1);
        assert_eq!(snap.degraded, 1); // c: 1/5 = 20%
        assert_eq!(snap.unhealthy, 1); // b: 2/2
        assert_eq!(snap.sources[1].last_error, Some(ErrorKind::Transient));
    }

    #[test]
    fn reset_forgets_history() {
        let m = HealthMonitor::new();
        m.record("a", &failed());
        assert_eq!(m.status("a"), HealthStatus::Unhealthy);
        m.reset("a");
        assert_eq!(m.status("a"), HealthStatus::Healthy);
        assert!(m.snapshot().sources.is_empty());
    }
}
