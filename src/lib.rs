// src/lib.rs
// Public library surface for integration tests (and host binaries).
//
// Two subsystems: the resilience stack that wraps every unreliable source
// call (retry, circuit breaking, fallback, health tracking) and the dedup
// engine that folds near-duplicate listings into canonical events. Source
// adapters, templating, and persistence live with the host.

pub mod config;
pub mod dedup;
pub mod error;
pub mod model;
mod obs;
pub mod orchestrator;
pub mod resilience;
pub mod source;

// ---- Re-exports for stable public API ----
pub use crate::config::{AggregatorConfig, DedupConfig, ResilienceConfig};
pub use crate::dedup::{DedupEngine, DedupOutcome, MergeAudit};
pub use crate::error::{ErrorKind, SourceError};
pub use crate::model::{CanonicalEvent, RawEvent};
pub use crate::orchestrator::{
    OrchestratorError, RunOutcome, RunReport, SourceOrchestrator, SourceStatus,
};
pub use crate::resilience::breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
pub use crate::resilience::fallback::FallbackChain;
pub use crate::resilience::health::{HealthMonitor, HealthSnapshot, HealthStatus};
pub use crate::resilience::retry::RetryPolicy;
pub use crate::resilience::{AttemptObserver, AttemptOutcome, NullObserver};
pub use crate::source::{EventSource, FallbackStep, SourceDescriptor};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH a debug build and `EVENT_AGG_DEV_LOG=1`, so
/// the host's own subscriber always wins in production.
pub fn init_dev_tracing() {
    let dev_flag = std::env::var("EVENT_AGG_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");
    if !(dev_flag && cfg!(debug_assertions)) {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("resilience=info,orchestrator=info,dedup=info,warn")
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}
