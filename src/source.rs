// src/source.rs
//! Adapter boundary.
//!
//! Source adapters (search API, social scraper, page scraper, ...) live
//! outside this crate. They implement `EventSource` and nothing else; all
//! retry, breaker, and fallback behavior is owned by the core. An adapter
//! that retries internally will skew the health window and the breaker's
//! failure accounting.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ResilienceConfig;
use crate::error::SourceError;
use crate::model::RawEvent;

/// One fetch against one external origin of event data.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch the current batch of raw events, or fail with a typed error.
    /// Must not retry internally.
    async fn fetch(&self) -> Result<Vec<RawEvent>, SourceError>;

    /// Short name for logs and fallback-step reporting.
    fn name(&self) -> &str;
}

/// A degraded alternative tried when the primary strategy fails, e.g. a
/// cached last-known-good page behind a live scrape.
#[derive(Clone)]
pub struct FallbackStep {
    pub name: String,
    pub source: Arc<dyn EventSource>,
}

impl FallbackStep {
    pub fn new(name: impl Into<String>, source: Arc<dyn EventSource>) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

/// Everything the orchestrator needs to run one configured source: the
/// primary adapter, its ordered fallbacks, and its resilience knobs.
#[derive(Clone)]
pub struct SourceDescriptor {
    pub source_id: String,
    pub primary: Arc<dyn EventSource>,
    pub fallbacks: Vec<FallbackStep>,
    pub resilience: ResilienceConfig,
}

impl SourceDescriptor {
    pub fn new(source_id: impl Into<String>, primary: Arc<dyn EventSource>) -> Self {
        Self {
            source_id: source_id.into(),
            primary,
            fallbacks: Vec::new(),
            resilience: ResilienceConfig::default(),
        }
    }

    pub fn with_fallback(mut self, step: FallbackStep) -> Self {
        self.fallbacks.push(step);
        self
    }

    pub fn with_resilience(mut self, cfg: ResilienceConfig) -> Self {
        self.resilience = cfg;
        self
    }
}

impl std::fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("source_id", &self.source_id)
            .field("fallbacks", &self.fallbacks.len())
            .field("resilience", &self.resilience)
            .finish()
    }
}
