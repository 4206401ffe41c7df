// src/config.rs
//! Configuration for the resilience stack and the dedup engine.
//!
//! Loaded from TOML by the host (file I/O stays outside this crate), then
//! validated here: bad weights or thresholds fail at load time, never in
//! the middle of a merge.

use std::time::Duration;

use serde::Deserialize;

pub const ENV_DEDUP_THRESHOLD: &str = "EVENT_DEDUP_THRESHOLD";

/// Per-source resilience knobs: retry budget, backoff shape, breaker
/// thresholds. One of these rides along with every `SourceDescriptor`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ResilienceConfig {
    /// Attempt budget for one logical call, including the first attempt.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Uniform jitter applied to every backoff delay, as a fraction of the
    /// deterministic delay. Keeps parallel sources from retrying in step.
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    /// Minimum backoff after a rate-limit response, regardless of attempt
    /// number.
    #[serde(default = "default_rate_limit_floor_ms")]
    pub rate_limit_floor_ms: u64,
    /// Consecutive within-window failures that trip the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Rolling window the failure counter is evaluated over.
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    /// How long an open circuit waits before allowing a probe.
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter_fraction() -> f64 {
    0.2
}
fn default_rate_limit_floor_ms() -> u64 {
    2_000
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_failure_window_secs() -> u64 {
    60
}
fn default_recovery_timeout_secs() -> u64 {
    60
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_fraction: default_jitter_fraction(),
            rate_limit_floor_ms: default_rate_limit_floor_ms(),
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

impl ResilienceConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
    pub fn rate_limit_floor(&self) -> Duration {
        Duration::from_millis(self.rate_limit_floor_ms)
    }
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts < 1 {
            anyhow::bail!("max_attempts must be >= 1, got {}", self.max_attempts);
        }
        if self.failure_threshold < 1 {
            anyhow::bail!(
                "failure_threshold must be >= 1, got {}",
                self.failure_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            anyhow::bail!(
                "jitter_fraction must be within 0..=1, got {}",
                self.jitter_fraction
            );
        }
        if self.max_delay_ms < self.base_delay_ms {
            anyhow::bail!(
                "max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms,
                self.base_delay_ms
            );
        }
        Ok(())
    }
}

/// Dedup engine knobs. The component weights must sum to 1.0; this is
/// checked once at load.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DedupConfig {
    /// Pairwise similarity at or above which two events join a cluster.
    ///
    /// Clustering is transitive closure over this relation, so a low
    /// threshold does not just merge more pairs, it lets unrelated events
    /// chain together through borderline neighbors. Lower with care.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Start times within this window score full time similarity.
    #[serde(default = "default_time_window_minutes")]
    pub time_window_minutes: i64,
    /// Time similarity decays linearly to zero at this bound.
    #[serde(default = "default_time_outer_minutes")]
    pub time_outer_minutes: i64,
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,
    #[serde(default = "default_venue_weight")]
    pub venue_weight: f64,
    #[serde(default = "default_time_weight")]
    pub time_weight: f64,
}

fn default_threshold() -> f64 {
    0.75
}
fn default_time_window_minutes() -> i64 {
    120
}
fn default_time_outer_minutes() -> i64 {
    480
}
fn default_title_weight() -> f64 {
    0.50
}
fn default_venue_weight() -> f64 {
    0.35
}
fn default_time_weight() -> f64 {
    0.15
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            time_window_minutes: default_time_window_minutes(),
            time_outer_minutes: default_time_outer_minutes(),
            title_weight: default_title_weight(),
            venue_weight: default_venue_weight(),
            time_weight: default_time_weight(),
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            anyhow::bail!("threshold must be within 0..=1, got {}", self.threshold);
        }
        let sum = self.title_weight + self.venue_weight + self.time_weight;
        if (sum - 1.0).abs() > 1e-6 {
            anyhow::bail!("similarity weights must sum to 1.0, got {sum}");
        }
        if self.title_weight < 0.0 || self.venue_weight < 0.0 || self.time_weight < 0.0 {
            anyhow::bail!("similarity weights must be non-negative");
        }
        if self.time_outer_minutes < self.time_window_minutes {
            anyhow::bail!(
                "time_outer_minutes ({}) must be >= time_window_minutes ({})",
                self.time_outer_minutes,
                self.time_window_minutes
            );
        }
        Ok(())
    }
}

/// Top-level config section as it appears in the host's TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AggregatorConfig {
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
}

impl AggregatorConfig {
    /// Parse and validate from a TOML string. An `EVENT_DEDUP_THRESHOLD`
    /// env var overrides the dedup threshold, clamped into [0, 1].
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let mut cfg: AggregatorConfig = toml::from_str(toml_str)?;

        if let Some(t) = parse_threshold_env(std::env::var(ENV_DEDUP_THRESHOLD).ok()) {
            cfg.dedup.threshold = t;
        }

        cfg.resilience.validate()?;
        cfg.dedup.validate()?;
        Ok(cfg)
    }
}

// parse optional float env and clamp to <0.0..=1.0>
fn parse_threshold_env(raw: Option<String>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .map(|v| v.clamp(0.0, 1.0))
}
