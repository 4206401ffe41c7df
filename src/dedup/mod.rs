// src/dedup/mod.rs
//! Fuzzy deduplication of raw events.
//!
//! Weighted similarity (title 50%, venue 35%, time 15% by default) links
//! near-duplicates; connected components over that relation form
//! clusters; each cluster merges into one canonical event. Pure and
//! single-threaded: the whole event set goes in, canonical events come
//! out, and well-formed input never errors; missing fields only degrade
//! similarity scores.

pub mod cluster;
pub mod merge;
pub mod similarity;

use metrics::{counter, histogram};

pub use merge::MergeAudit;
pub use similarity::SimilarityScore;

use crate::config::DedupConfig;
use crate::model::{CanonicalEvent, RawEvent};
use crate::obs::ensure_metrics_described;

/// Result of one dedup pass, with the audit trail of every merge.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub events: Vec<CanonicalEvent>,
    pub original_count: usize,
    pub duplicates_removed: usize,
    pub audit_trail: Vec<MergeAudit>,
}

impl DedupOutcome {
    /// Share of input events that were duplicates, as a percentage.
    pub fn dedup_rate(&self) -> f64 {
        if self.original_count == 0 {
            return 0.0;
        }
        self.duplicates_removed as f64 / self.original_count as f64 * 100.0
    }

    /// Human-readable report for run logs.
    pub fn summary(&self) -> String {
        if self.audit_trail.is_empty() {
            return "No duplicates found.".to_string();
        }
        let mut lines = vec![
            "Deduplication Summary:".to_string(),
            format!("  Original events: {}", self.original_count),
            format!("  Duplicates removed: {}", self.duplicates_removed),
            format!("  Final events: {}", self.events.len()),
            format!("  Dedup rate: {:.1}%", self.dedup_rate()),
            String::new(),
            "Merged events:".to_string(),
        ];
        for entry in &self.audit_trail {
            lines.push(format!(
                "  - {} (similarity: {:.0}%)",
                entry.reason,
                entry.similarity * 100.0
            ));
        }
        lines.join("\n")
    }
}

/// Clusters near-duplicate events and merges each cluster into one
/// canonical record. Configuration is validated at load time; the engine
/// itself never fails on well-formed input.
#[derive(Debug, Clone)]
pub struct DedupEngine {
    cfg: DedupConfig,
}

impl DedupEngine {
    pub fn new(cfg: DedupConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.cfg
    }

    pub fn dedupe(&self, events: &[RawEvent]) -> DedupOutcome {
        ensure_metrics_described();
        let t0 = std::time::Instant::now();

        let clusters = cluster::cluster_indices(events, &self.cfg);
        let mut canonical = Vec::with_capacity(clusters.len());
        let mut audit_trail = Vec::new();
        for members in &clusters {
            let (event, audit) = merge::merge_cluster(events, members, &self.cfg);
            canonical.push(event);
            audit_trail.extend(audit);
        }

        let duplicates_removed = events.len() - canonical.len();
        histogram!("dedup_run_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("dedup_merged_total").increment(duplicates_removed as u64);
        tracing::info!(
            target: "dedup",
            input = events.len(),
            output = canonical.len(),
            merged = duplicates_removed,
            threshold = self.cfg.threshold,
            "dedup pass finished"
        );

        DedupOutcome {
            events: canonical,
            original_count: events.len(),
            duplicates_removed,
            audit_trail,
        }
    }
}
