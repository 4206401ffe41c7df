// src/model.rs
//! Core event records.
//!
//! `RawEvent` is what an adapter hands us, untouched after construction.
//! `CanonicalEvent` is what the dedup engine produces: one record per
//! real-world event, with the provenance of every source that saw it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One event listing as reported by a single source. Never mutated after
/// creation; identity is source + payload only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    pub title: String,
    pub venue_name: String,
    pub start_time: Option<DateTime<Utc>>,
    /// Free-form price text ("Free", "$10-20"), as scraped.
    pub price: Option<String>,
    pub source_id: String,
    pub source_url: String,
    /// Opaque source payload, kept for merge fallback. Keys the core does
    /// not understand are carried through to the canonical record.
    #[serde(default)]
    pub raw_payload: serde_json::Map<String, serde_json::Value>,
}

impl RawEvent {
    /// Number of populated fields, used to pick a cluster representative.
    pub(crate) fn completeness(&self) -> usize {
        let mut n = 0;
        if !self.title.trim().is_empty() {
            n += 1;
        }
        if !self.venue_name.trim().is_empty() {
            n += 1;
        }
        if self.start_time.is_some() {
            n += 1;
        }
        if self.price.is_some() {
            n += 1;
        }
        n
    }

    /// Stable short digest over normalized title | date | venue, used to
    /// identify events in audit trails and logs without leaking raw text.
    pub fn dedupe_key(&self) -> String {
        use sha2::{Digest, Sha256};
        let title = crate::dedup::similarity::normalize_title(&self.title);
        let venue = crate::dedup::similarity::normalize_venue(&self.venue_name);
        let date = self
            .start_time
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(format!("{title}|{date}|{venue}").as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(12);
        for b in digest.iter().take(6) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

/// The merge output for one cluster of duplicates. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalEvent {
    pub title: String,
    pub venue_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub price: Option<String>,
    /// Every source that reported this event.
    pub sources: BTreeSet<String>,
    pub source_url: String,
    /// Mean pairwise similarity within the merged cluster, in [0, 1].
    /// 1.0 for singleton clusters.
    pub merge_confidence: f64,
    /// Union of the members' raw payloads, first member wins on key clashes.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
