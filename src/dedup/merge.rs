// src/dedup/merge.rs
//! Cluster merge policy.
//!
//! One canonical record per cluster: identity fields come from the most
//! complete member, gap fields are filled in arrival order, provenance is
//! the union of every member's source.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::DedupConfig;
use crate::dedup::similarity;
use crate::model::{CanonicalEvent, RawEvent};

/// One merged-away member, for the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct MergeAudit {
    pub kept_key: String,
    pub merged_key: String,
    pub similarity: f64,
    pub title_similarity: f64,
    pub venue_similarity: f64,
    pub time_similarity: f64,
    pub reason: String,
}

/// Merge one cluster (member indices into `events`, arrival order) into a
/// canonical event plus audit entries for every absorbed member.
pub(crate) fn merge_cluster(
    events: &[RawEvent],
    member_indices: &[usize],
    cfg: &DedupConfig,
) -> (CanonicalEvent, Vec<MergeAudit>) {
    debug_assert!(!member_indices.is_empty());
    let members: Vec<&RawEvent> = member_indices.iter().map(|&i| &events[i]).collect();

    // Representative: most complete member; ties go to the earliest
    // arrival. `max_by_key` would keep the last of equals, so scan by hand.
    let mut rep = 0usize;
    for (i, m) in members.iter().enumerate().skip(1) {
        if m.completeness() > members[rep].completeness() {
            rep = i;
        }
    }
    let representative = members[rep];

    // Gap fields: first member in arrival order that has them.
    let start_time = members.iter().find_map(|m| m.start_time);
    let price = members.iter().find_map(|m| m.price.clone());

    let sources: BTreeSet<String> = members.iter().map(|m| m.source_id.clone()).collect();

    // Non-conflicting payload union, first member wins on key clashes.
    let mut extra = serde_json::Map::new();
    for m in &members {
        for (k, v) in &m.raw_payload {
            extra.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    let merge_confidence = mean_pairwise_similarity(&members, cfg);

    let mut audit = Vec::with_capacity(members.len().saturating_sub(1));
    for (i, m) in members.iter().enumerate() {
        if i == rep {
            continue;
        }
        let s = similarity::score(representative, m, cfg);
        audit.push(MergeAudit {
            kept_key: representative.dedupe_key(),
            merged_key: m.dedupe_key(),
            similarity: s.total,
            title_similarity: s.title,
            venue_similarity: s.venue,
            time_similarity: s.time,
            reason: format!(
                "merged '{}' ({}) into '{}' ({})",
                m.title, m.source_id, representative.title, representative.source_id
            ),
        });
    }

    let canonical = CanonicalEvent {
        title: representative.title.clone(),
        venue_name: representative.venue_name.clone(),
        start_time,
        price,
        sources,
        source_url: representative.source_url.clone(),
        merge_confidence,
        extra,
    };
    (canonical, audit)
}

/// Mean similarity over all member pairs; 1.0 for singletons.
fn mean_pairwise_similarity(members: &[&RawEvent], cfg: &DedupConfig) -> f64 {
    let n = members.len();
    if n < 2 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut pairs = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            sum += similarity::score(members[i], members[j], cfg).total;
            pairs += 1;
        }
    }
    sum / pairs as f64
}
