// src/dedup/similarity.rs
//! Normalization and weighted pairwise similarity.
//!
//! Listings for the same event differ in casing, punctuation, promo
//! prefixes ("TONIGHT: ..."), and venue-name suffixes ("... Taproom").
//! Everything is normalized away before scoring so the fuzzy ratios only
//! see the words that matter.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::config::DedupConfig;
use crate::model::RawEvent;

/// Promotional prefixes stripped from titles before comparison.
const TITLE_PREFIXES: &[&str] = &["live:", "live -", "tonight:", "this week:", "event:"];
const TITLE_SUFFIXES: &[&str] = &["- live", "live!", "tonight!"];

/// Venue-type suffixes that sources attach inconsistently.
const VENUE_SUFFIXES: &[&str] = &[
    " bar",
    " pub",
    " club",
    " lounge",
    " theater",
    " theatre",
    " hall",
    " venue",
    " room",
    " stage",
    " arena",
    " center",
    " brewery",
    " brewing",
    " taproom",
    " restaurant",
    " grill",
];

fn strip_punct(s: &str) -> String {
    static RE_PUNCT: OnceCell<Regex> = OnceCell::new();
    let re = RE_PUNCT.get_or_init(|| Regex::new(r"(?u)[^\w\s]").unwrap());
    re.replace_all(s, "").to_string()
}

fn collapse_ws(s: &str) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    re.replace_all(s, " ").trim().to_string()
}

/// Normalize an event title: entity decode, lowercase, strip promo
/// prefixes/suffixes and punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let mut out = html_escape::decode_html_entities(title)
        .trim()
        .to_lowercase();

    for prefix in TITLE_PREFIXES {
        if let Some(rest) = out.strip_prefix(prefix) {
            out = rest.trim().to_string();
        }
    }
    for suffix in TITLE_SUFFIXES {
        if let Some(rest) = out.strip_suffix(suffix) {
            out = rest.trim().to_string();
        }
    }

    collapse_ws(&strip_punct(&out))
}

/// Normalize a venue name: entity decode, lowercase, strip venue-type
/// suffixes and a leading "the", strip punctuation, collapse whitespace.
pub fn normalize_venue(name: &str) -> String {
    let mut out = html_escape::decode_html_entities(name)
        .trim()
        .to_lowercase();

    for suffix in VENUE_SUFFIXES {
        if let Some(rest) = out.strip_suffix(suffix) {
            out = rest.trim_end().to_string();
        }
    }
    if let Some(rest) = out.strip_prefix("the ") {
        out = rest.to_string();
    }

    collapse_ws(&strip_punct(&out))
}

fn token_sort(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Title similarity in [0, 1]: edit-distance ratio over sorted tokens, so
/// word order does not matter. Zero if either side normalizes to nothing.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let (ta, tb) = (normalize_title(a), normalize_title(b));
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&token_sort(&ta), &token_sort(&tb))
}

/// Venue similarity in [0, 1]: 1.0 on exact normalized match, otherwise
/// token-overlap (Jaccard) ratio.
pub fn venue_similarity(a: &str, b: &str) -> f64 {
    let (va, vb) = (normalize_venue(a), normalize_venue(b));
    if va.is_empty() || vb.is_empty() {
        return 0.0;
    }
    if va == vb {
        return 1.0;
    }
    let sa: std::collections::HashSet<&str> = va.split_whitespace().collect();
    let sb: std::collections::HashSet<&str> = vb.split_whitespace().collect();
    let shared = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        shared as f64 / union as f64
    }
}

/// Time similarity in [0, 1]: full score inside the window, linear decay
/// to zero at the outer bound, zero when either start time is unknown.
/// Missing fields degrade the score; they never error.
pub fn time_similarity(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
    cfg: &DedupConfig,
) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    let diff_minutes = (a - b).num_minutes().abs();
    if diff_minutes <= cfg.time_window_minutes {
        1.0
    } else if diff_minutes >= cfg.time_outer_minutes {
        0.0
    } else {
        let span = (cfg.time_outer_minutes - cfg.time_window_minutes) as f64;
        1.0 - (diff_minutes - cfg.time_window_minutes) as f64 / span
    }
}

/// Weighted similarity between two events, with the component breakdown
/// kept for audit trails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityScore {
    pub total: f64,
    pub title: f64,
    pub venue: f64,
    pub time: f64,
}

pub fn score(a: &RawEvent, b: &RawEvent, cfg: &DedupConfig) -> SimilarityScore {
    let title = title_similarity(&a.title, &b.title);
    let venue = venue_similarity(&a.venue_name, &b.venue_name);
    let time = time_similarity(a.start_time, b.start_time, cfg);
    SimilarityScore {
        total: cfg.title_weight * title + cfg.venue_weight * venue + cfg.time_weight * time,
        title,
        venue,
        time,
    }
}
