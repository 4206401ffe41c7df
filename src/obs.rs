// src/obs.rs
//! Metric registration. Counter/histogram series are described once so
//! they show up with help text on whatever recorder the host installs.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration.
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "fetch_events_total",
            "Raw events collected across all sources."
        );
        describe_counter!(
            "fetch_attempts_total",
            "Individual adapter attempts, including retries."
        );
        describe_counter!(
            "fetch_source_failures_total",
            "Sources that ended a run with a terminal error."
        );
        describe_counter!(
            "circuit_rejections_total",
            "Calls rejected by an open circuit without running."
        );
        describe_counter!(
            "dedup_merged_total",
            "Raw events removed by merging into a canonical record."
        );
        describe_histogram!(
            "dedup_run_ms",
            "Wall time of one dedup pass in milliseconds."
        );
        describe_gauge!(
            "fetch_run_last_ts",
            "Unix ts when the orchestrator last completed a run."
        );
    });
}
