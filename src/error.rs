// src/error.rs
//! Error taxonomy for source calls.
//!
//! Every failure an adapter or resilience layer can produce is one of these
//! kinds; the retry/breaker/orchestrator layers dispatch on `kind()` and
//! `is_retryable()` rather than on strings.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// A failed call against an event source, at any layer of the stack.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network blip, 5xx-equivalent, or other short-lived upstream trouble.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The source told us to slow down. Retryable, but with a longer
    /// minimum backoff than a generic transient failure.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The adapter returned data it could not parse. Retrying will not help.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The call exceeded its time budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Rejected without invoking the source: its circuit is open.
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),

    /// The attempt budget ran out; wraps the last underlying error.
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<SourceError>,
    },

    /// Every step of a fallback chain failed. Keeps each step's error,
    /// in the order they were tried.
    #[error("fallback chain exhausted ({} steps failed)", .errors.len())]
    FallbackExhausted { errors: Vec<(String, SourceError)> },
}

/// Flat classification of a `SourceError`, used in per-source reports and
/// for health accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    RateLimited,
    Malformed,
    Timeout,
    CircuitOpen,
    RetriesExhausted,
    FallbackExhausted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::FallbackExhausted => "fallback_exhausted",
        };
        f.write_str(s)
    }
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Transient(_) => ErrorKind::Transient,
            SourceError::RateLimited(_) => ErrorKind::RateLimited,
            SourceError::Malformed(_) => ErrorKind::Malformed,
            SourceError::Timeout(_) => ErrorKind::Timeout,
            SourceError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            SourceError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            SourceError::FallbackExhausted { .. } => ErrorKind::FallbackExhausted,
        }
    }

    /// Whether the retry layer may try again after this error.
    /// Terminal wrappers (`RetriesExhausted`, `FallbackExhausted`) and an
    /// open circuit are never retried; neither is malformed data.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Transient(_) | SourceError::RateLimited(_) | SourceError::Timeout(_)
        )
    }
}
