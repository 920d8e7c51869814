//! Observability sink for parsing and reconciliation.
//!
//! Components report what they recovered, repaired or papered over through an
//! injectable [`ExtractionObserver`]. Events are diagnostics only; nothing in
//! the functional contract depends on them.

use std::sync::Arc;

use serde::Serialize;

use crate::parser::RecoveryTier;

/// A diagnostic event raised while turning backend output into records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExtractionEvent {
    /// Candidates were obtained, possibly after repair
    ParseRecovered {
        tier: RecoveryTier,
        candidates: usize,
        truncated: bool,
    },

    /// Every recovery tier came up empty
    ParseFailed {
        offset: Option<usize>,
        length: usize,
    },

    /// A candidate was paired by position because no identifier matched
    IdentifierIndexFallback {
        index: usize,
        expected: Option<String>,
        found: Option<String>,
    },

    /// No candidate could be paired with an expected identifier
    NotFoundPlaceholder {
        index: usize,
        identifier_id: Option<String>,
    },

    /// Fewer candidates than reference records; values were reused by cycling
    CyclicDistribution {
        candidates: usize,
        references: usize,
    },

    /// Candidates beyond the expected output length were dropped
    SurplusCandidates { expected: usize, received: usize },

    /// A backend failure was turned into placeholder records
    BackendFailureDegraded { records: usize, error: String },

    /// A batch finished inside an invocation
    BatchCompleted {
        batch: usize,
        records: usize,
        degraded: bool,
    },

    /// A follow-up request was issued for records lost to truncation
    ContinuationRound {
        batch: usize,
        round: usize,
        unresolved: usize,
    },
}

/// Receives extraction events.
pub trait ExtractionObserver: Send + Sync {
    fn on_event(&self, event: &ExtractionEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExtractionObserver for TracingObserver {
    fn on_event(&self, event: &ExtractionEvent) {
        match event {
            ExtractionEvent::ParseRecovered {
                tier,
                candidates,
                truncated,
            } => {
                if *tier == RecoveryTier::Direct {
                    tracing::debug!(candidates, "Parsed backend response");
                } else {
                    tracing::warn!(tier = ?tier, candidates, truncated, "Recovered malformed backend response");
                }
            }
            ExtractionEvent::ParseFailed { offset, length } => {
                tracing::error!(offset = ?offset, length, "Backend response could not be parsed");
            }
            ExtractionEvent::IdentifierIndexFallback {
                index,
                expected,
                found,
            } => {
                tracing::warn!(
                    index,
                    expected = ?expected,
                    found = ?found,
                    "Backend did not preserve identifiers, paired by position"
                );
            }
            ExtractionEvent::NotFoundPlaceholder {
                index,
                identifier_id,
            } => {
                tracing::info!(index, identifier_id = ?identifier_id, "No result for record");
            }
            ExtractionEvent::CyclicDistribution {
                candidates,
                references,
            } => {
                tracing::warn!(candidates, references, "Reusing candidates across reference records");
            }
            ExtractionEvent::SurplusCandidates { expected, received } => {
                tracing::warn!(expected, received, "Dropping surplus candidates");
            }
            ExtractionEvent::BackendFailureDegraded { records, error } => {
                tracing::warn!(records, error = %error, "Backend failed, emitting placeholders");
            }
            ExtractionEvent::BatchCompleted {
                batch,
                records,
                degraded,
            } => {
                tracing::debug!(batch, records, degraded, "Batch completed");
            }
            ExtractionEvent::ContinuationRound {
                batch,
                round,
                unresolved,
            } => {
                tracing::info!(batch, round, unresolved, "Requesting continuation");
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ExtractionObserver for NullObserver {
    fn on_event(&self, _event: &ExtractionEvent) {}
}

/// The observer used when none is injected.
pub fn default_observer() -> Arc<dyn ExtractionObserver> {
    Arc::new(TracingObserver)
}
