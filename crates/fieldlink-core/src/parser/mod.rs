//! Response parsing.
//!
//! Turns raw backend text into an ordered list of candidate records. Strict
//! parsing is attempted first; on failure an ordered ladder of recovery
//! strategies runs until one yields at least one candidate. Only when the
//! whole ladder comes up empty is a [`ParseError`] returned.

mod strategies;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::observe::{default_observer, ExtractionEvent, ExtractionObserver};
use crate::types::{identifier_text, Candidate};

pub use strategies::{
    atomic_fields, bracket_slice, error_offset, escape_repair, escape_string_segments,
    leads_with_object, loose_objects, parse_list, strip_code_fences, truncate_at_boundary, RecoveryContext,
    RecoveryStrategy, RecoveryTier, DEFAULT_STRATEGIES,
};

/// Errors that can occur when parsing backend output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unrecoverable backend response: {message} (offset {offset:?}, length {length})")]
    Unrecoverable {
        message: String,
        offset: Option<usize>,
        length: usize,
    },
}

/// Candidates together with how they were obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedResponse {
    pub candidates: Vec<Candidate>,

    pub tier: RecoveryTier,

    /// The text looked cut off before the backend finished
    pub truncated: bool,
}

impl ParsedResponse {
    /// Identifier of the last candidate recovered, if it carries one.
    pub fn last_identifier(&self) -> Option<String> {
        self.candidates
            .last()
            .and_then(|c| c.get("identifierId"))
            .and_then(identifier_text)
    }

    pub fn recovered_count(&self) -> usize {
        self.candidates.len()
    }
}

/// Parses backend text into candidate records.
pub struct ResponseParser {
    strategies: Vec<RecoveryStrategy>,
    observer: Arc<dyn ExtractionObserver>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            strategies: DEFAULT_STRATEGIES.to_vec(),
            observer: default_observer(),
        }
    }

    /// Replace the recovery ladder.
    pub fn with_strategies(mut self, strategies: Vec<RecoveryStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExtractionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Parse, returning just the candidates.
    pub fn parse(&self, raw: &str) -> Result<Vec<Candidate>, ParseError> {
        self.parse_detailed(raw).map(|parsed| parsed.candidates)
    }

    /// Parse, reporting the recovery tier and truncation.
    pub fn parse_detailed(&self, raw: &str) -> Result<ParsedResponse, ParseError> {
        let cleaned = strip_code_fences(raw);
        if leads_with_object(&cleaned) {
            if let Ok(candidates) = parse_list(&cleaned) {
                return Ok(self.finish(candidates, RecoveryTier::Direct, false));
            }
        }
        let body = bracket_slice(&cleaned);

        let err = match parse_list(body) {
            Ok(candidates) => return Ok(self.finish(candidates, RecoveryTier::Direct, false)),
            Err(err) => err,
        };

        let offset = error_offset(body, &err);
        let ctx = RecoveryContext {
            body,
            error_offset: Some(offset),
        };
        let unterminated = !body.trim_end().ends_with(']');

        for strategy in &self.strategies {
            if let Some(candidates) = (strategy.recover)(&ctx).filter(|c| !c.is_empty()) {
                let truncated = strategy.tier == RecoveryTier::TruncationBoundary || unterminated;
                return Ok(self.finish(candidates, strategy.tier, truncated));
            }
        }

        self.observer.on_event(&ExtractionEvent::ParseFailed {
            offset: Some(offset),
            length: body.len(),
        });
        Err(ParseError::Unrecoverable {
            message: err.to_string(),
            offset: Some(offset),
            length: body.len(),
        })
    }

    fn finish(&self, candidates: Vec<Candidate>, tier: RecoveryTier, truncated: bool) -> ParsedResponse {
        self.observer.on_event(&ExtractionEvent::ParseRecovered {
            tier,
            candidates: candidates.len(),
            truncated,
        });
        ParsedResponse {
            candidates,
            tier,
            truncated,
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse with the default ladder and observer.
pub fn parse_response(raw: &str) -> Result<Vec<Candidate>, ParseError> {
    ResponseParser::new().parse(raw)
}
