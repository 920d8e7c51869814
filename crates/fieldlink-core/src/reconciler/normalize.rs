//! Candidate normalization.
//!
//! Backends are asked for camelCase wire fields but regularly answer with
//! snake_case or shortened keys. Each wire field has a fixed alias list,
//! looked up in order.

use serde_json::Value;

use crate::types::{identifier_text, Candidate, ExtractionRecord, ValidationStatus, DEFAULT_CONFIDENCE};

const IDENTIFIER_KEYS: &[&str] = &["identifierId", "identifier_id", "id"];
const VALUE_KEYS: &[&str] = &["extractedValue", "extracted_value", "value"];
const STATUS_KEYS: &[&str] = &["validationStatus", "validation_status", "status"];
const REASONING_KEYS: &[&str] = &["aiReasoning", "ai_reasoning", "reasoning"];
const CONFIDENCE_KEYS: &[&str] = &["confidenceScore", "confidence_score", "confidence"];
const SOURCE_KEYS: &[&str] = &["documentSource", "document_source", "source"];

fn lookup<'a>(candidate: &'a Candidate, keys: &[&str]) -> Option<&'a Value> {
    let object = candidate.as_object()?;
    keys.iter().find_map(|key| object.get(*key))
}

/// Normalize a candidate into a record, defaulting absent fields.
///
/// Non-object candidates become the extracted value of an otherwise default
/// record.
pub fn normalize_candidate(candidate: &Candidate) -> ExtractionRecord {
    if !candidate.is_object() {
        return ExtractionRecord {
            identifier_id: None,
            extracted_value: candidate.clone(),
            validation_status: ValidationStatus::Valid,
            ai_reasoning: String::new(),
            confidence_score: DEFAULT_CONFIDENCE,
            document_source: String::new(),
        };
    }

    ExtractionRecord {
        identifier_id: lookup(candidate, IDENTIFIER_KEYS).and_then(identifier_text),
        extracted_value: lookup(candidate, VALUE_KEYS).cloned().unwrap_or(Value::Null),
        validation_status: lookup(candidate, STATUS_KEYS)
            .and_then(Value::as_str)
            .map(ValidationStatus::from_loose)
            .unwrap_or_default(),
        ai_reasoning: lookup(candidate, REASONING_KEYS)
            .map(text_of)
            .unwrap_or_default(),
        confidence_score: lookup(candidate, CONFIDENCE_KEYS)
            .and_then(confidence_of)
            .unwrap_or(DEFAULT_CONFIDENCE),
        document_source: lookup(candidate, SOURCE_KEYS)
            .map(text_of)
            .unwrap_or_default(),
    }
}

/// Identifier a candidate claims for itself, under any accepted alias.
pub fn candidate_identifier(candidate: &Candidate) -> Option<String> {
    lookup(candidate, IDENTIFIER_KEYS).and_then(identifier_text)
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn confidence_of(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    raw.is_finite().then(|| raw.clamp(0.0, 100.0))
}
