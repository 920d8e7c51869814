//! Core types for extraction records and persisted validations.
//!
//! Field names on the wire are camelCase; everything emitted by this crate
//! serializes to exactly the record contract consumed by the persistence layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel value emitted when no backend result could be paired with a record.
pub const NOT_FOUND: &str = "Not Found";

/// `documentSource` of placeholders produced from a backend failure.
pub const ERROR_SOURCE: &str = "ERROR";

/// `documentSource` of records salvaged field-by-field from corrupt output.
pub const RECOVERED_SOURCE: &str = "RECOVERED";

/// `documentSource` of placeholders for records the backend never answered.
pub const NOT_FOUND_SOURCE: &str = "NOT_FOUND";

/// Confidence assigned to candidates that omit one.
pub const DEFAULT_CONFIDENCE: f64 = 85.0;

/// Confidence assigned to records recovered by field-level regex salvage.
pub const RECOVERED_CONFIDENCE: f64 = 30.0;

/// A loosely-typed object decoded from backend output.
pub type Candidate = Value;

/// Status carried by an emitted extraction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    #[default]
    Valid,
    Invalid,
    Pending,
}

impl ValidationStatus {
    /// Lenient mapping from backend-supplied text. Unknown statuses need review.
    pub fn from_loose(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "valid" => Self::Valid,
            "invalid" => Self::Invalid,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Pending => "pending",
        }
    }
}

/// The wire/output unit produced by reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRecord {
    /// Identifier of the logical record; `None` for freshly created records
    pub identifier_id: Option<String>,

    /// Arbitrary JSON value extracted by the backend
    pub extracted_value: Value,

    pub validation_status: ValidationStatus,

    /// Backend explanation, or the reason a placeholder was emitted
    pub ai_reasoning: String,

    /// Confidence in percent (0-100)
    pub confidence_score: f64,

    pub document_source: String,
}

impl ExtractionRecord {
    /// Placeholder for an identifier the backend did not answer for.
    pub fn not_found(identifier_id: Option<String>, reasoning: impl Into<String>) -> Self {
        Self {
            identifier_id,
            extracted_value: Value::String(NOT_FOUND.to_string()),
            validation_status: ValidationStatus::Invalid,
            ai_reasoning: reasoning.into(),
            confidence_score: 0.0,
            document_source: NOT_FOUND_SOURCE.to_string(),
        }
    }

    /// Placeholder standing in for a record whose backend call failed.
    pub fn backend_error(identifier_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            identifier_id,
            extracted_value: Value::Null,
            validation_status: ValidationStatus::Invalid,
            ai_reasoning: error.into(),
            confidence_score: 0.0,
            document_source: ERROR_SOURCE.to_string(),
        }
    }

    /// True for "Not Found" and backend-error placeholders.
    pub fn is_placeholder(&self) -> bool {
        self.document_source == ERROR_SOURCE
            || (self.document_source == NOT_FOUND_SOURCE
                && self.extracted_value.as_str() == Some(NOT_FOUND))
    }

    /// Serialize back into candidate form.
    pub fn to_candidate(&self) -> Candidate {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// How a tool invocation relates to the calling record space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    CreateSingle,
    UpdateSingle,
    CreateMultiple,
    UpdateMultiple,
}

impl OperationKind {
    pub fn is_create(&self) -> bool {
        matches!(self, Self::CreateSingle | Self::CreateMultiple)
    }

    pub fn is_update(&self) -> bool {
        !self.is_create()
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self, Self::CreateMultiple | Self::UpdateMultiple)
    }
}

/// One named field in multi-field extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,

    pub identifier_id: String,

    #[serde(default = "default_data_type")]
    pub data_type: String,

    #[serde(default)]
    pub description: String,
}

fn default_data_type() -> String {
    "TEXT".to_string()
}

/// Operation metadata steering reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOperationMeta {
    pub operation_kind: OperationKind,

    #[serde(default)]
    pub multi_field_descriptors: Option<Vec<FieldDescriptor>>,
}

impl ToolOperationMeta {
    pub fn new(operation_kind: OperationKind) -> Self {
        Self {
            operation_kind,
            multi_field_descriptors: None,
        }
    }

    pub fn with_descriptors(mut self, descriptors: Vec<FieldDescriptor>) -> Self {
        self.multi_field_descriptors = Some(descriptors);
        self
    }
}

/// An input record supplied by the caller. Only `identifierId` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct InputRecord(pub Map<String, Value>);

impl InputRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Convenience constructor for a record carrying only an identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("identifierId".to_string(), Value::String(id.into()));
        Self(fields)
    }

    /// Builds an input record from an arbitrary JSON value; non-objects are
    /// kept under a `value` key.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            other => {
                let mut fields = Map::new();
                fields.insert("value".to_string(), other);
                Self(fields)
            }
        }
    }

    /// Identifier normalized for matching: surrounding whitespace removed.
    pub fn identifier_id(&self) -> Option<String> {
        self.0.get("identifierId").and_then(identifier_text)
    }

    /// Identifier exactly as the caller supplied it. Output records carry
    /// this form so they link back to the persisted input.
    pub fn raw_identifier_id(&self) -> Option<String> {
        self.0.get("identifierId").and_then(raw_identifier_text)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Identifier text from a JSON value; numeric identifiers are stringified.
pub(crate) fn identifier_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Identifier text without trimming; blank strings still count as absent.
pub(crate) fn raw_identifier_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Status of a validation in the persisted layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistedStatus {
    Pending,
    Invalid,
    Valid,
    Verified,
    Manual,
    Unverified,
    Extracted,
}

/// A validation row written by the persistence layer; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedValidation {
    pub identifier_id: Option<String>,

    pub step_id: String,

    #[serde(default)]
    pub project_id: String,

    #[serde(default)]
    pub field_name: String,

    #[serde(default)]
    pub extracted_value: Value,

    pub validation_status: PersistedStatus,

    #[serde(default)]
    pub confidence_score: f64,

    #[serde(default)]
    pub manually_verified: bool,

    #[serde(default)]
    pub manually_updated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_wire_shape() {
        let record = ExtractionRecord {
            identifier_id: Some("x1".to_string()),
            extracted_value: json!("B"),
            validation_status: ValidationStatus::Valid,
            ai_reasoning: "found in clause 4".to_string(),
            confidence_score: 92.0,
            document_source: "contract.pdf".to_string(),
        };

        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(
            wire,
            json!({
                "identifierId": "x1",
                "extractedValue": "B",
                "validationStatus": "valid",
                "aiReasoning": "found in clause 4",
                "confidenceScore": 92.0,
                "documentSource": "contract.pdf"
            })
        );
    }

    #[test]
    fn test_cleared_identifier_serializes_as_null() {
        let record = ExtractionRecord::backend_error(None, "boom");
        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(wire["identifierId"], Value::Null);
        assert_eq!(wire["documentSource"], "ERROR");
    }

    #[test]
    fn test_loose_status() {
        assert_eq!(ValidationStatus::from_loose("VALID"), ValidationStatus::Valid);
        assert_eq!(ValidationStatus::from_loose(" invalid "), ValidationStatus::Invalid);
        assert_eq!(ValidationStatus::from_loose("verified"), ValidationStatus::Pending);
    }

    #[test]
    fn test_input_record_identifier() {
        assert_eq!(InputRecord::with_id("abc").identifier_id().as_deref(), Some("abc"));
        let numeric = InputRecord::from_value(json!({"identifierId": 42}));
        assert_eq!(numeric.identifier_id().as_deref(), Some("42"));
        let scalar = InputRecord::from_value(json!("loose"));
        assert_eq!(scalar.identifier_id(), None);
    }

    #[test]
    fn test_operation_kind_serde() {
        let kind: OperationKind = serde_json::from_str("\"updateMultiple\"").unwrap();
        assert_eq!(kind, OperationKind::UpdateMultiple);
        assert!(kind.is_update());
        assert!(kind.is_multiple());
        assert!(OperationKind::CreateSingle.is_create());
    }

    #[test]
    fn test_persisted_validation_defaults() {
        let v: PersistedValidation = serde_json::from_value(json!({
            "identifierId": "r1",
            "stepId": "s1",
            "validationStatus": "extracted"
        }))
        .unwrap();
        assert_eq!(v.validation_status, PersistedStatus::Extracted);
        assert!(!v.manually_verified);
        assert_eq!(v.extracted_value, Value::Null);
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(ExtractionRecord::not_found(Some("a".into()), "missing").is_placeholder());
        assert!(ExtractionRecord::backend_error(Some("a".into()), "err").is_placeholder());
    }
}
