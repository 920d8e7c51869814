//! # fieldlink-core
//!
//! Reconciliation core for document extraction tools.
//!
//! Language models and sandboxed functions answer extraction requests with
//! text that is supposed to be a JSON array of records. This crate turns
//! that text into records that line up with the caller's record space, and
//! decides which persisted values may feed the next workflow step.
//!
//! ## Key Guarantees
//!
//! 1. **Update operations keep identity**: one output record per input
//!    record, in input order, carrying the input's `identifierId`
//! 2. **Create operations never invent identity**: every `identifierId` is cleared
//! 3. **Gaps are explicit**: missing answers become "Not Found" placeholders
//!    with confidence 0, never silent drops
//! 4. **Pure**: no I/O beyond reading tool definition files
//!
//! ## Example
//!
//! ```rust,ignore
//! use fieldlink_core::{extract_records, InputRecord, OperationKind, ToolOperationMeta};
//!
//! let meta = ToolOperationMeta::new(OperationKind::UpdateMultiple);
//! let inputs = vec![InputRecord::with_id("x1"), InputRecord::with_id("x2")];
//! let raw = r#"```json
//! [{"identifierId": "x2", "extractedValue": "Delaware"}]
//! ```"#;
//!
//! let result = extract_records(&meta, raw, Some(&inputs), None)?;
//! assert_eq!(result.records.len(), 2);
//! ```

pub mod gate;
pub mod observe;
pub mod params;
pub mod parser;
pub mod reconciler;
pub mod tool;
pub mod types;

// Re-export main types at crate root
pub use gate::{
    eligibility_breakdown, filter_records_with_all_previous_values_validated,
    filter_verified_validations, retain_eligible, should_include_unverified_data, GateConfig,
    StepEligibility,
};
pub use observe::{ExtractionEvent, ExtractionObserver, NullObserver, TracingObserver};
pub use params::{
    ParameterDefinition, ParameterError, ParameterKind, ParameterTable, ResolvedParameters,
};
pub use parser::{parse_response, ParseError, ParsedResponse, RecoveryTier, ResponseParser};
pub use reconciler::{
    reconcile, BackendFailure, Reconciler, Reconciliation, ReconcileMode, ReconcileWarning,
};
pub use tool::{BackendKind, ToolDefinition, ToolError, MAX_BATCH_SIZE};
pub use types::{
    Candidate, ExtractionRecord, FieldDescriptor, InputRecord, OperationKind, PersistedStatus,
    PersistedValidation, ToolOperationMeta, ValidationStatus,
};

/// Parse raw backend text and reconcile it against the caller's records.
///
/// This is the main entry point for a single backend response.
///
/// # Arguments
///
/// * `meta` - Operation kind and optional multi-field descriptors
/// * `raw` - Backend text, possibly fenced, wrapped in prose or truncated
/// * `inputs` - The input record array the operation consumed
/// * `reference` - Existing identified records for updates without inputs
///
/// # Returns
///
/// The reconciled records with any gaps as warnings, or a [`ParseError`]
/// when nothing could be recovered from the text.
pub fn extract_records(
    meta: &ToolOperationMeta,
    raw: &str,
    inputs: Option<&[InputRecord]>,
    reference: Option<&[InputRecord]>,
) -> Result<Reconciliation, ParseError> {
    let candidates = parse_response(raw)?;
    Ok(reconcile(meta, &candidates, inputs, reference))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_update_with_missing_record() {
        let meta = ToolOperationMeta::new(OperationKind::UpdateMultiple);
        let inputs = vec![InputRecord::with_id("x1"), InputRecord::with_id("x2")];
        let raw = "```json\n[{\"identifierId\": \"x2\", \"extractedValue\": \"Delaware\"}]\n```";

        let result = extract_records(&meta, raw, Some(&inputs), None).unwrap();

        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[0].extracted_value, json!("Not Found"));
        assert_eq!(result.records[1].extracted_value, json!("Delaware"));
        assert_eq!(result.unresolved().count(), 1);
    }

    #[test]
    fn test_extract_create_from_truncated_text() {
        let meta = ToolOperationMeta::new(OperationKind::CreateMultiple);
        let raw = r#"[{"identifierId":"7","extractedValue":"Acme"},{"identifierId":"8","extractedValue":"Glob"#;

        let result = extract_records(&meta, raw, None, None).unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].identifier_id, None);
        assert_eq!(result.records[0].extracted_value, json!("Acme"));
    }

    #[test]
    fn test_extract_propagates_parse_failure() {
        let meta = ToolOperationMeta::new(OperationKind::UpdateSingle);
        let err = extract_records(&meta, "no json here", None, None).unwrap_err();
        assert!(matches!(err, ParseError::Unrecoverable { .. }));
    }

    #[test]
    fn test_records_serialize_to_wire_form() {
        let meta = ToolOperationMeta::new(OperationKind::UpdateSingle);
        let inputs = vec![InputRecord::with_id("r1")];
        let raw = r#"[{"identifierId":"r1","extractedValue":"NY","confidenceScore":92}]"#;

        let result = extract_records(&meta, raw, Some(&inputs), None).unwrap();
        let wire = serde_json::to_value(&result.records[0]).unwrap();

        assert_eq!(
            wire,
            json!({
                "identifierId": "r1",
                "extractedValue": "NY",
                "validationStatus": "valid",
                "aiReasoning": "",
                "confidenceScore": 92.0,
                "documentSource": ""
            })
        );
    }
}
