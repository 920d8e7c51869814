//! Cross-step gating.
//!
//! A record may enter a dependent step only when every value its predecessor
//! steps produced for it is validated and actually present. One failing
//! field excludes the whole record.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use serde_json::Value;

use crate::types::{InputRecord, PersistedStatus, PersistedValidation, NOT_FOUND};

/// Which identifiers may proceed into a dependent step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "identifiers", rename_all = "snake_case")]
pub enum StepEligibility {
    /// No predecessors: every record may proceed
    Unrestricted,

    /// Only these identifiers may proceed
    Only(BTreeSet<String>),
}

impl StepEligibility {
    pub fn allows(&self, identifier_id: &str) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Only(ids) => ids.contains(identifier_id),
        }
    }
}

/// Identifiers whose predecessor-step validations are all usable.
///
/// A validation is usable when its status is `valid` or `extracted` and its
/// value is present and not the "Not Found" sentinel. An empty predecessor
/// list means the step is not gated.
pub fn filter_records_with_all_previous_values_validated(
    validations: &[PersistedValidation],
    predecessor_step_ids: &[String],
) -> StepEligibility {
    if predecessor_step_ids.is_empty() {
        return StepEligibility::Unrestricted;
    }

    let eligible = group_by_identifier(validations, predecessor_step_ids)
        .into_iter()
        .filter(|(_, group)| group.iter().all(|v| is_usable(v)))
        .map(|(id, _)| id.to_string())
        .collect::<BTreeSet<_>>();

    tracing::debug!(
        predecessors = predecessor_step_ids.len(),
        eligible = eligible.len(),
        "Computed cross-step eligibility"
    );
    StepEligibility::Only(eligible)
}

/// For each identifier with at least one unusable predecessor value, the
/// field names that block it.
pub fn eligibility_breakdown(
    validations: &[PersistedValidation],
    predecessor_step_ids: &[String],
) -> BTreeMap<String, Vec<String>> {
    group_by_identifier(validations, predecessor_step_ids)
        .into_iter()
        .filter_map(|(id, group)| {
            let blocking: Vec<String> = group
                .iter()
                .filter(|v| !is_usable(v))
                .map(|v| v.field_name.clone())
                .collect();
            (!blocking.is_empty()).then(|| (id.to_string(), blocking))
        })
        .collect()
}

/// Keep the input records a dependent step may consume, in order.
/// Records without an identifier only pass when the step is unrestricted.
pub fn retain_eligible(records: Vec<InputRecord>, eligibility: &StepEligibility) -> Vec<InputRecord> {
    match eligibility {
        StepEligibility::Unrestricted => records,
        StepEligibility::Only(_) => records
            .into_iter()
            .filter(|r| {
                r.identifier_id()
                    .is_some_and(|id| eligibility.allows(&id))
            })
            .collect(),
    }
}

fn group_by_identifier<'a>(
    validations: &'a [PersistedValidation],
    predecessor_step_ids: &[String],
) -> BTreeMap<&'a str, Vec<&'a PersistedValidation>> {
    let steps: HashSet<&str> = predecessor_step_ids.iter().map(String::as_str).collect();

    let mut groups: BTreeMap<&str, Vec<&PersistedValidation>> = BTreeMap::new();
    for validation in validations {
        if !steps.contains(validation.step_id.as_str()) {
            continue;
        }
        if let Some(id) = validation.identifier_id.as_deref() {
            groups.entry(id).or_default().push(validation);
        }
    }
    groups
}

fn is_usable(validation: &PersistedValidation) -> bool {
    matches!(
        validation.validation_status,
        PersistedStatus::Valid | PersistedStatus::Extracted
    ) && has_value(&validation.extracted_value)
}

fn has_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => {
            let trimmed = s.trim();
            !trimmed.is_empty() && trimmed != NOT_FOUND
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}
