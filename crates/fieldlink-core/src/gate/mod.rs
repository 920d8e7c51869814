//! Validation gate.
//!
//! Reads persisted validations and decides which values, and which records,
//! may flow into a dependent workflow step. Nothing here writes state.

mod cross_step;

use serde::{Deserialize, Serialize};

use crate::types::{PersistedStatus, PersistedValidation};

pub use cross_step::{
    eligibility_breakdown, filter_records_with_all_previous_values_validated, retain_eligible,
    StepEligibility,
};

/// Minimum confidence for an `extracted` value to pass the general filter.
pub const EXTRACTED_CONFIDENCE_THRESHOLD: f64 = 70.0;

/// Below this share of reviewed validations a step still needs seeding.
pub const BOOTSTRAP_REVIEWED_FRACTION: f64 = 0.10;

/// Which statuses the general filter lets through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateConfig {
    pub include_manual: bool,
    pub include_valid: bool,
    pub include_verified: bool,
    pub include_extracted: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            include_manual: true,
            include_valid: true,
            include_verified: true,
            include_extracted: false,
        }
    }
}

impl GateConfig {
    /// Whether a single validation passes this configuration.
    pub fn accepts(&self, validation: &PersistedValidation) -> bool {
        let status = validation.validation_status;
        if matches!(status, PersistedStatus::Pending | PersistedStatus::Invalid) {
            return false;
        }

        (status == PersistedStatus::Verified && self.include_verified)
            || (status == PersistedStatus::Valid && self.include_valid)
            || ((status == PersistedStatus::Manual || validation.manually_verified)
                && self.include_manual)
            || (status == PersistedStatus::Extracted
                && self.include_extracted
                && validation.confidence_score >= EXTRACTED_CONFIDENCE_THRESHOLD)
            || (status == PersistedStatus::Unverified && validation.manually_updated)
    }
}

/// Keep the validations the configuration accepts, in input order.
pub fn filter_verified_validations<'a>(
    validations: &'a [PersistedValidation],
    config: &GateConfig,
) -> Vec<&'a PersistedValidation> {
    validations.iter().filter(|v| config.accepts(v)).collect()
}

/// Whether freshly extracted, unreviewed values should be shown for a step.
///
/// True while fewer than 10% of the step's validations have been reviewed
/// (`verified`, `valid` or `manual`), including when it has none at all.
pub fn should_include_unverified_data(validations: &[PersistedValidation], step_id: &str) -> bool {
    let (total, reviewed) = validations
        .iter()
        .filter(|v| v.step_id == step_id)
        .fold((0usize, 0usize), |(total, reviewed), v| {
            let is_reviewed = matches!(
                v.validation_status,
                PersistedStatus::Verified | PersistedStatus::Valid | PersistedStatus::Manual
            );
            (total + 1, reviewed + usize::from(is_reviewed))
        });

    if total == 0 {
        return true;
    }
    let fraction = reviewed as f64 / total as f64;
    tracing::debug!(step_id, total, reviewed, fraction, "Computed reviewed fraction");
    fraction < BOOTSTRAP_REVIEWED_FRACTION
}
