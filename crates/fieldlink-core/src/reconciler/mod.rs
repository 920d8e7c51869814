//! Result reconciliation.
//!
//! Maps parsed candidates onto the caller's record space. Decision order:
//! 1. Multi-field descriptors without an input array: one record per
//!    descriptor, paired index-for-index.
//! 2. Create operations: candidates as-is with identifiers cleared.
//! 3. Update operations with inputs: one record per input, matched by
//!    identifier, then by position, then a "Not Found" placeholder.
//! 4. Update operations with an identified reference list: candidates
//!    cycled across the reference records.
//! 5. Anything else: candidates unchanged.
//!
//! Reconciliation never fails. Gaps surface as placeholder records plus
//! [`ReconcileWarning`]s.

mod normalize;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::observe::{default_observer, ExtractionEvent, ExtractionObserver};
use crate::types::{Candidate, ExtractionRecord, FieldDescriptor, InputRecord, ToolOperationMeta};

pub use normalize::{candidate_identifier, normalize_candidate};

/// A backend failure that cannot be degraded into placeholders.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Backend failure with no existing records to degrade to: {message}")]
pub struct BackendFailure {
    pub message: String,
}

/// Which reconciliation rule produced the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    MultiField,
    Create,
    UpdateByInput,
    UpdateByReference,
    PassThrough,
}

/// A non-fatal mismatch between candidates and the expected record space.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileWarning {
    /// The backend did not echo identifiers; a candidate was paired by position
    IdentifierNotPreserved {
        index: usize,
        expected: Option<String>,
        found: Option<String>,
    },

    /// No candidate could be paired; a placeholder was emitted
    NotFound {
        index: usize,
        identifier_id: Option<String>,
    },

    /// Fewer candidates than reference records; values were reused
    CyclicDistribution { candidates: usize, references: usize },

    /// More candidates than expected records
    SurplusCandidates { expected: usize, received: usize },
}

impl ReconcileWarning {
    fn to_event(&self) -> ExtractionEvent {
        match self.clone() {
            Self::IdentifierNotPreserved {
                index,
                expected,
                found,
            } => ExtractionEvent::IdentifierIndexFallback {
                index,
                expected,
                found,
            },
            Self::NotFound {
                index,
                identifier_id,
            } => ExtractionEvent::NotFoundPlaceholder {
                index,
                identifier_id,
            },
            Self::CyclicDistribution {
                candidates,
                references,
            } => ExtractionEvent::CyclicDistribution {
                candidates,
                references,
            },
            Self::SurplusCandidates { expected, received } => {
                ExtractionEvent::SurplusCandidates { expected, received }
            }
        }
    }
}

/// Reconciled records with the gaps encountered along the way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub mode: ReconcileMode,
    pub records: Vec<ExtractionRecord>,
    pub warnings: Vec<ReconcileWarning>,
}

impl Reconciliation {
    /// Records that are placeholders rather than backend answers.
    pub fn unresolved(&self) -> impl Iterator<Item = &ExtractionRecord> {
        self.records.iter().filter(|r| r.is_placeholder())
    }
}

/// Maps candidates onto the calling record space.
pub struct Reconciler {
    observer: Arc<dyn ExtractionObserver>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            observer: default_observer(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExtractionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Reconcile candidates against the operation and the caller's records.
    ///
    /// # Arguments
    ///
    /// * `meta` - Operation kind and optional multi-field descriptors
    /// * `candidates` - Output of the response parser
    /// * `inputs` - The input record array the operation consumed, if any
    /// * `reference` - Existing records with identifiers, used when no input
    ///   array was supplied to an update
    pub fn reconcile(
        &self,
        meta: &ToolOperationMeta,
        candidates: &[Candidate],
        inputs: Option<&[InputRecord]>,
        reference: Option<&[InputRecord]>,
    ) -> Reconciliation {
        let inputs = inputs.filter(|i| !i.is_empty());
        let descriptors = meta
            .multi_field_descriptors
            .as_deref()
            .filter(|d| !d.is_empty());

        let mut warnings = Vec::new();
        let (mode, records) = match (descriptors, inputs) {
            (Some(descriptors), None) => (
                ReconcileMode::MultiField,
                self.by_descriptor(descriptors, candidates, &mut warnings),
            ),
            _ if meta.operation_kind.is_create() => (ReconcileMode::Create, created(candidates)),
            (_, Some(inputs)) => (
                ReconcileMode::UpdateByInput,
                self.by_input(inputs, candidates, &mut warnings),
            ),
            (_, None) => match identified(reference) {
                Some(references) => (
                    ReconcileMode::UpdateByReference,
                    self.by_reference(&references, candidates, &mut warnings),
                ),
                None => (
                    ReconcileMode::PassThrough,
                    candidates.iter().map(normalize_candidate).collect(),
                ),
            },
        };

        for warning in &warnings {
            self.observer.on_event(&warning.to_event());
        }
        tracing::debug!(mode = ?mode, records = records.len(), warnings = warnings.len(), "Reconciled");

        Reconciliation {
            mode,
            records,
            warnings,
        }
    }

    /// Turn a backend failure into placeholders for every record the
    /// operation was meant to update.
    ///
    /// Create operations, and updates with nothing to update, have no
    /// existing records to degrade to and return the failure.
    pub fn degrade(
        &self,
        meta: &ToolOperationMeta,
        inputs: Option<&[InputRecord]>,
        reference: Option<&[InputRecord]>,
        error: &str,
    ) -> Result<Vec<ExtractionRecord>, BackendFailure> {
        let failure = || BackendFailure {
            message: error.to_string(),
        };
        if meta.operation_kind.is_create() {
            return Err(failure());
        }

        let inputs = inputs.filter(|i| !i.is_empty());
        let targets: Vec<Option<String>> = match (inputs, meta.multi_field_descriptors.as_deref()) {
            (Some(inputs), _) => inputs.iter().map(InputRecord::raw_identifier_id).collect(),
            (None, Some(descriptors)) if !descriptors.is_empty() => descriptors
                .iter()
                .map(|d| Some(d.identifier_id.clone()))
                .collect(),
            _ => identified(reference)
                .map(|ids| ids.into_iter().map(Some).collect())
                .unwrap_or_default(),
        };
        if targets.is_empty() {
            return Err(failure());
        }

        let records: Vec<ExtractionRecord> = targets
            .into_iter()
            .map(|id| ExtractionRecord::backend_error(id, error))
            .collect();
        self.observer.on_event(&ExtractionEvent::BackendFailureDegraded {
            records: records.len(),
            error: error.to_string(),
        });
        Ok(records)
    }

    fn by_descriptor(
        &self,
        descriptors: &[FieldDescriptor],
        candidates: &[Candidate],
        warnings: &mut Vec<ReconcileWarning>,
    ) -> Vec<ExtractionRecord> {
        note_surplus(descriptors.len(), candidates.len(), warnings);

        descriptors
            .iter()
            .enumerate()
            .map(|(index, descriptor)| {
                let id = Some(descriptor.identifier_id.clone());
                match candidates.get(index) {
                    Some(candidate) => ExtractionRecord {
                        identifier_id: id,
                        ..normalize_candidate(candidate)
                    },
                    None => {
                        warnings.push(ReconcileWarning::NotFound {
                            index,
                            identifier_id: id.clone(),
                        });
                        ExtractionRecord::not_found(
                            id,
                            format!("No value returned for field '{}'", descriptor.name),
                        )
                    }
                }
            })
            .collect()
    }

    fn by_input(
        &self,
        inputs: &[InputRecord],
        candidates: &[Candidate],
        warnings: &mut Vec<ReconcileWarning>,
    ) -> Vec<ExtractionRecord> {
        note_surplus(inputs.len(), candidates.len(), warnings);

        let normalized: Vec<ExtractionRecord> = candidates.iter().map(normalize_candidate).collect();
        let input_ids: HashSet<String> = inputs.iter().filter_map(InputRecord::identifier_id).collect();

        inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                let key = input.identifier_id();
                let id = input.raw_identifier_id();

                let matched = key
                    .as_ref()
                    .and_then(|key| normalized.iter().find(|r| r.identifier_id.as_ref() == Some(key)));
                if let Some(record) = matched {
                    return ExtractionRecord {
                        identifier_id: id,
                        ..record.clone()
                    };
                }

                // Positional pairing must not steal a candidate that belongs
                // to another input.
                let positional = normalized.get(index).filter(|r| {
                    r.identifier_id
                        .as_ref()
                        .map_or(true, |found| !input_ids.contains(found))
                });
                match positional {
                    Some(record) => {
                        if record.identifier_id != key {
                            warnings.push(ReconcileWarning::IdentifierNotPreserved {
                                index,
                                expected: id.clone(),
                                found: record.identifier_id.clone(),
                            });
                        }
                        ExtractionRecord {
                            identifier_id: id,
                            ..record.clone()
                        }
                    }
                    None => {
                        warnings.push(ReconcileWarning::NotFound {
                            index,
                            identifier_id: id.clone(),
                        });
                        let reason = match &id {
                            Some(id) => format!("No result returned for record {}", id),
                            None => format!("No result returned for record at position {}", index),
                        };
                        ExtractionRecord::not_found(id, reason)
                    }
                }
            })
            .collect()
    }

    fn by_reference(
        &self,
        references: &[String],
        candidates: &[Candidate],
        warnings: &mut Vec<ReconcileWarning>,
    ) -> Vec<ExtractionRecord> {
        if candidates.is_empty() {
            return references
                .iter()
                .enumerate()
                .map(|(index, id)| {
                    warnings.push(ReconcileWarning::NotFound {
                        index,
                        identifier_id: Some(id.clone()),
                    });
                    ExtractionRecord::not_found(
                        Some(id.clone()),
                        format!("No result returned for record {}", id),
                    )
                })
                .collect();
        }

        if candidates.len() < references.len() {
            warnings.push(ReconcileWarning::CyclicDistribution {
                candidates: candidates.len(),
                references: references.len(),
            });
        }
        note_surplus(references.len(), candidates.len(), warnings);

        // Same value may land on unrelated records when cycling; kept for
        // compatibility with existing workflows.
        references
            .iter()
            .enumerate()
            .map(|(index, id)| ExtractionRecord {
                identifier_id: Some(id.clone()),
                ..normalize_candidate(&candidates[index % candidates.len()])
            })
            .collect()
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

fn created(candidates: &[Candidate]) -> Vec<ExtractionRecord> {
    candidates
        .iter()
        .map(|candidate| ExtractionRecord {
            identifier_id: None,
            ..normalize_candidate(candidate)
        })
        .collect()
}

/// Identifiers of a reference list, if it has any.
fn identified(reference: Option<&[InputRecord]>) -> Option<Vec<String>> {
    let ids: Vec<String> = reference?
        .iter()
        .filter_map(InputRecord::raw_identifier_id)
        .collect();
    (!ids.is_empty()).then_some(ids)
}

fn note_surplus(expected: usize, received: usize, warnings: &mut Vec<ReconcileWarning>) {
    if received > expected {
        warnings.push(ReconcileWarning::SurplusCandidates { expected, received });
    }
}

/// Reconcile with the default observer.
pub fn reconcile(
    meta: &ToolOperationMeta,
    candidates: &[Candidate],
    inputs: Option<&[InputRecord]>,
    reference: Option<&[InputRecord]>,
) -> Reconciliation {
    Reconciler::new().reconcile(meta, candidates, inputs, reference)
}
