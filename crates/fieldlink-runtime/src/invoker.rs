//! Tool invocation.
//!
//! The invoker resolves parameters, splits the input array into batches and
//! runs one backend call per batch. Each call is bounded by a timeout and
//! retried with exponential backoff on transient errors. Responses are parsed
//! and reconciled against the batch's own inputs, then concatenated in batch
//! order.
//!
//! A failed backend call degrades update operations to `ERROR` placeholders
//! for every record the batch was meant to update. Create operations have
//! nothing to degrade to and fail the invocation.

use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use fieldlink_core::observe::default_observer;
use fieldlink_core::{
    ExtractionEvent, ExtractionObserver, ExtractionRecord, InputRecord, OperationKind,
    ParameterError, ParseError, ReconcileWarning, Reconciler, Reconciliation, RecoveryTier,
    ResolvedParameters, ResponseParser, ToolDefinition, ToolOperationMeta,
};

use crate::backend::{BackendError, BackendRequest, BackendResponse, ContinuationHint, ExtractionBackend};
use crate::batching::{plan_batches, Batch};
use crate::config::RuntimeConfig;

/// Errors that end an invocation.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("Parameter error: {0}")]
    Parameters(#[from] ParameterError),

    #[error("Backend failed for tool without records to degrade to: {0}")]
    Backend(#[from] BackendError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

/// A reconciliation warning tagged with the batch it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchWarning {
    pub batch: usize,

    #[serde(flatten)]
    pub warning: ReconcileWarning,
}

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub index: usize,

    /// Input records in the batch (0 when the tool takes no input array)
    pub inputs: usize,

    pub records: usize,

    /// Recovery tier of the first response; `None` when the call failed
    pub tier: Option<RecoveryTier>,

    pub truncated: bool,

    pub continuation_rounds: usize,

    /// Backend error text when the batch degraded to placeholders
    pub error: Option<String>,
}

impl BatchSummary {
    pub fn degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Outcome of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationReport {
    pub tool: String,

    pub operation: OperationKind,

    pub records: Vec<ExtractionRecord>,

    pub warnings: Vec<BatchWarning>,

    pub batches: Vec<BatchSummary>,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,
}

impl InvocationReport {
    /// Records still carrying a placeholder after all batches and rounds.
    pub fn unresolved(&self) -> impl Iterator<Item = &ExtractionRecord> {
        self.records.iter().filter(|r| r.is_placeholder())
    }
}

struct BatchOutcome {
    summary: BatchSummary,
    records: Vec<ExtractionRecord>,
    warnings: Vec<ReconcileWarning>,
}

/// Shared inputs of every batch in one invocation.
struct Invocation<'a> {
    tool: &'a ToolDefinition,
    meta: ToolOperationMeta,
    params: ResolvedParameters,
    reference: Option<&'a [InputRecord]>,
}

/// Runs tools against an extraction backend.
pub struct ToolInvoker {
    backend: Arc<dyn ExtractionBackend>,
    config: RuntimeConfig,
    observer: Arc<dyn ExtractionObserver>,
    parser: ResponseParser,
    reconciler: Reconciler,
}

impl ToolInvoker {
    pub fn new(backend: Arc<dyn ExtractionBackend>, config: RuntimeConfig) -> Self {
        Self::with_observer(backend, config, default_observer())
    }

    /// Create an invoker whose parser and reconciler report to `observer`.
    pub fn with_observer(
        backend: Arc<dyn ExtractionBackend>,
        config: RuntimeConfig,
        observer: Arc<dyn ExtractionObserver>,
    ) -> Self {
        Self {
            backend,
            config,
            parser: ResponseParser::new().with_observer(Arc::clone(&observer)),
            reconciler: Reconciler::new().with_observer(Arc::clone(&observer)),
            observer,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Invoke a tool.
    ///
    /// # Arguments
    ///
    /// * `tool` - The tool definition
    /// * `supplied` - Caller parameters under any declared alias
    /// * `reference` - Existing identified records, used by updates that
    ///   receive no input array
    pub async fn invoke(
        &self,
        tool: &ToolDefinition,
        supplied: &Map<String, Value>,
        reference: Option<&[InputRecord]>,
    ) -> Result<InvocationReport, InvocationError> {
        let started_at = Utc::now();
        let params = tool.parameter_table()?.resolve(supplied)?;

        let batches: Vec<Option<Batch>> = match params.input_records().filter(|i| !i.is_empty()) {
            Some(inputs) => plan_batches(&inputs, self.config.batch_size_for(tool.batch_size))
                .into_iter()
                .map(Some)
                .collect(),
            None => vec![None],
        };
        tracing::info!(
            tool = %tool.name,
            backend = self.backend.name(),
            batches = batches.len(),
            "Invoking tool"
        );

        let invocation = Invocation {
            tool,
            meta: tool.meta(),
            params,
            reference,
        };

        let outcomes: Vec<Result<BatchOutcome, InvocationError>> = stream::iter(batches)
            .map(|batch| self.run_batch(&invocation, batch))
            .buffered(self.config.max_concurrent_batches.max(1))
            .collect()
            .await;

        let mut records = Vec::new();
        let mut warnings = Vec::new();
        let mut summaries = Vec::new();
        for outcome in outcomes {
            let outcome = outcome?;
            records.extend(outcome.records);
            warnings.extend(outcome.warnings.into_iter().map(|warning| BatchWarning {
                batch: outcome.summary.index,
                warning,
            }));
            summaries.push(outcome.summary);
        }

        Ok(InvocationReport {
            tool: tool.name.clone(),
            operation: tool.operation,
            records,
            warnings,
            batches: summaries,
            started_at,
            completed_at: Utc::now(),
        })
    }

    async fn run_batch(
        &self,
        invocation: &Invocation<'_>,
        batch: Option<Batch>,
    ) -> Result<BatchOutcome, InvocationError> {
        let index = batch.as_ref().map_or(0, |b| b.index);
        let inputs = batch.map(|b| b.records);
        let request = self.request(invocation, index, inputs.as_deref(), None);

        let response = match self.call(&request).await {
            Ok(response) => response,
            Err(err) => return self.degrade(invocation, index, inputs.as_deref(), err),
        };

        let parsed = self.parser.parse_detailed(&response.text)?;
        let mut reconciliation = self.reconciler.reconcile(
            &invocation.meta,
            &parsed.candidates,
            inputs.as_deref(),
            invocation.reference,
        );

        let truncated = parsed.truncated || response.hit_length_limit();
        let rounds = match inputs.as_deref() {
            Some(inputs)
                if truncated
                    && self.config.continuation.enabled
                    && invocation.meta.operation_kind.is_update() =>
            {
                self.continue_batch(invocation, index, inputs, &mut reconciliation, parsed.last_identifier())
                    .await
            }
            _ => 0,
        };

        self.observer.on_event(&ExtractionEvent::BatchCompleted {
            batch: index,
            records: reconciliation.records.len(),
            degraded: false,
        });

        Ok(BatchOutcome {
            summary: BatchSummary {
                index,
                inputs: inputs.as_ref().map_or(0, Vec::len),
                records: reconciliation.records.len(),
                tier: Some(parsed.tier),
                truncated,
                continuation_rounds: rounds,
                error: None,
            },
            records: reconciliation.records,
            warnings: reconciliation.warnings,
        })
    }

    fn degrade(
        &self,
        invocation: &Invocation<'_>,
        index: usize,
        inputs: Option<&[InputRecord]>,
        err: BackendError,
    ) -> Result<BatchOutcome, InvocationError> {
        let message = err.to_string();
        tracing::warn!(tool = %invocation.tool.name, batch = index, error = %message, "Backend call failed");

        let records = self
            .reconciler
            .degrade(&invocation.meta, inputs, invocation.reference, &message)
            .map_err(|_| InvocationError::Backend(err))?;

        self.observer.on_event(&ExtractionEvent::BatchCompleted {
            batch: index,
            records: records.len(),
            degraded: true,
        });

        Ok(BatchOutcome {
            summary: BatchSummary {
                index,
                inputs: inputs.map_or(0, <[InputRecord]>::len),
                records: records.len(),
                tier: None,
                truncated: false,
                continuation_rounds: 0,
                error: Some(message),
            },
            records,
            warnings: Vec::new(),
        })
    }

    /// Re-request records lost to a truncated response.
    ///
    /// Placeholders are replaced by the follow-up record for the same
    /// identifier. Resolved records are never overwritten. Stops when nothing
    /// is unresolved, a follow-up arrives complete, or a follow-up fails.
    async fn continue_batch(
        &self,
        invocation: &Invocation<'_>,
        index: usize,
        inputs: &[InputRecord],
        reconciliation: &mut Reconciliation,
        mut last_identifier: Option<String>,
    ) -> usize {
        let mut rounds = 0;

        while rounds < self.config.continuation.max_rounds {
            let (positions, unresolved): (Vec<usize>, Vec<InputRecord>) = inputs
                .iter()
                .zip(&reconciliation.records)
                .enumerate()
                .filter(|(_, (input, record))| record.is_placeholder() && input.identifier_id().is_some())
                .map(|(position, (input, _))| (position, input.clone()))
                .unzip();
            if unresolved.is_empty() {
                break;
            }
            rounds += 1;

            self.observer.on_event(&ExtractionEvent::ContinuationRound {
                batch: index,
                round: rounds,
                unresolved: unresolved.len(),
            });

            let hint = ContinuationHint {
                round: rounds,
                processed_identifiers: reconciliation
                    .records
                    .iter()
                    .filter(|r| !r.is_placeholder())
                    .filter_map(|r| r.identifier_id.clone())
                    .collect(),
                last_identifier: last_identifier.take(),
            };
            let request = self.request(invocation, index, Some(&unresolved), Some(hint));

            let response = match self.call(&request).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(batch = index, round = rounds, error = %err, "Continuation request failed");
                    break;
                }
            };
            let parsed = match self.parser.parse_detailed(&response.text) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!(batch = index, round = rounds, error = %err, "Continuation response unparseable");
                    break;
                }
            };

            let follow_up = self.reconciler.reconcile(
                &invocation.meta,
                &parsed.candidates,
                Some(&unresolved),
                None,
            );
            merge_follow_up(reconciliation, follow_up, &positions);

            if !(parsed.truncated || response.hit_length_limit()) {
                break;
            }
            last_identifier = parsed.last_identifier();
        }

        rounds
    }

    fn request(
        &self,
        invocation: &Invocation<'_>,
        index: usize,
        inputs: Option<&[InputRecord]>,
        continuation: Option<ContinuationHint>,
    ) -> BackendRequest {
        let parameters = match inputs {
            Some(inputs) => invocation.params.with_input_records(inputs),
            None => invocation.params.clone(),
        };
        BackendRequest {
            tool: invocation.tool.name.clone(),
            backend: invocation.tool.backend,
            operation: invocation.tool.operation,
            parameters: parameters.to_json(),
            batch: index,
            continuation,
        }
    }

    /// One backend call under the timeout, retried on transient errors.
    async fn call(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        let timeout = self.config.timeout;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.retry_min_delay)
            .with_max_times(self.config.max_retries);

        (move || async move {
            match tokio::time::timeout(timeout, self.backend.execute(request)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(timeout)),
            }
        })
        .retry(backoff)
        .when(BackendError::is_transient)
        .notify(|err, delay| {
            tracing::debug!(batch = request.batch, error = %err, delay = ?delay, "Retrying backend call");
        })
        .await
    }
}

/// Replace placeholders with resolved follow-up records for the same identifier.
///
/// `positions[i]` is the batch position of the follow-up's i-th input. Follow-up
/// warnings are re-indexed onto the batch. Its `NotFound` warnings duplicate
/// the batch's own and are dropped.
fn merge_follow_up(reconciliation: &mut Reconciliation, follow_up: Reconciliation, positions: &[usize]) {
    let batch_index = |index: usize| positions.get(index).copied().unwrap_or(index);
    for warning in follow_up.warnings {
        match warning {
            ReconcileWarning::NotFound { .. } => {}
            ReconcileWarning::IdentifierNotPreserved {
                index,
                expected,
                found,
            } => reconciliation.warnings.push(ReconcileWarning::IdentifierNotPreserved {
                index: batch_index(index),
                expected,
                found,
            }),
            other => reconciliation.warnings.push(other),
        }
    }

    for record in follow_up.records.into_iter().filter(|r| !r.is_placeholder()) {
        let Some(id) = record.identifier_id.clone() else {
            continue;
        };
        for slot in reconciliation
            .records
            .iter_mut()
            .filter(|slot| slot.is_placeholder() && slot.identifier_id.as_ref() == Some(&id))
        {
            *slot = record.clone();
        }
    }

    let records = &reconciliation.records;
    reconciliation.warnings.retain(|warning| match warning {
        ReconcileWarning::NotFound {
            identifier_id: Some(id),
            ..
        } => records
            .iter()
            .any(|r| r.is_placeholder() && r.identifier_id.as_ref() == Some(id)),
        _ => true,
    });
}
