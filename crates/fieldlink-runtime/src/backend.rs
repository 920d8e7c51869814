//! Extraction backend abstraction.
//!
//! A backend is whatever turns a tool request into raw text: a language
//! model, or a function run in a sandbox. Real clients live outside this
//! workspace; the invoker only sees this trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use fieldlink_core::{BackendKind, OperationKind};

/// Errors from an extraction backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Backend rejected the request: {0}")]
    Rejected(String),

    #[error("Sandbox execution failed: {0}")]
    Execution(String),
}

impl BackendError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }
}

/// Identifiers already answered in an earlier, truncated response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationHint {
    pub round: usize,

    pub processed_identifiers: Vec<String>,

    /// Last identifier the truncated response got through
    pub last_identifier: Option<String>,
}

/// One backend call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRequest {
    pub tool: String,

    pub backend: BackendKind,

    pub operation: OperationKind,

    /// Canonical parameter names to values, input array narrowed to the batch
    pub parameters: Value,

    pub batch: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<ContinuationHint>,
}

/// Raw backend output.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub text: String,

    /// Stop reason reported by the backend, if any
    pub stop_reason: Option<String>,
}

impl BackendResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stop_reason: None,
        }
    }

    /// The backend itself reported running out of output budget.
    pub fn hit_length_limit(&self) -> bool {
        matches!(self.stop_reason.as_deref(), Some("max_tokens" | "length"))
    }
}

/// Executes tool requests.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Unavailable("503".into()).is_transient());
        assert!(BackendError::RateLimited { retry_after: None }.is_transient());
        assert!(BackendError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!BackendError::Rejected("bad prompt".into()).is_transient());
        assert!(!BackendError::Execution("ZeroDivisionError".into()).is_transient());
    }

    #[test]
    fn test_length_limit() {
        let mut response = BackendResponse::text("[");
        assert!(!response.hit_length_limit());
        response.stop_reason = Some("max_tokens".to_string());
        assert!(response.hit_length_limit());
    }

    #[test]
    fn test_request_serialization_omits_empty_hint() {
        let request = BackendRequest {
            tool: "t".to_string(),
            backend: BackendKind::Llm,
            operation: OperationKind::UpdateMultiple,
            parameters: serde_json::json!({}),
            batch: 0,
            continuation: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("continuation").is_none());
        assert_eq!(json["operation"], "updateMultiple");
    }
}
