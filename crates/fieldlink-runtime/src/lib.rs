//! # fieldlink-runtime
//!
//! Asynchronous invocation layer for fieldlink tools.
//!
//! `fieldlink-core` is pure: it parses and reconciles text it is handed. This
//! crate does the calling. It splits input arrays into batches, runs backend
//! calls under a timeout with retry, turns backend failures into placeholder
//! records for update operations, and re-requests records lost to truncated
//! responses.
//!
//! Backends are a trait. Language model and sandbox clients are supplied by
//! the embedding application.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fieldlink_runtime::{RuntimeConfig, ToolInvoker};
//!
//! let tool = ToolDefinition::from_yaml_file("tools/governing_law.yaml")?;
//! let invoker = ToolInvoker::new(backend, RuntimeConfig::default());
//!
//! let report = invoker.invoke(&tool, &parameters, None).await?;
//! for record in &report.records {
//!     println!("{:?} = {}", record.identifier_id, record.extracted_value);
//! }
//! ```

pub mod backend;
pub mod batching;
pub mod config;
pub mod invoker;
pub mod observe;

pub use backend::{BackendError, BackendRequest, BackendResponse, ContinuationHint, ExtractionBackend};
pub use batching::{plan_batches, Batch};
pub use config::{ConfigError, ContinuationConfig, RuntimeConfig};
pub use invoker::{BatchSummary, BatchWarning, InvocationError, InvocationReport, ToolInvoker};
pub use observe::RecordingObserver;
