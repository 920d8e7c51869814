//! Tool definitions.
//!
//! A tool is declared in YAML or JSON: its operation kind, backend kind,
//! parameters (with aliases) and, for multi-field extraction, the field
//! descriptors. Definitions are schema-checked, then semantically validated.

mod schema;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::{ParameterDefinition, ParameterError, ParameterKind, ParameterTable};
use crate::types::{FieldDescriptor, OperationKind, ToolOperationMeta};

pub use schema::{validate_tool_schema, SchemaError};

/// Largest batch a single backend call may carry.
pub const MAX_BATCH_SIZE: usize = 50;

/// Errors that can occur when loading a tool definition.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to read tool file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Tool definition does not match schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Invalid parameters: {0}")]
    Parameters(#[from] ParameterError),

    #[error("Tool validation failed: {0}")]
    ValidationError(String),
}

/// What executes the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A language model prompted with the document
    #[default]
    Llm,

    /// Code run in a sandbox
    Function,
}

/// A declared extraction tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub operation: OperationKind,

    #[serde(default)]
    pub backend: BackendKind,

    /// Records per backend call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,

    /// Multi-field descriptors, in the order the backend answers them
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

impl ToolDefinition {
    /// Parse a tool from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ToolError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a tool from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ToolError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ToolError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ToolError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load by extension: `.json` is JSON, anything else YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ToolError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ToolError> {
        validate_tool_schema(&value).map_err(ToolError::SchemaViolation)?;
        let tool: ToolDefinition = serde_json::from_value(value)?;
        tool.validate()?;
        Ok(tool)
    }

    /// Semantic checks the schema cannot express.
    pub fn validate(&self) -> Result<(), ToolError> {
        if self.name.trim().is_empty() {
            return Err(ToolError::ValidationError("name must not be empty".to_string()));
        }

        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ToolError::ValidationError(format!(
                "batchSize must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }

        let arrays = self
            .parameters
            .iter()
            .filter(|p| p.kind == ParameterKind::Array)
            .count();
        if arrays > 1 {
            return Err(ToolError::ValidationError(format!(
                "at most one array parameter is allowed, found {}",
                arrays
            )));
        }

        self.validate_fields()?;

        // Duplicate names and aliases surface as table conflicts
        ParameterTable::new(self.parameters.clone())?;
        Ok(())
    }

    fn validate_fields(&self) -> Result<(), ToolError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.identifier_id.trim().is_empty() {
                return Err(ToolError::ValidationError(format!(
                    "field '{}' has an empty identifierId",
                    field.name
                )));
            }
            if !seen.insert(field.identifier_id.as_str()) {
                return Err(ToolError::ValidationError(format!(
                    "duplicate field identifierId: {}",
                    field.identifier_id
                )));
            }
        }
        Ok(())
    }

    /// Operation metadata for reconciliation.
    pub fn meta(&self) -> ToolOperationMeta {
        let meta = ToolOperationMeta::new(self.operation);
        if self.fields.is_empty() {
            meta
        } else {
            meta.with_descriptors(self.fields.clone())
        }
    }

    pub fn parameter_table(&self) -> Result<ParameterTable, ParameterError> {
        ParameterTable::new(self.parameters.clone())
    }
}
