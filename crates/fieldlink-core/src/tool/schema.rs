//! JSON Schema validation for tool definitions.
//!
//! Definitions are checked against `schema/tool.schema.json` before they are
//! deserialized, so structural mistakes are reported with their JSON path.

use std::sync::OnceLock;

use thiserror::Error;

/// Embedded tool schema (loaded at compile time).
const TOOL_SCHEMA_JSON: &str = include_str!("../../../../schema/tool.schema.json");

/// Compiled validator, initialized once.
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(TOOL_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;
        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| SchemaError::LoadError(e.clone()))
}

/// Validate a tool definition against the schema.
///
/// Returns every violation, each suffixed with its instance path.
pub fn validate_tool_schema(tool_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(tool_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
