//! Declarative parameter aliases.
//!
//! Callers name tool parameters inconsistently (`Input Records`,
//! `input_records`, `inputRecords`). Each tool declares its parameters with
//! their accepted aliases, and [`ParameterTable`] resolves supplied keys to
//! canonical names through a normalized index built once per tool.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::InputRecord;

/// Errors raised while building a table or resolving supplied parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Missing required parameter: {0}")]
    Missing(String),

    #[error("Parameter '{name}' must be {expected}, got {found}")]
    WrongKind {
        name: String,
        expected: ParameterKind,
        found: &'static str,
    },

    #[error("Alias '{alias}' is claimed by both '{first}' and '{second}'")]
    Conflict {
        alias: String,
        first: String,
        second: String,
    },

    #[error("Parameter '{0}' was supplied more than once under different aliases")]
    Duplicate(String),
}

/// Shape a parameter value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    /// Document text or a document reference (string)
    Document,

    /// The input record array (at most one per tool)
    Array,

    /// A plain string, number or boolean
    Scalar,
}

impl std::fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Document => "a document string",
            Self::Array => "an array",
            Self::Scalar => "a string, number or boolean",
        };
        f.write_str(text)
    }
}

impl ParameterKind {
    fn admits(&self, value: &Value) -> bool {
        match self {
            Self::Document => value.is_string(),
            Self::Array => value.is_array(),
            Self::Scalar => value.is_string() || value.is_number() || value.is_boolean(),
        }
    }
}

/// A parameter declared on a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// Canonical name
    pub name: String,

    pub kind: ParameterKind,

    /// Additional names callers may use
    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub required: bool,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            aliases: Vec::new(),
            required: false,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Lower-case and strip everything but letters and digits.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Normalized alias index over a tool's parameter definitions.
#[derive(Debug, Clone)]
pub struct ParameterTable {
    definitions: Vec<ParameterDefinition>,
    index: HashMap<String, usize>,
}

impl ParameterTable {
    /// Build the index. Fails if two parameters share a normalized name or alias.
    pub fn new(definitions: Vec<ParameterDefinition>) -> Result<Self, ParameterError> {
        let mut index: HashMap<String, usize> = HashMap::new();

        for (position, definition) in definitions.iter().enumerate() {
            let names = std::iter::once(&definition.name).chain(definition.aliases.iter());
            for name in names {
                let key = normalize_key(name);
                match index.get(&key) {
                    Some(&owner) if owner != position => {
                        return Err(ParameterError::Conflict {
                            alias: name.clone(),
                            first: definitions[owner].name.clone(),
                            second: definition.name.clone(),
                        });
                    }
                    _ => {
                        index.insert(key, position);
                    }
                }
            }
        }

        Ok(Self { definitions, index })
    }

    pub fn definitions(&self) -> &[ParameterDefinition] {
        &self.definitions
    }

    /// Canonical definition for a supplied key, if any alias matches.
    pub fn lookup(&self, key: &str) -> Option<&ParameterDefinition> {
        self.index
            .get(&normalize_key(key))
            .map(|&position| &self.definitions[position])
    }

    /// The single array-valued parameter, if declared.
    pub fn array_parameter(&self) -> Option<&ParameterDefinition> {
        self.definitions
            .iter()
            .find(|d| d.kind == ParameterKind::Array)
    }

    /// Map supplied keys to canonical names and check shapes.
    ///
    /// Unknown keys are ignored. `null` values count as absent.
    pub fn resolve(&self, supplied: &Map<String, Value>) -> Result<ResolvedParameters, ParameterError> {
        let mut values = BTreeMap::new();

        for (key, value) in supplied {
            if value.is_null() {
                continue;
            }
            let Some(definition) = self.lookup(key) else {
                tracing::debug!(key = %key, "Ignoring unknown parameter");
                continue;
            };
            if !definition.kind.admits(value) {
                return Err(ParameterError::WrongKind {
                    name: definition.name.clone(),
                    expected: definition.kind,
                    found: json_type(value),
                });
            }
            if values.insert(definition.name.clone(), value.clone()).is_some() {
                return Err(ParameterError::Duplicate(definition.name.clone()));
            }
        }

        if let Some(missing) = self
            .definitions
            .iter()
            .find(|d| d.required && !values.contains_key(&d.name))
        {
            return Err(ParameterError::Missing(missing.name.clone()));
        }

        Ok(ResolvedParameters {
            values,
            array_parameter: self.array_parameter().map(|d| d.name.clone()),
        })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parameters keyed by canonical name.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResolvedParameters {
    values: BTreeMap<String, Value>,

    #[serde(skip)]
    array_parameter: Option<String>,
}

impl ResolvedParameters {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Records of the input array parameter, if one was supplied.
    pub fn input_records(&self) -> Option<Vec<InputRecord>> {
        let name = self.array_parameter.as_ref()?;
        let items = self.values.get(name)?.as_array()?;
        Some(items.iter().cloned().map(InputRecord::from_value).collect())
    }

    /// Copy with the input array replaced, used to issue one call per batch.
    pub fn with_input_records(&self, records: &[InputRecord]) -> Self {
        let mut resolved = self.clone();
        if let Some(name) = &self.array_parameter {
            let items = records
                .iter()
                .map(|r| Value::Object(r.fields().clone()))
                .collect();
            resolved.values.insert(name.clone(), Value::Array(items));
        }
        resolved
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> ParameterTable {
        ParameterTable::new(vec![
            ParameterDefinition::new("document", ParameterKind::Document)
                .with_alias("Reference Document")
                .required(),
            ParameterDefinition::new("inputRecords", ParameterKind::Array).with_alias("rows"),
            ParameterDefinition::new("language", ParameterKind::Scalar),
        ])
        .unwrap()
    }

    fn supplied(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Input Records"), "inputrecords");
        assert_eq!(normalize_key("input_records"), "inputrecords");
        assert_eq!(normalize_key("inputRecords"), "inputrecords");
    }

    #[test]
    fn test_resolve_aliases() {
        let resolved = table()
            .resolve(&supplied(json!({
                "reference_document": "msa.pdf",
                "Input Records": [{"identifierId": "a"}, {"identifierId": "b"}],
                "LANGUAGE": "en",
                "unrelated": 1
            })))
            .unwrap();

        assert_eq!(resolved.get("document"), Some(&json!("msa.pdf")));
        assert_eq!(resolved.get("language"), Some(&json!("en")));
        assert!(resolved.get("unrelated").is_none());

        let inputs = resolved.input_records().unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1].identifier_id().as_deref(), Some("b"));
    }

    #[test]
    fn test_missing_required() {
        let err = table().resolve(&supplied(json!({"rows": []}))).unwrap_err();
        assert_eq!(err, ParameterError::Missing("document".to_string()));
    }

    #[test]
    fn test_null_counts_as_absent() {
        let err = table()
            .resolve(&supplied(json!({"document": null})))
            .unwrap_err();
        assert_eq!(err, ParameterError::Missing("document".to_string()));
    }

    #[test]
    fn test_wrong_kind() {
        let err = table()
            .resolve(&supplied(json!({"document": "d", "rows": "not a list"})))
            .unwrap_err();
        assert!(matches!(
            err,
            ParameterError::WrongKind { ref name, expected: ParameterKind::Array, found: "string" } if name == "inputRecords"
        ));
    }

    #[test]
    fn test_same_parameter_twice() {
        let err = table()
            .resolve(&supplied(json!({"document": "a", "Reference Document": "b"})))
            .unwrap_err();
        assert_eq!(err, ParameterError::Duplicate("document".to_string()));
    }

    #[test]
    fn test_conflicting_aliases_rejected() {
        let err = ParameterTable::new(vec![
            ParameterDefinition::new("document", ParameterKind::Document).with_alias("source"),
            ParameterDefinition::new("Source", ParameterKind::Scalar),
        ])
        .unwrap_err();
        assert!(matches!(err, ParameterError::Conflict { .. }));
    }

    #[test]
    fn test_with_input_records() {
        let resolved = table()
            .resolve(&supplied(json!({"document": "d", "rows": [{"identifierId": "a"}]})))
            .unwrap();
        let batch = resolved.with_input_records(&[InputRecord::with_id("z")]);
        assert_eq!(batch.get("inputRecords"), Some(&json!([{"identifierId": "z"}])));
        assert_eq!(batch.get("document"), Some(&json!("d")));
    }

    #[test]
    fn test_no_array_parameter() {
        let table = ParameterTable::new(vec![ParameterDefinition::new("q", ParameterKind::Scalar)]).unwrap();
        let resolved = table.resolve(&supplied(json!({"q": 3}))).unwrap();
        assert!(resolved.input_records().is_none());
        assert_eq!(resolved.to_json(), json!({"q": 3}));
    }
}
