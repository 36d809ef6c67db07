//! Document normalization.
//!
//! Generator output is one or more YAML/JSON documents. Normalization turns it
//! into an ordered list of self-contained objects:
//! - empty documents are skipped
//! - a document of kind `List` contributes its non-null `items`, in order
//! - a top-level array (Jsonnet output) is expanded the same way
//! - anything else must be an object and is kept as-is

use serde::Deserialize;
use serde_json::Value;

use crate::consts::LIST_KIND;

use super::NormalizeError;

/// Split a multi-document YAML stream and normalize every document.
pub fn normalize_yaml(text: &str) -> Result<Vec<Value>, NormalizeError> {
  let mut documents = Vec::new();
  for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
    let yaml = serde_yaml::Value::deserialize(document).map_err(|source| NormalizeError::Yaml { index, source })?;
    if yaml.is_null() {
      continue;
    }
    let json = serde_json::to_value(&yaml).map_err(NormalizeError::Json)?;
    documents.push(json);
  }
  normalize(documents)
}

/// Parse a single JSON value and normalize it.
pub fn normalize_json(text: &str) -> Result<Vec<Value>, NormalizeError> {
  let value: Value = serde_json::from_str(text).map_err(NormalizeError::Json)?;
  normalize(vec![value])
}

/// Normalize already-parsed documents, preserving encounter order.
pub fn normalize(documents: Vec<Value>) -> Result<Vec<Value>, NormalizeError> {
  let mut manifests = Vec::new();
  for (index, document) in documents.into_iter().enumerate() {
    match document {
      Value::Null => {}
      Value::Array(items) => push_items(items, index, &mut manifests)?,
      Value::Object(mut object) => {
        if object.get("kind").and_then(Value::as_str) == Some(LIST_KIND) {
          match object.remove("items") {
            Some(Value::Array(items)) => push_items(items, index, &mut manifests)?,
            None | Some(Value::Null) => {}
            Some(_) => return Err(NormalizeError::InvalidListItems { index }),
          }
        } else {
          manifests.push(Value::Object(object));
        }
      }
      other => {
        return Err(NormalizeError::NotAnObject {
          index,
          found: type_name(&other),
        });
      }
    }
  }
  Ok(manifests)
}

fn push_items(items: Vec<Value>, index: usize, manifests: &mut Vec<Value>) -> Result<(), NormalizeError> {
  for item in items {
    match item {
      Value::Null => {}
      Value::Object(_) => manifests.push(item),
      other => {
        return Err(NormalizeError::NotAnObject {
          index,
          found: type_name(&other),
        });
      }
    }
  }
  Ok(())
}

/// Render each manifest as a compact JSON string.
pub fn to_manifest_strings(manifests: &[Value]) -> Result<Vec<String>, NormalizeError> {
  manifests
    .iter()
    .map(|manifest| serde_json::to_string(manifest).map_err(NormalizeError::Serialize))
    .collect()
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
