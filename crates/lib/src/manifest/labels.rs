//! App instance label injection.

use serde_json::{Map, Value};

use crate::consts::CRD_KIND;

/// Set `metadata.labels[key] = value` on every manifest except CRDs.
///
/// Missing `metadata` or `labels` maps are created. Non-object `metadata`
/// or `labels` fields are replaced.
pub fn set_app_instance_label(manifests: &mut [Value], key: &str, value: &str) {
  for manifest in manifests.iter_mut() {
    let Value::Object(object) = manifest else {
      continue;
    };
    if object.get("kind").and_then(Value::as_str) == Some(CRD_KIND) {
      continue;
    }
    if let Some(labels) = object_entry(object, "metadata").and_then(|metadata| object_entry(metadata, "labels")) {
      labels.insert(key.to_string(), Value::String(value.to_string()));
    }
  }
}

fn object_entry<'a>(object: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
  let entry = object
    .entry(key.to_string())
    .or_insert_with(|| Value::Object(Map::new()));
  if !entry.is_object() {
    *entry = Value::Object(Map::new());
  }
  entry.as_object_mut()
}
