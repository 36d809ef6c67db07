//! Kustomize overlays.

use std::path::Path;

use serde_json::Value;

use crate::exec::CmdSpec;
use crate::manifest::normalize_yaml;
use crate::service::ManifestRequest;
use crate::source::{KustomizeAppDetails, KustomizeSource, SourceType};

use super::{BackendContext, GenerateError};

const CONTAINER_KEYS: [&str; 2] = ["initContainers", "containers"];

/// Apply overrides to the kustomization, then build it.
///
/// The edits rewrite the kustomization file in place, which is safe because
/// the working copy is materialized fresh for every checkout.
pub async fn generate(
  ctx: &BackendContext<'_>,
  app_path: &Path,
  source: &KustomizeSource,
  request: &ManifestRequest,
) -> Result<Vec<Value>, GenerateError> {
  let kustomize = ctx.tools.kustomize.as_str();
  let edit = || CmdSpec::new(kustomize, app_path).arg("edit");

  if let Some(prefix) = source.name_prefix.as_deref().filter(|p| !p.is_empty()) {
    ctx
      .run_tool(SourceType::Kustomize, edit().args(["set", "nameprefix", "--", prefix]))
      .await?;
  }
  if let Some(suffix) = source.name_suffix.as_deref().filter(|s| !s.is_empty()) {
    ctx
      .run_tool(SourceType::Kustomize, edit().args(["set", "namesuffix", "--", suffix]))
      .await?;
  }
  if !source.images.is_empty() {
    ctx
      .run_tool(
        SourceType::Kustomize,
        edit().args(["set", "image"]).args(source.images.iter().cloned()),
      )
      .await?;
  }

  let mut labels: Vec<String> = source
    .common_labels
    .iter()
    .map(|(key, value)| format!("{key}:{value}"))
    .collect();
  if let Some((key, value)) = request.app_label() {
    labels.push(format!("{key}:{value}"));
  }
  if !labels.is_empty() {
    ctx
      .run_tool(
        SourceType::Kustomize,
        edit().args(["add", "label", "--force"]).arg(labels.join(",")),
      )
      .await?;
  }

  build(ctx, app_path).await
}

async fn build(ctx: &BackendContext<'_>, app_path: &Path) -> Result<Vec<Value>, GenerateError> {
  let spec = CmdSpec::new(ctx.tools.kustomize.as_str(), app_path).args(["build", "."]);
  let output = ctx.run_tool(SourceType::Kustomize, spec).await?;
  normalize_yaml(&output).map_err(|source| GenerateError::Output {
    backend: SourceType::Kustomize,
    source,
  })
}

/// Build the overlay unchanged and report the container images it references.
pub async fn app_details(ctx: &BackendContext<'_>, app_path: &Path) -> Result<KustomizeAppDetails, GenerateError> {
  let manifests = build(ctx, app_path).await?;
  let mut images = Vec::new();
  for manifest in &manifests {
    collect_images(manifest, &mut images);
  }
  Ok(KustomizeAppDetails { images })
}

/// Walk `value` for container lists and collect their images, first occurrence wins.
fn collect_images(value: &Value, images: &mut Vec<String>) {
  match value {
    Value::Object(object) => {
      for key in CONTAINER_KEYS {
        if let Some(Value::Array(containers)) = object.get(key) {
          for image in containers.iter().filter_map(|c| c.get("image").and_then(Value::as_str)) {
            if !images.iter().any(|known| known == image) {
              images.push(image.to_string());
            }
          }
        }
      }
      for (key, child) in object {
        if !CONTAINER_KEYS.contains(&key.as_str()) {
          collect_images(child, images);
        }
      }
    }
    Value::Array(items) => {
      for item in items {
        collect_images(item, images);
      }
    }
    _ => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::testing::{RecordingRunner, StaticJsonnet, context};
  use crate::config::{RecognizedFiles, ToolPaths};
  use std::collections::BTreeMap;
  use tempfile::TempDir;

  const BUILD_OUTPUT: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  template:\n    spec:\n      initContainers:\n      - name: init\n        image: busybox:1.36\n      containers:\n      - name: web\n        image: nginx:1.15.4\n      - name: sidecar\n        image: busybox:1.36\n---\napiVersion: batch/v1\nkind: CronJob\nmetadata:\n  name: report\nspec:\n  jobTemplate:\n    spec:\n      template:\n        spec:\n          containers:\n          - name: report\n            image: nginx:1.15.4\n          - name: upload\n            image: amazon/aws-cli:2.15\n";

  #[tokio::test]
  async fn edits_run_before_build() {
    let temp = TempDir::new().unwrap();
    let runner = RecordingRunner::with_responses(["", "", "", "", BUILD_OUTPUT]);
    let jsonnet = StaticJsonnet(Value::Null);
    let tools = ToolPaths::default();
    let files = RecognizedFiles::default();

    let source = KustomizeSource {
      name_prefix: Some("staging-".to_string()),
      name_suffix: Some("-v2".to_string()),
      images: vec!["nginx=nginx:1.25".to_string()],
      common_labels: BTreeMap::from([("team".to_string(), "web".to_string())]),
    };
    let request = ManifestRequest {
      app_label_key: Some("app.kubernetes.io/instance".to_string()),
      app_label_value: Some("guestbook".to_string()),
      ..Default::default()
    };

    let manifests = generate(&context(&runner, &jsonnet, &tools, &files), temp.path(), &source, &request)
      .await
      .unwrap();
    assert_eq!(manifests.len(), 2);
    assert_eq!(
      runner.command_lines(),
      vec![
        "kustomize edit set nameprefix -- staging-",
        "kustomize edit set namesuffix -- -v2",
        "kustomize edit set image nginx=nginx:1.25",
        "kustomize edit add label --force team:web,app.kubernetes.io/instance:guestbook",
        "kustomize build .",
      ]
    );
  }

  #[tokio::test]
  async fn plain_overlay_only_builds() {
    let temp = TempDir::new().unwrap();
    let runner = RecordingRunner::with_responses([BUILD_OUTPUT]);
    let jsonnet = StaticJsonnet(Value::Null);
    let tools = ToolPaths::default();
    let files = RecognizedFiles::default();

    generate(
      &context(&runner, &jsonnet, &tools, &files),
      temp.path(),
      &KustomizeSource::default(),
      &ManifestRequest::default(),
    )
    .await
    .unwrap();
    assert_eq!(runner.command_lines(), vec!["kustomize build ."]);
  }

  #[tokio::test]
  async fn details_list_unique_images_in_discovery_order() {
    let temp = TempDir::new().unwrap();
    let runner = RecordingRunner::with_responses([BUILD_OUTPUT]);
    let jsonnet = StaticJsonnet(Value::Null);
    let tools = ToolPaths::default();
    let files = RecognizedFiles::default();

    let details = app_details(&context(&runner, &jsonnet, &tools, &files), temp.path())
      .await
      .unwrap();
    assert_eq!(details.images, vec!["busybox:1.36", "nginx:1.15.4", "amazon/aws-cli:2.15"]);
  }

  #[tokio::test]
  async fn build_failure_names_backend() {
    let temp = TempDir::new().unwrap();
    let runner = RecordingRunner::default();
    runner.fail_next("missing resource");
    let jsonnet = StaticJsonnet(Value::Null);
    let tools = ToolPaths::default();
    let files = RecognizedFiles::default();

    let err = app_details(&context(&runner, &jsonnet, &tools, &files), temp.path())
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      GenerateError::Tool {
        backend: SourceType::Kustomize,
        ..
      }
    ));
    assert!(err.to_string().contains("missing resource"));
  }
}
