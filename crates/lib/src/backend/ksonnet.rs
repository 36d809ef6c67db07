//! Ksonnet applications.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::exec::CmdSpec;
use crate::manifest::normalize_yaml;
use crate::source::{DirListing, KsonnetAppDetails, KsonnetEnvironment, KsonnetParameter, KsonnetSource, SourceType};

use super::{BackendContext, Generated, GenerateError};

#[derive(Debug, Default, Deserialize)]
struct AppDescriptor {
  #[serde(default)]
  name: String,
  #[serde(default)]
  environments: BTreeMap<String, KsonnetEnvironment>,
}

fn read_descriptor(ctx: &BackendContext<'_>, app_path: &Path) -> Result<AppDescriptor, GenerateError> {
  let listing = DirListing::read(app_path)?;
  let name = listing.find_file(&ctx.files.ksonnet_app).unwrap_or("app.yaml");
  let path = app_path.join(name);
  let content = std::fs::read_to_string(&path).map_err(|source| GenerateError::Read {
    path: path.clone(),
    source,
  })?;
  serde_yaml::from_str(&content).map_err(|source| GenerateError::Descriptor { path, source })
}

/// Apply parameter overrides, then show the environment.
///
/// The resolved namespace is the environment's destination namespace.
pub async fn generate(
  ctx: &BackendContext<'_>,
  app_path: &Path,
  source: &KsonnetSource,
) -> Result<Generated, GenerateError> {
  if source.environment.is_empty() {
    return Err(GenerateError::MissingEnvironment);
  }
  let descriptor = read_descriptor(ctx, app_path)?;
  let environment = descriptor
    .environments
    .get(&source.environment)
    .ok_or_else(|| GenerateError::UnknownEnvironment(source.environment.clone()))?;

  let ks = ctx.tools.ks.as_str();
  for parameter in &source.parameters {
    let set = CmdSpec::new(ks, app_path)
      .args(["param", "set"])
      .arg(parameter.component.clone())
      .arg(parameter.name.clone())
      .arg(parameter.value.clone())
      .args(["--env", source.environment.as_str()]);
    ctx.run_tool(SourceType::Ksonnet, set).await?;
  }

  let show = CmdSpec::new(ks, app_path).arg("show").arg(source.environment.clone());
  let output = ctx.run_tool(SourceType::Ksonnet, show).await?;
  let manifests = normalize_yaml(&output).map_err(|source| GenerateError::Output {
    backend: SourceType::Ksonnet,
    source,
  })?;

  let namespace = Some(environment.destination.namespace.clone()).filter(|ns| !ns.is_empty());
  Ok(Generated { manifests, namespace })
}

#[derive(Debug, Deserialize)]
struct ParamList {
  #[serde(default)]
  data: Vec<ParamEntry>,
}

#[derive(Debug, Deserialize)]
struct ParamEntry {
  component: String,
  param: String,
  value: Value,
}

/// Describe the app: name, environments, and component parameters in the order ks reports them.
pub async fn app_details(
  ctx: &BackendContext<'_>,
  app_path: &Path,
  environment: Option<&str>,
) -> Result<KsonnetAppDetails, GenerateError> {
  let descriptor = read_descriptor(ctx, app_path)?;

  let mut list = CmdSpec::new(ctx.tools.ks.as_str(), app_path).args(["param", "list", "--output", "json"]);
  if let Some(env) = environment.filter(|env| !env.is_empty()) {
    list = list.args(["--env", env]);
  }
  let output = ctx.run_tool(SourceType::Ksonnet, list).await?;
  let params: ParamList = serde_json::from_str(&output).map_err(GenerateError::KsonnetParams)?;

  let parameters = params
    .data
    .into_iter()
    .map(|entry| KsonnetParameter {
      component: entry.component,
      name: entry.param,
      value: match entry.value {
        Value::String(s) => s,
        other => other.to_string(),
      },
    })
    .collect();

  Ok(KsonnetAppDetails {
    name: descriptor.name,
    environments: descriptor.environments,
    parameters,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::testing::{RecordingRunner, StaticJsonnet, context};
  use crate::config::{RecognizedFiles, ToolPaths};
  use crate::util::testutil::{config_map, write_tree};
  use tempfile::TempDir;

  const APP_YAML: &str = "apiVersion: 0.1.0\nkind: ksonnet.io/app\nname: guestbook\nversion: 0.0.1\nenvironments:\n  prod:\n    destination:\n      namespace: guestbook-prod\n      server: https://kubernetes.default.svc\n    k8sVersion: v1.10.0\n    path: prod\n";

  const PARAMS: &str = r#"{"kind":"ksonnet.io/parameters","apiVersion":"0.1.0","data":[
    {"component":"guestbook-ui","param":"name","value":"guestbook-ui"},
    {"component":"guestbook-ui","param":"replicas","value":1},
    {"component":"guestbook-ui","param":"containerPort","value":80}
  ]}"#;

  fn app() -> TempDir {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("app.yaml", APP_YAML), ("components/params.libsonnet", "{}")]);
    temp
  }

  #[tokio::test]
  async fn show_uses_environment_and_reports_namespace() {
    let temp = app();
    let runner = RecordingRunner::with_responses(["", config_map("guestbook-ui").as_str()]);
    let jsonnet = StaticJsonnet(Value::Null);
    let tools = ToolPaths::default();
    let files = RecognizedFiles::default();
    let source = KsonnetSource {
      environment: "prod".to_string(),
      parameters: vec![KsonnetParameter {
        component: "guestbook-ui".to_string(),
        name: "replicas".to_string(),
        value: "3".to_string(),
      }],
    };

    let generated = generate(&context(&runner, &jsonnet, &tools, &files), temp.path(), &source)
      .await
      .unwrap();
    assert_eq!(generated.manifests.len(), 1);
    assert_eq!(generated.namespace.as_deref(), Some("guestbook-prod"));
    assert_eq!(
      runner.command_lines(),
      vec!["ks param set guestbook-ui replicas 3 --env prod", "ks show prod"]
    );
  }

  #[tokio::test]
  async fn unknown_environment_is_error() {
    let temp = app();
    let runner = RecordingRunner::default();
    let jsonnet = StaticJsonnet(Value::Null);
    let tools = ToolPaths::default();
    let files = RecognizedFiles::default();
    let source = KsonnetSource {
      environment: "staging".to_string(),
      parameters: vec![],
    };

    let result = generate(&context(&runner, &jsonnet, &tools, &files), temp.path(), &source).await;
    assert!(matches!(result, Err(GenerateError::UnknownEnvironment(env)) if env == "staging"));
    assert!(runner.calls().is_empty());
  }

  #[tokio::test]
  async fn details_keep_parameter_order() {
    let temp = app();
    let runner = RecordingRunner::with_responses([PARAMS]);
    let jsonnet = StaticJsonnet(Value::Null);
    let tools = ToolPaths::default();
    let files = RecognizedFiles::default();

    let details = app_details(&context(&runner, &jsonnet, &tools, &files), temp.path(), Some("prod"))
      .await
      .unwrap();
    assert_eq!(details.name, "guestbook");
    let prod = &details.environments["prod"];
    assert_eq!(prod.k8s_version, "v1.10.0");
    assert_eq!(prod.destination.server, "https://kubernetes.default.svc");
    assert_eq!(prod.destination.namespace, "guestbook-prod");

    let names: Vec<_> = details.parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["name", "replicas", "containerPort"]);
    assert_eq!(details.parameters[1].value, "1");
    assert_eq!(runner.command_lines(), vec!["ks param list --output json --env prod"]);
  }
}
