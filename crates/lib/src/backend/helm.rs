//! Helm charts.
//!
//! Rendering shells out to `helm template`. App details are computed locally
//! from the chart's value files, so they do not need the helm binary.

use std::io::Write;
use std::path::{Component, Path};

use serde::Deserialize;
use serde_json::Value;
use serde_yaml::Value as YamlValue;
use tracing::debug;

use crate::config::RecognizedFiles;
use crate::exec::CmdSpec;
use crate::manifest::normalize_yaml;
use crate::service::ManifestRequest;
use crate::source::{DirListing, HelmAppDetails, HelmParameter, HelmSource, RepositoryKind, SourceType};

use super::{BackendContext, GenerateError};

const DEFAULT_VALUES: &str = "values.yaml";
const REQUIREMENTS: &str = "requirements.yaml";
const CHARTS_DIR: &str = "charts";

#[derive(Debug, Default, Deserialize)]
struct ChartDescriptor {
  #[serde(default)]
  name: String,
  #[serde(default)]
  dependencies: Vec<YamlValue>,
}

fn read_chart(files: &RecognizedFiles, app_path: &Path, listing: &DirListing) -> Result<ChartDescriptor, GenerateError> {
  let Some(name) = listing.find_file(&files.helm_chart) else {
    return Ok(ChartDescriptor::default());
  };
  let path = app_path.join(name);
  let content = std::fs::read_to_string(&path).map_err(|source| GenerateError::Read {
    path: path.clone(),
    source,
  })?;
  serde_yaml::from_str(&content).map_err(|source| GenerateError::Descriptor { path, source })
}

/// Remote value files are passed through to helm untouched.
fn is_remote(name: &str) -> bool {
  name.starts_with("http://") || name.starts_with("https://")
}

fn check_value_file(name: &str) -> Result<(), GenerateError> {
  if is_remote(name) {
    return Ok(());
  }
  let path = Path::new(name);
  if path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
    return Err(GenerateError::InvalidValueFile(name.to_string()));
  }
  Ok(())
}

pub async fn generate(
  ctx: &BackendContext<'_>,
  app_path: &Path,
  source: &HelmSource,
  request: &ManifestRequest,
) -> Result<Vec<Value>, GenerateError> {
  let helm = ctx.tools.helm.as_str();
  let listing = DirListing::read(app_path)?;
  let chart = read_chart(ctx.files, app_path, &listing)?;

  let needs_dependencies = (listing.find_file(&[REQUIREMENTS.to_string()]).is_some() || !chart.dependencies.is_empty())
    && !listing.has_dir(CHARTS_DIR);
  if needs_dependencies {
    for repo in request.repos.iter().filter(|repo| repo.kind == RepositoryKind::Helm) {
      let mut add = CmdSpec::new(helm, app_path)
        .args(["repo", "add"])
        .arg(repo.display_name())
        .arg(repo.url.clone());
      if let Some((username, password)) = repo.credentials() {
        add = add.args(["--username", username, "--password-stdin"]).stdin(password);
      }
      ctx.run_tool(SourceType::Helm, add).await?;
    }
    ctx
      .run_tool(SourceType::Helm, CmdSpec::new(helm, app_path).args(["dependency", "build"]))
      .await?;
  }

  let release = source
    .release_name
    .clone()
    .or_else(|| request.app_label_value.clone())
    .unwrap_or_else(|| directory_name(app_path));

  let mut template = CmdSpec::new(helm, app_path).arg("template").arg(release).arg(".");
  if !request.namespace.is_empty() {
    template = template.arg("--namespace").arg(request.namespace.clone());
  }
  for file in &source.value_files {
    check_value_file(file)?;
    if !is_remote(file) {
      ctx.contained(&app_path.join(file))?;
    }
    template = template.arg("--values").arg(file.clone());
  }

  // Inline values rank above value files and below parameters.
  let _inline = match source.values.as_deref().filter(|values| !values.trim().is_empty()) {
    Some(values) => {
      let mut file = tempfile::Builder::new()
        .prefix("values-")
        .suffix(".yaml")
        .tempfile()
        .map_err(GenerateError::TempValues)?;
      file.write_all(values.as_bytes()).map_err(GenerateError::TempValues)?;
      template = template.arg("--values").arg(file.path().to_string_lossy());
      Some(file)
    }
    None => None,
  };

  for parameter in &source.parameters {
    let flag = if parameter.force_string { "--set-string" } else { "--set" };
    template = template
      .arg(flag)
      .arg(format!("{}={}", parameter.name, parameter.value));
  }
  for api_version in &request.api_versions {
    template = template.arg("--api-versions").arg(api_version.clone());
  }
  if let Some(kube_version) = request.kube_version.as_deref().filter(|v| !v.is_empty()) {
    template = template.arg("--kube-version").arg(kube_version);
  }

  let output = ctx.run_tool(SourceType::Helm, template).await?;
  normalize_yaml(&output).map_err(|source| GenerateError::Output {
    backend: SourceType::Helm,
    source,
  })
}

fn directory_name(app_path: &Path) -> String {
  app_path
    .file_name()
    .map(|name| name.to_string_lossy().to_string())
    .unwrap_or_default()
}

/// Introspect the chart at `app_path` with the given additional value files selected.
pub fn app_details(
  ctx: &BackendContext<'_>,
  app_path: &Path,
  selected: &[String],
) -> Result<HelmAppDetails, GenerateError> {
  let files = ctx.files;
  let listing = DirListing::read(app_path)?;
  let chart = read_chart(files, app_path, &listing)?;

  let value_files: Vec<String> = listing
    .files
    .iter()
    .filter(|name| files.is_helm_values_file(name))
    .cloned()
    .collect();

  let mut merged = YamlValue::Null;
  if let Some(default) = listing.find_file(&[DEFAULT_VALUES.to_string()]) {
    merge(&mut merged, read_values(ctx, &app_path.join(default))?);
  }
  for name in selected.iter().filter(|name| !is_remote(name)) {
    check_value_file(name)?;
    if name.eq_ignore_ascii_case(DEFAULT_VALUES) {
      continue;
    }
    merge(&mut merged, read_values(ctx, &app_path.join(name))?);
  }

  let values = if merged.is_null() {
    String::new()
  } else {
    serde_yaml::to_string(&merged).map_err(|source| GenerateError::Descriptor {
      path: app_path.join(DEFAULT_VALUES),
      source,
    })?
  };

  let mut parameters = Vec::new();
  flatten("", &merged, &mut parameters);
  parameters.sort_by(|a, b| a.name.cmp(&b.name));
  debug!(chart = %chart.name, parameters = parameters.len(), "computed helm app details");

  Ok(HelmAppDetails {
    name: chart.name,
    value_files,
    values,
    parameters,
  })
}

fn read_values(ctx: &BackendContext<'_>, path: &Path) -> Result<YamlValue, GenerateError> {
  let content = std::fs::read_to_string(ctx.contained(path)?).map_err(|source| GenerateError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  if content.trim().is_empty() {
    return Ok(YamlValue::Null);
  }
  serde_yaml::from_str(&content).map_err(|source| GenerateError::Descriptor {
    path: path.to_path_buf(),
    source,
  })
}

/// Deep-merge `overlay` into `base`. Mappings merge key by key, anything else replaces.
fn merge(base: &mut YamlValue, overlay: YamlValue) {
  match (base, overlay) {
    (YamlValue::Mapping(base), YamlValue::Mapping(overlay)) => {
      for (key, value) in overlay {
        match base.get_mut(&key) {
          Some(existing) => merge(existing, value),
          None => {
            base.insert(key, value);
          }
        }
      }
    }
    (_, YamlValue::Null) => {}
    (base, overlay) => *base = overlay,
  }
}

/// Flatten values into `a.b[0].c` style parameters.
fn flatten(prefix: &str, value: &YamlValue, out: &mut Vec<HelmParameter>) {
  match value {
    YamlValue::Mapping(map) if !map.is_empty() => {
      for (key, child) in map {
        let key = scalar_string(key);
        let name = if prefix.is_empty() { key } else { format!("{prefix}.{key}") };
        flatten(&name, child, out);
      }
    }
    YamlValue::Sequence(items) if !items.is_empty() => {
      for (index, child) in items.iter().enumerate() {
        flatten(&format!("{prefix}[{index}]"), child, out);
      }
    }
    YamlValue::Tagged(tagged) => flatten(prefix, &tagged.value, out),
    leaf if !prefix.is_empty() => out.push(HelmParameter::new(prefix, scalar_string(leaf))),
    _ => {}
  }
}

fn scalar_string(value: &YamlValue) -> String {
  match value {
    YamlValue::Null => "null".to_string(),
    YamlValue::Bool(b) => b.to_string(),
    YamlValue::Number(n) => n.to_string(),
    YamlValue::String(s) => s.clone(),
    YamlValue::Mapping(_) => "{}".to_string(),
    YamlValue::Sequence(_) => "[]".to_string(),
    YamlValue::Tagged(tagged) => scalar_string(&tagged.value),
  }
}
