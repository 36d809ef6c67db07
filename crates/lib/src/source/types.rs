//! Application source and app details types.
//!
//! - [`ApplicationSource`] - the declared recipe for one deployable unit
//! - [`SourceConfig`] - the backend-specific configuration block (at most one)
//! - [`AppDetails`] - per-type introspection records

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The generation strategy used for an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
  Helm,
  Kustomize,
  Ksonnet,
  Plugin,
  Directory,
}

impl SourceType {
  pub fn as_str(self) -> &'static str {
    match self {
      SourceType::Helm => "Helm",
      SourceType::Kustomize => "Kustomize",
      SourceType::Ksonnet => "Ksonnet",
      SourceType::Plugin => "Plugin",
      SourceType::Directory => "Directory",
    }
  }
}

impl fmt::Display for SourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Transport flavour of a repository entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
  #[default]
  Git,
  Helm,
}

/// A source repository and the credentials used to reach it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
  pub url: String,
  /// Short name, used when registering helm repositories.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub password: Option<String>,
  #[serde(default)]
  pub kind: RepositoryKind,
}

impl Repository {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      ..Default::default()
    }
  }

  /// Returns the username/password pair when both are set.
  pub fn credentials(&self) -> Option<(&str, &str)> {
    match (self.username.as_deref(), self.password.as_deref()) {
      (Some(user), Some(pass)) if !user.is_empty() || !pass.is_empty() => Some((user, pass)),
      _ => None,
    }
  }

  /// Name used for `helm repo add`, derived from the URL when not set.
  pub fn display_name(&self) -> String {
    if let Some(name) = &self.name {
      return name.clone();
    }
    let trimmed = self.url.trim_end_matches('/').trim_end_matches(".git");
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
  }
}

/// The declared recipe describing how to produce manifests for one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
  pub repo_url: String,
  /// Path of the application relative to the repository root.
  #[serde(default)]
  pub path: String,
  /// Branch, tag, commit, or empty for `HEAD`.
  #[serde(default)]
  pub target_revision: String,
  /// Backend-specific configuration. `None` means auto-detection.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub config: Option<SourceConfig>,
}

impl ApplicationSource {
  /// The source type implied by the configuration block, if one is set.
  pub fn explicit_type(&self) -> Option<SourceType> {
    self.config.as_ref().map(SourceConfig::source_type)
  }

  pub fn helm(&self) -> Option<&HelmSource> {
    match &self.config {
      Some(SourceConfig::Helm(helm)) => Some(helm),
      _ => None,
    }
  }

  pub fn directory(&self) -> Option<&DirectorySource> {
    match &self.config {
      Some(SourceConfig::Directory(directory)) => Some(directory),
      _ => None,
    }
  }

  pub fn plugin(&self) -> Option<&PluginSource> {
    match &self.config {
      Some(SourceConfig::Plugin(plugin)) => Some(plugin),
      _ => None,
    }
  }
}

/// Backend-specific configuration. Exactly one block per source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceConfig {
  Helm(HelmSource),
  Kustomize(KustomizeSource),
  Ksonnet(KsonnetSource),
  Directory(DirectorySource),
  Plugin(PluginSource),
}

impl SourceConfig {
  pub fn source_type(&self) -> SourceType {
    match self {
      SourceConfig::Helm(_) => SourceType::Helm,
      SourceConfig::Kustomize(_) => SourceType::Kustomize,
      SourceConfig::Ksonnet(_) => SourceType::Ksonnet,
      SourceConfig::Directory(_) => SourceType::Directory,
      SourceConfig::Plugin(_) => SourceType::Plugin,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelmSource {
  /// Extra value files, applied after `values.yaml` in the order given.
  pub value_files: Vec<String>,
  /// Overrides applied last, with the highest precedence.
  pub parameters: Vec<HelmParameter>,
  /// Inline values YAML, applied after the value files.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub values: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub release_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmParameter {
  pub name: String,
  pub value: String,
  /// Pass with `--set-string` instead of `--set`.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub force_string: bool,
}

impl HelmParameter {
  pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      value: value.into(),
      force_string: false,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KustomizeSource {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name_prefix: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name_suffix: Option<String>,
  /// Image overrides in kustomize syntax, e.g. `nginx=nginx:1.17`.
  pub images: Vec<String>,
  pub common_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KsonnetSource {
  pub environment: String,
  pub parameters: Vec<KsonnetParameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KsonnetParameter {
  pub component: String,
  pub name: String,
  pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectorySource {
  pub recurse: bool,
  pub jsonnet: JsonnetSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JsonnetSource {
  pub ext_vars: Vec<JsonnetVar>,
  pub tlas: Vec<JsonnetVar>,
  /// Library search paths relative to the repository root.
  pub libs: Vec<String>,
}

/// A Jsonnet variable. `code` values are injected verbatim as Jsonnet expressions,
/// other values as string literals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonnetVar {
  pub name: String,
  pub value: String,
  #[serde(default)]
  pub code: bool,
}

impl JsonnetVar {
  pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      value: value.into(),
      code: false,
    }
  }

  pub fn code(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      value: value.into(),
      code: true,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSource {
  pub name: String,
  #[serde(default)]
  pub env: Vec<EnvEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
  pub name: String,
  pub value: String,
}

/// A registered config management plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigManagementPlugin {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub init: Option<PluginCommand>,
  pub generate: PluginCommand,
}

/// `command[0]` is the program; `command[1..]` and `args` follow it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCommand {
  pub command: Vec<String>,
  #[serde(default)]
  pub args: Vec<String>,
}

/// Introspection record for one application, tagged by its source type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AppDetails {
  Helm(HelmAppDetails),
  Kustomize(KustomizeAppDetails),
  Ksonnet(KsonnetAppDetails),
  Directory(DirectoryAppDetails),
  Plugin(PluginAppDetails),
}

impl AppDetails {
  pub fn source_type(&self) -> SourceType {
    match self {
      AppDetails::Helm(_) => SourceType::Helm,
      AppDetails::Kustomize(_) => SourceType::Kustomize,
      AppDetails::Ksonnet(_) => SourceType::Ksonnet,
      AppDetails::Directory(_) => SourceType::Directory,
      AppDetails::Plugin(_) => SourceType::Plugin,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmAppDetails {
  /// Chart name from `Chart.yaml`.
  pub name: String,
  /// Every value file available in the chart directory, sorted.
  pub value_files: Vec<String>,
  /// Effective values YAML after merging the selected value files.
  pub values: String,
  /// Flattened parameters with their effective values, sorted by name.
  pub parameters: Vec<HelmParameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KustomizeAppDetails {
  pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KsonnetAppDetails {
  pub name: String,
  pub environments: BTreeMap<String, KsonnetEnvironment>,
  /// Component parameters in declaration order.
  pub parameters: Vec<KsonnetParameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KsonnetEnvironment {
  #[serde(default)]
  pub k8s_version: String,
  #[serde(default)]
  pub path: String,
  #[serde(default)]
  pub destination: KsonnetDestination,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KsonnetDestination {
  #[serde(default)]
  pub server: String,
  #[serde(default)]
  pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryAppDetails {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginAppDetails {
  pub name: String,
}
