//! Request and response types of the manifest service.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::source::{ApplicationSource, ConfigManagementPlugin, Repository, SourceType};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManifestRequest {
  /// Repository holding the source, with its credentials if any.
  pub repo: Repository,
  pub source: ApplicationSource,
  pub app_label_key: Option<String>,
  pub app_label_value: Option<String>,
  pub namespace: String,
  pub kube_version: Option<String>,
  pub api_versions: Vec<String>,
  /// Registered config management plugins.
  pub plugins: Vec<ConfigManagementPlugin>,
  /// Auxiliary repositories; helm-kind entries serve chart dependencies.
  pub repos: Vec<Repository>,
  /// Recompute even when a cached response exists.
  pub no_cache: bool,
  /// Overrides the configured request timeout.
  #[serde(skip)]
  pub timeout: Option<Duration>,
}

impl ManifestRequest {
  pub fn new(repo: Repository, source: ApplicationSource) -> Self {
    Self {
      repo,
      source,
      ..Default::default()
    }
  }

  /// Label key and value to stamp on generated objects, when both are set.
  pub fn app_label(&self) -> Option<(&str, &str)> {
    match (self.app_label_key.as_deref(), self.app_label_value.as_deref()) {
      (Some(key), Some(value)) if !key.is_empty() && !value.is_empty() => Some((key, value)),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestResponse {
  /// Compact JSON documents in generator emission order.
  pub manifests: Vec<String>,
  pub namespace: String,
  /// Concrete commit the manifests were generated from.
  pub revision: String,
  pub source_type: Option<SourceType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListAppsRequest {
  pub repo: Repository,
  pub revision: String,
}

/// Application name to path relative to the repository root.
pub type AppList = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelmAppDetailsQuery {
  pub value_files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KsonnetAppDetailsQuery {
  pub environment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppDetailsQuery {
  pub repo: Repository,
  pub revision: String,
  pub path: String,
  pub helm: Option<HelmAppDetailsQuery>,
  pub ksonnet: Option<KsonnetAppDetailsQuery>,
  /// Report the app as handled by this plugin instead of detecting its type.
  pub plugin: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RevisionMetadataRequest {
  pub repo: Repository,
  pub app: String,
  pub revision: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn app_label_needs_key_and_value() {
    let mut request = ManifestRequest::default();
    assert_eq!(request.app_label(), None);
    request.app_label_key = Some("app.kubernetes.io/instance".to_string());
    assert_eq!(request.app_label(), None);
    request.app_label_value = Some("guestbook".to_string());
    assert_eq!(request.app_label(), Some(("app.kubernetes.io/instance", "guestbook")));
  }

  #[test]
  fn request_deserializes_with_defaults() {
    let request: ManifestRequest = serde_json::from_str(
      r#"{"repo":{"url":"https://example.com/repo.git"},"source":{"repoUrl":"https://example.com/repo.git","path":"guestbook"},"noCache":true}"#,
    )
    .unwrap();
    assert!(request.no_cache);
    assert_eq!(request.source.path, "guestbook");
    assert!(request.plugins.is_empty());
    assert_eq!(request.timeout, None);
  }
}
