//! Server configuration.
//!
//! Configuration is read from an optional YAML file and then overridden by
//! `REPOSERVER_*` environment variables. Every field has a default, so an
//! empty file (or no file at all) is a valid configuration.
//!
//! ```yaml
//! repoCacheDir: /var/cache/reposerver/repos
//! cacheTtl: 24h
//! requestTimeout: 90s
//! tools:
//!   helm: /usr/local/bin/helm
//! recognizedFiles:
//!   manifestExtensions: [yaml, yml, json]
//! plugins:
//!   - name: cdk8s
//!     generate:
//!       command: [cdk8s, synth]
//!       args: [--stdout]
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

use crate::paths::{config_dir, repo_cache_dir};
use crate::source::ConfigManagementPlugin;

pub const ENV_REPO_CACHE_DIR: &str = "REPOSERVER_REPO_CACHE_DIR";
pub const ENV_CACHE_TTL: &str = "REPOSERVER_CACHE_TTL";
pub const ENV_REQUEST_TIMEOUT: &str = "REPOSERVER_REQUEST_TIMEOUT";
pub const ENV_LOCK_TIMEOUT: &str = "REPOSERVER_LOCK_TIMEOUT";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config file '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("invalid duration in {name}: {source}")]
  Duration {
    name: String,
    #[source]
    source: humantime::DurationError,
  },
}

/// Filenames and extensions that drive source type detection and directory generation.
///
/// All matching against this table is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecognizedFiles {
  pub manifest_extensions: Vec<String>,
  pub jsonnet_extensions: Vec<String>,
  pub helm_chart: Vec<String>,
  pub kustomization: Vec<String>,
  pub ksonnet_app: Vec<String>,
  /// Directory that must sit next to the ksonnet descriptor.
  pub ksonnet_components_dir: String,
  /// Prefix of helm value files (`values.yaml`, `values-production.yaml`, ...).
  pub helm_values_prefix: String,
}

impl Default for RecognizedFiles {
  fn default() -> Self {
    Self {
      manifest_extensions: vec!["yaml".to_string(), "yml".to_string(), "json".to_string()],
      jsonnet_extensions: vec!["jsonnet".to_string()],
      helm_chart: vec!["Chart.yaml".to_string()],
      kustomization: vec![
        "kustomization.yaml".to_string(),
        "kustomization.yml".to_string(),
        "Kustomization".to_string(),
      ],
      ksonnet_app: vec!["app.yaml".to_string()],
      ksonnet_components_dir: "components".to_string(),
      helm_values_prefix: "values".to_string(),
    }
  }
}

impl RecognizedFiles {
  pub fn is_manifest_file(&self, path: &Path) -> bool {
    has_extension(path, &self.manifest_extensions)
  }

  pub fn is_jsonnet_file(&self, path: &Path) -> bool {
    has_extension(path, &self.jsonnet_extensions)
  }

  pub fn is_helm_values_file(&self, name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with(&self.helm_values_prefix.to_ascii_lowercase())
      && (lower.ends_with(".yaml") || lower.ends_with(".yml"))
  }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// Names of the external templating binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
  pub helm: String,
  pub kustomize: String,
  pub ks: String,
  pub jsonnet: String,
}

impl Default for ToolPaths {
  fn default() -> Self {
    Self {
      helm: "helm".to_string(),
      kustomize: "kustomize".to_string(),
      ks: "ks".to_string(),
      jsonnet: "jsonnet".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
  /// Where repository clones and worktrees are kept.
  pub repo_cache_dir: PathBuf,
  #[serde(with = "humantime_field")]
  pub cache_ttl: Duration,
  /// Upper bound for one request, including lock wait, checkout and generation.
  #[serde(with = "humantime_field")]
  pub request_timeout: Duration,
  /// Upper bound for waiting on a repository lock.
  #[serde(with = "humantime_field")]
  pub lock_timeout: Duration,
  pub tools: ToolPaths,
  /// Script exposed to plugins through `GIT_ASKPASS`.
  pub askpass_script: String,
  pub recognized_files: RecognizedFiles,
  /// Config management plugins available to plugin sources.
  pub plugins: Vec<ConfigManagementPlugin>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      repo_cache_dir: repo_cache_dir(),
      cache_ttl: Duration::from_secs(24 * 60 * 60),
      request_timeout: Duration::from_secs(90),
      lock_timeout: Duration::from_secs(60),
      tools: ToolPaths::default(),
      askpass_script: "git-ask-pass.sh".to_string(),
      recognized_files: RecognizedFiles::default(),
      plugins: Vec::new(),
    }
  }
}

impl ServerConfig {
  /// `config.yaml` in the user's configuration directory.
  pub fn default_path() -> PathBuf {
    config_dir().join("config.yaml")
  }

  /// Load configuration from `path`, or from [`ServerConfig::default_path`]
  /// when it exists, and apply environment overrides.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let default_path = Self::default_path();
    let mut config = match path {
      Some(path) => Self::from_file(path)?,
      None if default_path.is_file() => Self::from_file(&default_path)?,
      None => Self::default(),
    };
    config.apply_env()?;
    Ok(config)
  }

  /// Parse a YAML configuration file without applying environment overrides.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    if content.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  fn apply_env(&mut self) -> Result<(), ConfigError> {
    if let Ok(dir) = std::env::var(ENV_REPO_CACHE_DIR) {
      debug!(dir, "repo cache dir overridden from environment");
      self.repo_cache_dir = PathBuf::from(dir);
    }
    if let Some(ttl) = env_duration(ENV_CACHE_TTL)? {
      self.cache_ttl = ttl;
    }
    if let Some(timeout) = env_duration(ENV_REQUEST_TIMEOUT)? {
      self.request_timeout = timeout;
    }
    if let Some(timeout) = env_duration(ENV_LOCK_TIMEOUT)? {
      self.lock_timeout = timeout;
    }
    Ok(())
  }
}

fn env_duration(name: &str) -> Result<Option<Duration>, ConfigError> {
  match std::env::var(name) {
    Ok(value) => humantime::parse_duration(&value)
      .map(Some)
      .map_err(|source| ConfigError::Duration {
        name: name.to_string(),
        source,
      }),
    Err(_) => Ok(None),
  }
}

mod humantime_field {
  use super::*;

  pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
  }
}
