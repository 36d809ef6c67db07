//! Backend generators and app details extractors.
//!
//! The five generation strategies form a closed set: [`Backend`] is selected
//! once from the detected [`SourceType`] and the source's configuration block,
//! and then dispatched by pattern matching. Backends own no state across
//! calls; everything they need arrives through [`BackendContext`] and the
//! request, so they are safe to run concurrently once the repository lock is
//! held.

pub mod directory;
pub mod helm;
pub mod jsonnet;
pub mod ksonnet;
pub mod kustomize;
pub mod plugin;

use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{RecognizedFiles, ToolPaths};
use crate::exec::{CmdSpec, CommandRunner, ExecError};
use crate::manifest::NormalizeError;
use crate::service::{AppDetailsQuery, ManifestRequest};
use crate::source::{
  AppDetails, ApplicationSource, DetectError, DirectoryAppDetails, DirectorySource, HelmSource, KsonnetSource,
  KustomizeSource, PluginAppDetails, PluginSource, SourceConfig, SourceType,
};

pub use jsonnet::{JsonnetCli, JsonnetError, JsonnetEvaluator};

#[derive(Debug, Error)]
pub enum GenerateError {
  /// An external tool could not be run or exited non-zero.
  #[error("{backend} failed: {source}")]
  Tool {
    backend: SourceType,
    #[source]
    source: ExecError,
  },

  /// A tool's output could not be normalized into manifests.
  #[error("{backend} produced invalid output: {source}")]
  Output {
    backend: SourceType,
    #[source]
    source: NormalizeError,
  },

  /// A manifest file in the application directory could not be parsed.
  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: NormalizeError,
  },

  #[error("failed to evaluate {path}: {source}")]
  Jsonnet {
    path: PathBuf,
    #[source]
    source: JsonnetError,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to walk application directory: {0}")]
  Walk(#[from] walkdir::Error),

  #[error(transparent)]
  Listing(#[from] DetectError),

  /// A chart or ksonnet descriptor is malformed.
  #[error("invalid descriptor {path}: {source}")]
  Descriptor {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("value file '{0}' must be a relative path inside the chart")]
  InvalidValueFile(String),

  #[error("{} resolves outside the repository", .0.display())]
  OutsideRepository(PathBuf),

  #[error("failed to write temporary values file: {0}")]
  TempValues(#[source] io::Error),

  #[error("plugin '{0}' is not registered")]
  UnknownPlugin(String),

  #[error("ksonnet environment '{0}' is not defined in the application")]
  UnknownEnvironment(String),

  #[error("ksonnet source requires an environment")]
  MissingEnvironment,

  #[error("failed to parse ksonnet parameters: {0}")]
  KsonnetParams(#[source] serde_json::Error),
}

/// Shared collaborators and settings handed to every backend call.
#[derive(Clone, Copy)]
pub struct BackendContext<'a> {
  pub runner: &'a dyn CommandRunner,
  pub jsonnet: &'a dyn JsonnetEvaluator,
  pub tools: &'a ToolPaths,
  pub files: &'a RecognizedFiles,
  pub askpass_script: &'a str,
  /// Root of the checked-out repository. Files read by backends must resolve inside it.
  pub repo_root: &'a Path,
}

impl BackendContext<'_> {
  /// Canonicalize `path`, rejecting it when a symlink leads out of the repository.
  pub(crate) fn contained(&self, path: &Path) -> Result<PathBuf, GenerateError> {
    let canonical = |path: &Path| {
      dunce::canonicalize(path).map_err(|source| GenerateError::Read {
        path: path.to_path_buf(),
        source,
      })
    };
    let root = canonical(self.repo_root)?;
    let resolved = canonical(path)?;
    if !resolved.starts_with(&root) {
      warn!(path = %path.display(), target = %resolved.display(), "refusing file outside repository");
      return Err(GenerateError::OutsideRepository(path.to_path_buf()));
    }
    Ok(resolved)
  }

  /// Run a tool invocation on behalf of `backend`, returning its stdout.
  pub(crate) async fn run_tool(&self, backend: SourceType, spec: CmdSpec) -> Result<String, GenerateError> {
    info!(backend = %backend, cmd = %spec.display(), "invoking tool");
    self
      .runner
      .run(&spec)
      .await
      .map(|output| output.stdout)
      .map_err(|source| GenerateError::Tool { backend, source })
  }
}

/// Result of one generation pass, before labelling and serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generated {
  pub manifests: Vec<Value>,
  /// Namespace dictated by the application itself (ksonnet destinations).
  pub namespace: Option<String>,
}

impl From<Vec<Value>> for Generated {
  fn from(manifests: Vec<Value>) -> Self {
    Self {
      manifests,
      namespace: None,
    }
  }
}

/// A selected generation strategy with its configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
  Helm(HelmSource),
  Kustomize(KustomizeSource),
  Ksonnet(KsonnetSource),
  Directory(DirectorySource),
  Plugin(PluginSource),
}

impl Backend {
  /// Pick the backend for `source_type`, using the source's configuration
  /// block when it matches and defaults otherwise.
  pub fn select(source_type: SourceType, source: &ApplicationSource) -> Self {
    match (source_type, &source.config) {
      (SourceType::Helm, Some(SourceConfig::Helm(helm))) => Backend::Helm(helm.clone()),
      (SourceType::Kustomize, Some(SourceConfig::Kustomize(kustomize))) => Backend::Kustomize(kustomize.clone()),
      (SourceType::Ksonnet, Some(SourceConfig::Ksonnet(ksonnet))) => Backend::Ksonnet(ksonnet.clone()),
      (SourceType::Directory, Some(SourceConfig::Directory(directory))) => Backend::Directory(directory.clone()),
      (SourceType::Plugin, Some(SourceConfig::Plugin(plugin))) => Backend::Plugin(plugin.clone()),
      (SourceType::Helm, _) => Backend::Helm(HelmSource::default()),
      (SourceType::Kustomize, _) => Backend::Kustomize(KustomizeSource::default()),
      (SourceType::Ksonnet, _) => Backend::Ksonnet(KsonnetSource::default()),
      (SourceType::Directory, _) => Backend::Directory(DirectorySource::default()),
      (SourceType::Plugin, _) => Backend::Plugin(PluginSource::default()),
    }
  }

  pub fn source_type(&self) -> SourceType {
    match self {
      Backend::Helm(_) => SourceType::Helm,
      Backend::Kustomize(_) => SourceType::Kustomize,
      Backend::Ksonnet(_) => SourceType::Ksonnet,
      Backend::Directory(_) => SourceType::Directory,
      Backend::Plugin(_) => SourceType::Plugin,
    }
  }

  /// Produce the normalized manifests for the application at `app_path`.
  pub async fn generate(
    &self,
    ctx: &BackendContext<'_>,
    app_path: &Path,
    request: &ManifestRequest,
  ) -> Result<Generated, GenerateError> {
    match self {
      Backend::Helm(helm) => helm::generate(ctx, app_path, helm, request).await.map(Generated::from),
      Backend::Kustomize(kustomize) => kustomize::generate(ctx, app_path, kustomize, request)
        .await
        .map(Generated::from),
      Backend::Ksonnet(ksonnet) => ksonnet::generate(ctx, app_path, ksonnet).await,
      Backend::Directory(directory) => directory::generate(ctx, app_path, directory).await.map(Generated::from),
      Backend::Plugin(plugin) => plugin::generate(ctx, app_path, plugin, request).await.map(Generated::from),
    }
  }

  /// Produce the type-specific introspection record for the application at `app_path`.
  pub async fn app_details(
    &self,
    ctx: &BackendContext<'_>,
    app_path: &Path,
    query: &AppDetailsQuery,
  ) -> Result<AppDetails, GenerateError> {
    match self {
      Backend::Helm(_) => {
        let value_files = query.helm.as_ref().map(|helm| helm.value_files.as_slice()).unwrap_or(&[]);
        helm::app_details(ctx, app_path, value_files).map(AppDetails::Helm)
      }
      Backend::Kustomize(_) => kustomize::app_details(ctx, app_path).await.map(AppDetails::Kustomize),
      Backend::Ksonnet(_) => {
        let environment = query.ksonnet.as_ref().map(|ksonnet| ksonnet.environment.as_str());
        ksonnet::app_details(ctx, app_path, environment).await.map(AppDetails::Ksonnet)
      }
      Backend::Directory(_) => Ok(AppDetails::Directory(DirectoryAppDetails {})),
      Backend::Plugin(plugin) => Ok(AppDetails::Plugin(PluginAppDetails {
        name: plugin.name.clone(),
      })),
    }
  }
}

#[cfg(test)]
pub(crate) mod testing {
  //! Recording fakes for backend tests.

  use std::collections::VecDeque;
  use std::sync::Mutex;

  use async_trait::async_trait;

  use super::*;
  use crate::exec::CmdOutput;

  /// Records every invocation and answers from a queue of canned stdouts.
  #[derive(Default)]
  pub struct RecordingRunner {
    pub calls: Mutex<Vec<CmdSpec>>,
    pub responses: Mutex<VecDeque<Result<String, ExecError>>>,
  }

  impl RecordingRunner {
    pub fn with_responses<I, S>(responses: I) -> Self
    where
      I: IntoIterator<Item = S>,
      S: Into<String>,
    {
      Self {
        calls: Mutex::new(Vec::new()),
        responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
      }
    }

    /// Queue a failure for the next invocation.
    pub fn fail_next(&self, stderr: &str) {
      self.responses.lock().unwrap().push_back(Err(ExecError::Failed {
        program: "tool".to_string(),
        code: Some(1),
        stderr: stderr.to_string(),
      }));
    }

    pub fn calls(&self) -> Vec<CmdSpec> {
      self.calls.lock().unwrap().clone()
    }

    /// Each recorded call rendered as `program arg arg ...`.
    pub fn command_lines(&self) -> Vec<String> {
      self.calls().iter().map(CmdSpec::display).collect()
    }
  }

  #[async_trait]
  impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CmdSpec) -> Result<CmdOutput, ExecError> {
      self.calls.lock().unwrap().push(spec.clone());
      let next = self.responses.lock().unwrap().pop_front().unwrap_or_else(|| Ok(String::new()));
      next.map(|stdout| CmdOutput {
        stdout,
        stderr: String::new(),
      })
    }
  }

  /// Evaluator that returns a fixed value for every file.
  pub struct StaticJsonnet(pub Value);

  #[async_trait]
  impl JsonnetEvaluator for StaticJsonnet {
    async fn evaluate(
      &self,
      _file: &Path,
      _cwd: &Path,
      _vars: &crate::source::JsonnetSource,
    ) -> Result<Value, JsonnetError> {
      Ok(self.0.clone())
    }
  }

  pub fn context<'a>(
    runner: &'a dyn CommandRunner,
    jsonnet: &'a dyn JsonnetEvaluator,
    tools: &'a ToolPaths,
    files: &'a RecognizedFiles,
  ) -> BackendContext<'a> {
    BackendContext {
      runner,
      jsonnet,
      tools,
      files,
      askpass_script: "git-ask-pass.sh",
      repo_root: Path::new("/"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn select_uses_matching_block() {
    let source = ApplicationSource {
      config: Some(SourceConfig::Helm(HelmSource {
        release_name: Some("redis".to_string()),
        ..Default::default()
      })),
      ..Default::default()
    };
    match Backend::select(SourceType::Helm, &source) {
      Backend::Helm(helm) => assert_eq!(helm.release_name.as_deref(), Some("redis")),
      other => panic!("unexpected backend {other:?}"),
    }
  }

  #[test]
  fn select_defaults_detected_type() {
    let backend = Backend::select(SourceType::Kustomize, &ApplicationSource::default());
    assert_eq!(backend, Backend::Kustomize(KustomizeSource::default()));
    assert_eq!(backend.source_type(), SourceType::Kustomize);
  }
}
