//! Manifest service.
//!
//! [`ManifestService`] is the orchestrator behind the four repo-server
//! operations. For each request it resolves the revision, consults the
//! response cache, takes the per-repository lock, checks out the working
//! copy, detects the source type and dispatches to a [`Backend`].
//!
//! Every operation runs under a deadline. Dropping the in-flight future
//! releases the repository lock and kills spawned tools, so a timed-out
//! request never leaves the lock held.

mod types;

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::backend::{Backend, BackendContext, GenerateError, JsonnetCli, JsonnetEvaluator};
use crate::cache::{CacheError, CacheStore, ResponseCache};
use crate::config::{RecognizedFiles, ServerConfig};
use crate::consts::{ELLIPSIS, REVISION_MESSAGE_MAX_LEN};
use crate::exec::CommandRunner;
use crate::lock::{LockError, RepoLock, RepoLockGuard};
use crate::manifest::{set_app_instance_label, to_manifest_strings};
use crate::repo::{Repo, RepoError, RepoFactory, RevisionMetadata};
use crate::source::{
  AppDetails, ApplicationSource, ConfigManagementPlugin, DetectError, DirListing, PluginSource, RepositoryKind,
  SourceConfig, detect_implicit, detect_source_type,
};
use crate::util::hash::Hashable;

pub use types::*;

const MANIFEST_PREFIX: &str = "mfst";
const APP_DETAILS_PREFIX: &str = "appdetails";
const LIST_APPS_PREFIX: &str = "apps";
const REVISION_METADATA_PREFIX: &str = "rmeta";

#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("invalid application path '{0}': must be relative and stay inside the repository")]
  InvalidPath(String),

  #[error(transparent)]
  Detect(#[from] DetectError),

  /// Parse and backend failures, carrying the backend name and tool output.
  #[error(transparent)]
  Generate(#[from] GenerateError),

  /// Revision resolution and checkout failures.
  #[error(transparent)]
  Repo(#[from] RepoError),

  #[error(transparent)]
  LockTimeout(#[from] LockError),

  #[error("{operation} timed out after {limit:?}")]
  Timeout { operation: &'static str, limit: Duration },

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("failed to walk repository: {0}")]
  Walk(#[from] walkdir::Error),
}

impl ServiceError {
  /// Whether the request gave up waiting for the repository lock.
  pub fn is_lock_timeout(&self) -> bool {
    matches!(self, ServiceError::LockTimeout(_))
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestKey<'a> {
  repo: &'a str,
  revision: &'a str,
  path: &'a str,
  config: &'a Option<SourceConfig>,
  namespace: &'a str,
  app_label_key: Option<&'a str>,
  app_label_value: Option<&'a str>,
  kube_version: Option<&'a str>,
  api_versions: &'a [String],
  plugins: &'a [ConfigManagementPlugin],
  helm_repos: Vec<&'a str>,
}

impl Hashable for ManifestKey<'_> {}

impl<'a> ManifestKey<'a> {
  fn new(request: &'a ManifestRequest, revision: &'a str) -> Self {
    Self {
      repo: &request.repo.url,
      revision,
      path: &request.source.path,
      config: &request.source.config,
      namespace: &request.namespace,
      app_label_key: request.app_label_key.as_deref(),
      app_label_value: request.app_label_value.as_deref(),
      kube_version: request.kube_version.as_deref(),
      api_versions: &request.api_versions,
      plugins: &request.plugins,
      helm_repos: request
        .repos
        .iter()
        .filter(|repo| repo.kind == RepositoryKind::Helm)
        .map(|repo| repo.url.as_str())
        .collect(),
    }
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppDetailsKey<'a> {
  repo: &'a str,
  revision: &'a str,
  path: &'a str,
  helm: &'a Option<HelmAppDetailsQuery>,
  ksonnet: &'a Option<KsonnetAppDetailsQuery>,
  plugin: Option<&'a str>,
}

impl Hashable for AppDetailsKey<'_> {}

#[derive(Serialize)]
struct RevisionKey<'a> {
  repo: &'a str,
  app: &'a str,
  revision: &'a str,
}

impl Hashable for RevisionKey<'_> {}

pub struct ManifestService {
  config: ServerConfig,
  repos: Arc<dyn RepoFactory>,
  runner: Arc<dyn CommandRunner>,
  jsonnet: Arc<dyn JsonnetEvaluator>,
  locks: RepoLock,
  cache: ResponseCache,
}

impl ManifestService {
  /// Build a service that evaluates Jsonnet through the configured `jsonnet` binary.
  pub fn new(
    config: ServerConfig,
    repos: Arc<dyn RepoFactory>,
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn CacheStore>,
  ) -> Self {
    let jsonnet = Arc::new(JsonnetCli::new(config.tools.jsonnet.clone(), runner.clone()));
    let cache = ResponseCache::new(store, config.cache_ttl);
    Self {
      config,
      repos,
      runner,
      jsonnet,
      locks: RepoLock::new(),
      cache,
    }
  }

  pub fn with_jsonnet(mut self, jsonnet: Arc<dyn JsonnetEvaluator>) -> Self {
    self.jsonnet = jsonnet;
    self
  }

  pub fn config(&self) -> &ServerConfig {
    &self.config
  }

  fn context<'a>(&'a self, repo_root: &'a Path) -> BackendContext<'a> {
    BackendContext {
      runner: self.runner.as_ref(),
      jsonnet: self.jsonnet.as_ref(),
      tools: &self.config.tools,
      files: &self.config.recognized_files,
      askpass_script: &self.config.askpass_script,
      repo_root,
    }
  }

  async fn lock(&self, repo: &dyn Repo) -> Result<RepoLockGuard, ServiceError> {
    Ok(self.locks.acquire_timeout(&repo.lock_key(), self.config.lock_timeout).await?)
  }

  async fn deadline<T>(
    &self,
    operation: &'static str,
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T, ServiceError>>,
  ) -> Result<T, ServiceError> {
    let limit = limit.unwrap_or(self.config.request_timeout);
    match tokio::time::timeout(limit, fut).await {
      Ok(result) => result,
      Err(_) => {
        warn!(operation, ?limit, "request timed out");
        Err(ServiceError::Timeout { operation, limit })
      }
    }
  }

  /// Generate the manifests of one application at a revision.
  pub async fn generate_manifest(&self, request: &ManifestRequest) -> Result<ManifestResponse, ServiceError> {
    self
      .deadline("generate manifest", request.timeout, self.run_generate(request))
      .await
  }

  async fn run_generate(&self, request: &ManifestRequest) -> Result<ManifestResponse, ServiceError> {
    let rel = relative_app_path(&request.source.path)?;
    let repo = self.repos.new_repo(&request.repo)?;
    let revision = repo.resolve_revision(&request.source.target_revision).await?;
    info!(
      repo = %request.repo.url,
      revision = %revision,
      path = %request.source.path,
      "generating manifests"
    );

    let key = ResponseCache::key(MANIFEST_PREFIX, &ManifestKey::new(request, &revision))?;
    if !request.no_cache
      && let Some(cached) = self.cache.get::<ManifestResponse>(&key)?
    {
      info!(revision = %revision, "manifest cache hit");
      return Ok(cached);
    }

    let _guard = self.lock(repo.as_ref()).await?;
    // A concurrent identical request may have finished while this one waited.
    if !request.no_cache
      && let Some(cached) = self.cache.get::<ManifestResponse>(&key)?
    {
      info!(revision = %revision, "manifest cache hit after lock wait");
      return Ok(cached);
    }

    let root = repo.checkout(&revision).await?;
    let app_path = root.join(&rel);
    let files = &self.config.recognized_files;
    let source_type = detect_source_type(&request.source, &app_path, files)?;
    let backend = Backend::select(source_type, &request.source);
    let generated = backend.generate(&self.context(&root), &app_path, request).await?;

    let mut manifests = generated.manifests;
    if let Some((label_key, label_value)) = request.app_label() {
      set_app_instance_label(&mut manifests, label_key, label_value);
    }
    let manifests = to_manifest_strings(&manifests).map_err(|source| GenerateError::Output {
      backend: source_type,
      source,
    })?;

    let response = ManifestResponse {
      manifests,
      namespace: generated.namespace.unwrap_or_else(|| request.namespace.clone()),
      revision,
      source_type: Some(source_type),
    };
    info!(
      source_type = %source_type,
      count = response.manifests.len(),
      "generated manifests"
    );
    self.cache.set(&key, &response)?;
    Ok(response)
  }

  /// Enumerate the Helm, Kustomize and Ksonnet applications in a repository.
  pub async fn list_apps(&self, request: &ListAppsRequest) -> Result<AppList, ServiceError> {
    self.deadline("list apps", None, self.run_list_apps(request)).await
  }

  async fn run_list_apps(&self, request: &ListAppsRequest) -> Result<AppList, ServiceError> {
    let repo = self.repos.new_repo(&request.repo)?;
    let revision = repo.resolve_revision(&request.revision).await?;
    let key = ResponseCache::key(
      LIST_APPS_PREFIX,
      &RevisionKey {
        repo: &request.repo.url,
        app: "",
        revision: &revision,
      },
    )?;
    if let Some(cached) = self.cache.get::<AppList>(&key)? {
      return Ok(cached);
    }

    let _guard = self.lock(repo.as_ref()).await?;
    let root = repo.checkout(&revision).await?;
    let apps = discover_apps(&root, &self.config.recognized_files)?;
    info!(repo = %request.repo.url, revision = %revision, count = apps.len(), "listed applications");
    self.cache.set(&key, &apps)?;
    Ok(apps)
  }

  /// Introspect one application without generating its manifests.
  pub async fn get_app_details(&self, query: &AppDetailsQuery) -> Result<AppDetails, ServiceError> {
    self.deadline("get app details", None, self.run_app_details(query)).await
  }

  async fn run_app_details(&self, query: &AppDetailsQuery) -> Result<AppDetails, ServiceError> {
    let rel = relative_app_path(&query.path)?;
    let repo = self.repos.new_repo(&query.repo)?;
    let revision = repo.resolve_revision(&query.revision).await?;
    let key = ResponseCache::key(
      APP_DETAILS_PREFIX,
      &AppDetailsKey {
        repo: &query.repo.url,
        revision: &revision,
        path: &query.path,
        helm: &query.helm,
        ksonnet: &query.ksonnet,
        plugin: query.plugin.as_deref(),
      },
    )?;
    if let Some(cached) = self.cache.get::<AppDetails>(&key)? {
      return Ok(cached);
    }

    let _guard = self.lock(repo.as_ref()).await?;
    let root = repo.checkout(&revision).await?;
    let app_path = root.join(&rel);
    let backend = match &query.plugin {
      Some(name) => Backend::Plugin(PluginSource {
        name: name.clone(),
        env: Vec::new(),
      }),
      None => {
        let source_type = detect_source_type(&ApplicationSource::default(), &app_path, &self.config.recognized_files)?;
        Backend::select(source_type, &ApplicationSource::default())
      }
    };
    debug!(path = %query.path, source_type = %backend.source_type(), "extracting app details");
    let details = backend.app_details(&self.context(&root), &app_path, query).await?;
    self.cache.set(&key, &details)?;
    Ok(details)
  }

  /// Author, message and tags of a revision. The message is truncated.
  pub async fn get_revision_metadata(&self, request: &RevisionMetadataRequest) -> Result<RevisionMetadata, ServiceError> {
    self
      .deadline("get revision metadata", None, self.run_revision_metadata(request))
      .await
  }

  async fn run_revision_metadata(&self, request: &RevisionMetadataRequest) -> Result<RevisionMetadata, ServiceError> {
    let repo = self.repos.new_repo(&request.repo)?;
    let revision = repo.resolve_revision(&request.revision).await?;
    let key = ResponseCache::key(
      REVISION_METADATA_PREFIX,
      &RevisionKey {
        repo: &request.repo.url,
        app: &request.app,
        revision: &revision,
      },
    )?;
    if let Some(cached) = self.cache.get::<RevisionMetadata>(&key)? {
      return Ok(cached);
    }

    let _guard = self.lock(repo.as_ref()).await?;
    let mut metadata = repo.revision_metadata(&revision).await?;
    metadata.message = truncate_message(&metadata.message);
    self.cache.set(&key, &metadata)?;
    Ok(metadata)
  }

  /// Flush the cache before the process exits.
  pub fn shutdown(&self) -> Result<(), ServiceError> {
    info!("shutting down manifest service");
    Ok(self.cache.flush()?)
  }
}

/// Normalize an application path, rejecting absolute paths and `..`.
fn relative_app_path(path: &str) -> Result<PathBuf, ServiceError> {
  let mut rel = PathBuf::new();
  for component in Path::new(path).components() {
    match component {
      Component::Normal(part) => rel.push(part),
      Component::CurDir => {}
      Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
        return Err(ServiceError::InvalidPath(path.to_string()));
      }
    }
  }
  Ok(rel)
}

fn truncate_message(message: &str) -> String {
  if message.chars().count() <= REVISION_MESSAGE_MAX_LEN {
    return message.to_string();
  }
  let mut truncated: String = message.chars().take(REVISION_MESSAGE_MAX_LEN).collect();
  truncated.push_str(ELLIPSIS);
  truncated
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
  entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Walk a checkout and map application names to their relative paths.
///
/// An application is named after its directory. When two applications share
/// a directory name, both are keyed by their relative path with `/` replaced
/// by `-`.
fn discover_apps(root: &Path, files: &RecognizedFiles) -> Result<AppList, ServiceError> {
  let mut found: Vec<(String, String)> = Vec::new();
  let walker = WalkDir::new(root)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| !is_hidden(entry));

  for entry in walker {
    let entry = entry?;
    if !entry.file_type().is_dir() {
      continue;
    }
    let listing = DirListing::read(entry.path())?;
    let Some(source_type) = detect_implicit(&listing, files) else {
      continue;
    };

    let rel_path = entry.path().strip_prefix(root).unwrap_or(entry.path());
    let rel: Vec<String> = rel_path
      .components()
      .map(|component| component.as_os_str().to_string_lossy().to_string())
      .collect();
    let (name, rel) = match rel.last() {
      Some(name) => (name.clone(), rel.join("/")),
      None => (".".to_string(), ".".to_string()),
    };
    debug!(path = %rel, source_type = %source_type, "discovered application");
    found.push((name, rel));
  }

  let mut apps = AppList::new();
  for (name, rel) in &found {
    let collides = found.iter().filter(|(other, _)| other == name).count() > 1;
    let key = if collides { rel.replace('/', "-") } else { name.clone() };
    apps.insert(key, rel.clone());
  }
  Ok(apps)
}
