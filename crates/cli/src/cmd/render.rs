//! Implementation of the `reposerver render` command.
//!
//! Runs detection and generation against a directory on disk. The directory
//! stands in for a checked-out repository whose only revision is the
//! current contents.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;

use reposerver_lib::repo::{Repo, RepoError, RepoFactory, RevisionMetadata};
use reposerver_lib::service::ManifestRequest;
use reposerver_lib::source::{ApplicationSource, DirectorySource, PluginSource, Repository, SourceConfig};

use super::generate::print_response;
use super::{Context, runtime};

const LOCAL_REVISION: &str = "local";

struct LocalDir {
  root: PathBuf,
}

#[async_trait]
impl Repo for LocalDir {
  fn lock_key(&self) -> String {
    self.root.display().to_string()
  }

  async fn resolve_revision(&self, _revision: &str) -> Result<String, RepoError> {
    Ok(LOCAL_REVISION.to_string())
  }

  async fn checkout(&self, _revision: &str) -> Result<PathBuf, RepoError> {
    Ok(self.root.clone())
  }

  async fn revision_metadata(&self, _revision: &str) -> Result<RevisionMetadata, RepoError> {
    Ok(RevisionMetadata::default())
  }
}

struct LocalDirFactory(Arc<LocalDir>);

impl RepoFactory for LocalDirFactory {
  fn new_repo(&self, _repo: &Repository) -> Result<Arc<dyn Repo>, RepoError> {
    Ok(self.0.clone() as Arc<dyn Repo>)
  }
}

pub fn cmd_render(ctx: &Context, dir: &Path, namespace: &str, recurse: bool, plugin: Option<String>) -> Result<()> {
  if !dir.is_dir() {
    bail!("Not a directory: {}", dir.display());
  }
  let root = dunce::canonicalize(dir).with_context(|| format!("Failed to resolve {}", dir.display()))?;
  let url = root.display().to_string();

  let config = match plugin {
    Some(name) => Some(SourceConfig::Plugin(PluginSource { name, env: Vec::new() })),
    None => recurse.then(|| {
      SourceConfig::Directory(DirectorySource {
        recurse: true,
        ..Default::default()
      })
    }),
  };
  let source = ApplicationSource {
    repo_url: url.clone(),
    config,
    ..Default::default()
  };
  let mut request = ManifestRequest::new(Repository::new(url), source);
  request.namespace = namespace.to_string();
  request.no_cache = true;
  request.plugins = ctx.config.plugins.clone();

  let service = ctx.service_with(Arc::new(LocalDirFactory(Arc::new(LocalDir { root }))));
  let started = Instant::now();
  let response = runtime()?
    .block_on(service.generate_manifest(&request))
    .with_context(|| format!("Failed to render {}", dir.display()))?;

  print_response(ctx, &response, started.elapsed())
}
