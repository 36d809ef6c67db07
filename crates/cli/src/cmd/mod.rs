mod apps;
mod details;
mod detect;
mod generate;
mod metadata;
mod render;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::runtime::Runtime;

use reposerver_lib::cache::InMemoryCache;
use reposerver_lib::config::ServerConfig;
use reposerver_lib::exec::ProcessRunner;
use reposerver_lib::repo::{GitRepoFactory, RepoFactory};
use reposerver_lib::service::ManifestService;

use crate::output::OutputFormat;

pub use apps::cmd_ls_apps;
pub use details::cmd_app_details;
pub use detect::cmd_detect;
pub use generate::{GenerateArgs, cmd_generate};
pub use metadata::cmd_revision_metadata;
pub use render::cmd_render;

/// Settings shared by every command.
pub struct Context {
  pub config: ServerConfig,
  pub format: OutputFormat,
}

impl Context {
  pub fn load(config: Option<&Path>, format: OutputFormat) -> Result<Self> {
    let config = ServerConfig::load(config).context("Failed to load configuration")?;
    Ok(Self { config, format })
  }

  /// A service backed by git checkouts under the configured cache directory.
  pub fn service(&self) -> ManifestService {
    let repos = Arc::new(GitRepoFactory::new(self.config.repo_cache_dir.clone()));
    self.service_with(repos)
  }

  pub fn service_with(&self, repos: Arc<dyn RepoFactory>) -> ManifestService {
    ManifestService::new(
      self.config.clone(),
      repos,
      Arc::new(ProcessRunner),
      Arc::new(InMemoryCache::new()),
    )
  }
}

pub fn runtime() -> Result<Runtime> {
  Runtime::new().context("Failed to create async runtime")
}
