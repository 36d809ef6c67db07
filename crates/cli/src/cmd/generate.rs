//! Implementation of the `reposerver generate` command.

use std::time::Instant;

use anyhow::{Context as _, Result};
use tracing::info;

use reposerver_lib::service::{ManifestRequest, ManifestResponse};
use reposerver_lib::source::{
  ApplicationSource, DirectorySource, HelmSource, PluginSource, Repository, SourceConfig,
};

use super::{Context, runtime};
use crate::output::{format_duration, manifests_to_yaml, print_json, print_success, truncate_hash};

/// Label key stamped on every generated object when `--app-name` is given.
const APP_INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

pub struct GenerateArgs {
  pub repo: String,
  pub revision: String,
  pub path: String,
  pub namespace: String,
  pub no_cache: bool,
  pub helm_values: Vec<String>,
  pub recurse: bool,
  pub plugin: Option<String>,
  pub app_name: Option<String>,
}

impl GenerateArgs {
  /// The explicit configuration block implied by the flags, if any.
  fn source_config(&self) -> Option<SourceConfig> {
    if let Some(name) = &self.plugin {
      return Some(SourceConfig::Plugin(PluginSource {
        name: name.clone(),
        env: Vec::new(),
      }));
    }
    if !self.helm_values.is_empty() {
      return Some(SourceConfig::Helm(HelmSource {
        value_files: self.helm_values.clone(),
        ..Default::default()
      }));
    }
    if self.recurse {
      return Some(SourceConfig::Directory(DirectorySource {
        recurse: true,
        ..Default::default()
      }));
    }
    None
  }

  fn into_request(self, ctx: &Context) -> ManifestRequest {
    let source = ApplicationSource {
      repo_url: self.repo.clone(),
      path: self.path.clone(),
      target_revision: self.revision.clone(),
      config: self.source_config(),
    };
    let mut request = ManifestRequest::new(Repository::new(&self.repo), source);
    request.namespace = self.namespace;
    request.no_cache = self.no_cache;
    request.plugins = ctx.config.plugins.clone();
    if let Some(app_name) = self.app_name {
      request.app_label_key = Some(APP_INSTANCE_LABEL.to_string());
      request.app_label_value = Some(app_name);
    }
    request
  }
}

pub fn cmd_generate(ctx: &Context, args: GenerateArgs) -> Result<()> {
  let request = args.into_request(ctx);
  let service = ctx.service();

  let started = Instant::now();
  let rt = runtime()?;
  let response = rt
    .block_on(service.generate_manifest(&request))
    .with_context(|| format!("Failed to generate manifests for '{}'", request.repo.url))?;
  service.shutdown().context("Failed to flush cache")?;
  info!(elapsed = ?started.elapsed(), "generation finished");

  print_response(ctx, &response, started.elapsed())
}

pub(super) fn print_response(ctx: &Context, response: &ManifestResponse, elapsed: std::time::Duration) -> Result<()> {
  if ctx.format.is_json() {
    return print_json(response);
  }
  print!("{}", manifests_to_yaml(&response.manifests)?);
  let source_type = response
    .source_type
    .map(|source_type| source_type.to_string())
    .unwrap_or_default();
  print_success(&format!(
    "{} manifest(s) from {} app at {} in {}",
    response.manifests.len(),
    source_type,
    truncate_hash(&response.revision),
    format_duration(elapsed)
  ));
  Ok(())
}
