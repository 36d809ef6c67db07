//! Config management plugins.
//!
//! A plugin is a registered pair of commands run in the application
//! directory. Everything the plugin learns about the request, credentials
//! included, travels through environment variables.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::consts::{ENV_APP_NAME, ENV_APP_NAMESPACE, ENV_GIT_ASKPASS, ENV_GIT_PASSWORD, ENV_GIT_USERNAME};
use crate::exec::{CmdSpec, ExecError};
use crate::manifest::normalize_yaml;
use crate::service::ManifestRequest;
use crate::source::{PluginCommand, PluginSource, SourceType};

use super::{BackendContext, GenerateError};

pub async fn generate(
  ctx: &BackendContext<'_>,
  app_path: &Path,
  source: &PluginSource,
  request: &ManifestRequest,
) -> Result<Vec<Value>, GenerateError> {
  let plugin = request
    .plugins
    .iter()
    .find(|plugin| plugin.name == source.name)
    .ok_or_else(|| GenerateError::UnknownPlugin(source.name.clone()))?;
  debug!(plugin = %plugin.name, "running plugin");

  if let Some(init) = &plugin.init {
    ctx
      .run_tool(SourceType::Plugin, command(ctx, init, app_path, source, request)?)
      .await?;
  }
  let output = ctx
    .run_tool(SourceType::Plugin, command(ctx, &plugin.generate, app_path, source, request)?)
    .await?;
  normalize_yaml(&output).map_err(|source| GenerateError::Output {
    backend: SourceType::Plugin,
    source,
  })
}

fn command(
  ctx: &BackendContext<'_>,
  cmd: &PluginCommand,
  app_path: &Path,
  source: &PluginSource,
  request: &ManifestRequest,
) -> Result<CmdSpec, GenerateError> {
  let mut spec = CmdSpec::from_parts(&cmd.command, &cmd.args, app_path).map_err(|source: ExecError| {
    GenerateError::Tool {
      backend: SourceType::Plugin,
      source,
    }
  })?;

  for entry in &source.env {
    spec = spec.env(entry.name.clone(), entry.value.clone());
  }
  spec = spec
    .env(ENV_APP_NAME, request.app_label_value.clone().unwrap_or_default())
    .env(ENV_APP_NAMESPACE, request.namespace.clone());
  if let Some((username, password)) = request.repo.credentials() {
    spec = spec
      .env(ENV_GIT_ASKPASS, ctx.askpass_script)
      .env(ENV_GIT_USERNAME, username)
      .env(ENV_GIT_PASSWORD, password);
  }
  Ok(spec)
}
