//! Implementation of the `reposerver ls-apps` command.

use anyhow::{Context as _, Result};

use reposerver_lib::service::ListAppsRequest;
use reposerver_lib::source::Repository;

use super::{Context, runtime};
use crate::output::{print_info, print_json, symbols};

pub fn cmd_ls_apps(ctx: &Context, repo: &str, revision: &str) -> Result<()> {
  let request = ListAppsRequest {
    repo: Repository::new(repo),
    revision: revision.to_string(),
  };
  let service = ctx.service();
  let apps = runtime()?
    .block_on(service.list_apps(&request))
    .with_context(|| format!("Failed to list applications in '{repo}'"))?;
  service.shutdown().context("Failed to flush cache")?;

  if ctx.format.is_json() {
    return print_json(&apps);
  }
  if apps.is_empty() {
    print_info("No applications found.");
    return Ok(());
  }
  let width = apps.keys().map(String::len).max().unwrap_or(0);
  for (name, path) in &apps {
    println!("{name:<width$} {} {path}", symbols::ARROW);
  }
  Ok(())
}
