//! Implementation of the `reposerver revision-metadata` command.

use anyhow::{Context as _, Result};

use reposerver_lib::service::RevisionMetadataRequest;
use reposerver_lib::source::Repository;

use super::{Context, runtime};
use crate::output::{print_json, print_stat};

pub fn cmd_revision_metadata(ctx: &Context, repo: &str, revision: &str) -> Result<()> {
  let request = RevisionMetadataRequest {
    repo: Repository::new(repo),
    app: String::new(),
    revision: revision.to_string(),
  };
  let service = ctx.service();
  let metadata = runtime()?
    .block_on(service.get_revision_metadata(&request))
    .with_context(|| format!("Failed to read revision '{revision}' of '{repo}'"))?;
  service.shutdown().context("Failed to flush cache")?;

  if ctx.format.is_json() {
    return print_json(&metadata);
  }
  print_stat("Author", &metadata.author);
  print_stat("Message", &metadata.message);
  if !metadata.tags.is_empty() {
    print_stat("Tags", &metadata.tags.join(", "));
  }
  Ok(())
}
