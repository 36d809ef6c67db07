//! Implementation of the `reposerver detect` command.

use std::path::Path;

use anyhow::{Context as _, Result};

use reposerver_lib::source::{ApplicationSource, detect_source_type};

use super::Context;
use crate::output::print_json;

pub fn cmd_detect(ctx: &Context, dir: &Path) -> Result<()> {
  let source_type = detect_source_type(&ApplicationSource::default(), dir, &ctx.config.recognized_files)
    .with_context(|| format!("Failed to detect source type of {}", dir.display()))?;

  if ctx.format.is_json() {
    print_json(&serde_json::json!({ "path": dir.display().to_string(), "type": source_type }))
  } else {
    println!("{}", source_type);
    Ok(())
  }
}
