//! Plain directory generation.
//!
//! Every recognized manifest or Jsonnet file under the application path is
//! parsed and normalized. Files are visited in name order; hidden directories
//! are skipped and symlinked directories are never entered. Symlinked files
//! are read only when their target lies inside the repository.

use std::path::Path;

use serde_json::Value;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::manifest::{decode_text, normalize, normalize_json, normalize_yaml};
use crate::source::DirectorySource;

use super::{BackendContext, GenerateError};

pub async fn generate(
  ctx: &BackendContext<'_>,
  app_path: &Path,
  source: &DirectorySource,
) -> Result<Vec<Value>, GenerateError> {
  let mut manifests = Vec::new();
  for path in candidate_files(app_path, source.recurse)? {
    ctx.contained(&path)?;
    if ctx.files.is_jsonnet_file(&path) {
      let value = ctx
        .jsonnet
        .evaluate(&path, app_path, &source.jsonnet)
        .await
        .map_err(|source| GenerateError::Jsonnet {
          path: path.clone(),
          source,
        })?;
      manifests.extend(normalize(vec![value]).map_err(|source| GenerateError::Parse { path, source })?);
    } else if ctx.files.is_manifest_file(&path) {
      manifests.extend(parse_file(&path)?);
    }
  }
  Ok(manifests)
}

fn candidate_files(app_path: &Path, recurse: bool) -> Result<Vec<std::path::PathBuf>, GenerateError> {
  let walker = WalkDir::new(app_path)
    .min_depth(1)
    .max_depth(if recurse { usize::MAX } else { 1 })
    .follow_links(false)
    .sort_by_file_name();

  let mut files = Vec::new();
  for entry in walker.into_iter().filter_entry(|entry| !is_hidden_dir(entry)) {
    let entry = entry?;
    if entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file()) {
      files.push(entry.into_path());
    }
  }
  debug!(path = %app_path.display(), count = files.len(), recurse, "collected directory files");
  Ok(files)
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
  entry.depth() > 0 && entry.file_type().is_dir() && entry.file_name().to_string_lossy().starts_with('.')
}

fn parse_file(path: &Path) -> Result<Vec<Value>, GenerateError> {
  let bytes = std::fs::read(path).map_err(|source| GenerateError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let parse_err = |source| GenerateError::Parse {
    path: path.to_path_buf(),
    source,
  };
  let text = decode_text(&bytes).map_err(parse_err)?;
  let is_json = path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
  if is_json {
    normalize_json(&text).map_err(parse_err)
  } else {
    normalize_yaml(&text).map_err(parse_err)
  }
}
