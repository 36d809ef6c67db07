//! Source type detection.
//!
//! Detection is a pure function over a directory listing and the explicit
//! configuration block of the source. Only [`detect_source_type`] touches the
//! filesystem, to read the listing.
//!
//! Order, first match wins:
//! 1. explicit configuration block (a plugin block always wins)
//! 2. helm chart descriptor
//! 3. kustomization file
//! 4. ksonnet application descriptor with a components directory
//! 5. plain directory

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::config::RecognizedFiles;

use super::types::{ApplicationSource, SourceType};

#[derive(Debug, Error)]
pub enum DetectError {
  #[error("failed to read application directory '{path}': {source}")]
  ReadDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Names of the entries directly under an application directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
  pub files: Vec<String>,
  pub dirs: Vec<String>,
}

impl DirListing {
  /// Read the top-level entries of `path`. Symlinks are classified by their target.
  pub fn read(path: &Path) -> Result<Self, DetectError> {
    let read_err = |source| DetectError::ReadDir {
      path: path.to_path_buf(),
      source,
    };

    let mut listing = DirListing::default();
    for entry in fs::read_dir(path).map_err(read_err)? {
      let entry = entry.map_err(read_err)?;
      let name = entry.file_name().to_string_lossy().to_string();
      if entry.path().is_dir() {
        listing.dirs.push(name);
      } else {
        listing.files.push(name);
      }
    }
    listing.files.sort();
    listing.dirs.sort();
    Ok(listing)
  }

  /// The first file whose name matches one of `candidates`, ignoring case.
  pub fn find_file(&self, candidates: &[String]) -> Option<&str> {
    self
      .files
      .iter()
      .find(|file| candidates.iter().any(|candidate| candidate.eq_ignore_ascii_case(file)))
      .map(String::as_str)
  }

  fn has_file(&self, candidates: &[String]) -> bool {
    self.find_file(candidates).is_some()
  }

  pub fn has_dir(&self, name: &str) -> bool {
    self.dirs.iter().any(|dir| dir.eq_ignore_ascii_case(name))
  }
}

/// Detect the source type of an application from its listing.
pub fn detect_from_listing(source: &ApplicationSource, listing: &DirListing, files: &RecognizedFiles) -> SourceType {
  if let Some(explicit) = source.explicit_type() {
    return explicit;
  }
  detect_implicit(listing, files).unwrap_or(SourceType::Directory)
}

/// Detect a tool-backed type (Helm, Kustomize, Ksonnet) from the listing alone.
///
/// Returns `None` for a plain directory. Used by app discovery, where plain
/// directories are not reported as applications.
pub fn detect_implicit(listing: &DirListing, files: &RecognizedFiles) -> Option<SourceType> {
  if listing.has_file(&files.helm_chart) {
    Some(SourceType::Helm)
  } else if listing.has_file(&files.kustomization) {
    Some(SourceType::Kustomize)
  } else if listing.has_file(&files.ksonnet_app) && listing.has_dir(&files.ksonnet_components_dir) {
    Some(SourceType::Ksonnet)
  } else {
    None
  }
}

/// Detect the source type of the application checked out at `app_path`.
pub fn detect_source_type(
  source: &ApplicationSource,
  app_path: &Path,
  files: &RecognizedFiles,
) -> Result<SourceType, DetectError> {
  if let Some(explicit) = source.explicit_type() {
    debug!(source_type = %explicit, "using explicit source type");
    return Ok(explicit);
  }
  let listing = DirListing::read(app_path)?;
  let detected = detect_from_listing(source, &listing, files);
  debug!(path = %app_path.display(), source_type = %detected, "detected source type");
  Ok(detected)
}
