//! Manifest document handling.
//!
//! - [`normalize`] - splitting generator output into individual manifests
//! - [`encoding`] - decoding source files (UTF-8, UTF-16 with BOM)
//! - [`labels`] - app instance label injection

pub mod encoding;
pub mod labels;
pub mod normalize;

use thiserror::Error;

pub use encoding::decode_text;
pub use labels::set_app_instance_label;
pub use normalize::{normalize, normalize_json, normalize_yaml, to_manifest_strings};

/// Errors raised while turning generator output into manifests.
#[derive(Debug, Error)]
pub enum NormalizeError {
  #[error("failed to decode text: {0}")]
  Encoding(String),

  #[error("failed to parse YAML document {index}: {source}")]
  Yaml {
    index: usize,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("failed to parse JSON: {0}")]
  Json(#[source] serde_json::Error),

  #[error("document {index} is not an object (found {found})")]
  NotAnObject { index: usize, found: &'static str },

  #[error("list document {index} has a non-array items field")]
  InvalidListItems { index: usize },

  #[error("failed to serialize manifest: {0}")]
  Serialize(#[source] serde_json::Error),
}
