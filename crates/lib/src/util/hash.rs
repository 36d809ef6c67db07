//! Hashing utilities for cache keys and checkout directories.
//!
//! This module provides:
//! - `ObjectHash`: A truncated 20-character hash of a serializable value
//! - `hash_bytes()`: A full 64-character hash of arbitrary bytes

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A content-addressed hash identifying a unique value.
///
/// The hash is a 20-character truncated SHA-256 of the JSON-serialized value.
/// Field order in the serialized form is the declaration order of the struct,
/// so two equal values always produce the same hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    let full = hash_bytes(serialized.as_bytes());
    Ok(ObjectHash(full[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character lowercase hex SHA-256.
pub fn hash_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Serialize)]
  struct Key<'a> {
    repo: &'a str,
    revision: &'a str,
  }

  impl Hashable for Key<'_> {}

  #[test]
  fn object_hash_is_truncated() {
    let hash = Key { repo: "r", revision: "a" }.compute_hash().unwrap();
    assert_eq!(hash.0.len(), OBJ_HASH_PREFIX_LEN);
  }

  #[test]
  fn object_hash_is_deterministic() {
    let a = Key { repo: "r", revision: "a" }.compute_hash().unwrap();
    let b = Key { repo: "r", revision: "a" }.compute_hash().unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn object_hash_changes_with_fields() {
    let a = Key { repo: "r", revision: "a" }.compute_hash().unwrap();
    let b = Key { repo: "r", revision: "b" }.compute_hash().unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn hash_bytes_is_full_length() {
    assert_eq!(hash_bytes(b"hello world").len(), 64);
  }
}
