//! Version-control collaborator.
//!
//! The service only talks to repositories through [`Repo`], created per
//! request by a [`RepoFactory`]. [`git::GitRepo`] is the production
//! implementation.

pub mod git;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::Repository;

pub use git::{GitRepo, GitRepoFactory};

#[derive(Debug, Error)]
pub enum RepoError {
  #[error("failed to create directory '{path}': {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to open repository at '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: Box<gix::open::Error>,
  },

  #[error("no remote configured for repository")]
  NoRemote,

  #[error("failed to fetch from '{url}': {source}")]
  Fetch {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("revision '{rev}' not found in repository")]
  RevisionNotFound { rev: String },

  #[error("failed to read '{rev}': {source}")]
  Object {
    rev: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to write working copy '{path}': {source}")]
  Checkout {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("git operation was interrupted")]
  Interrupted,

  #[error("git task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

/// Commit details reported for a revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMetadata {
  /// `Name <email>`
  pub author: String,
  pub message: String,
  pub tags: Vec<String>,
}

#[async_trait]
pub trait Repo: Send + Sync {
  /// Identity of the local working copy. Requests sharing a key are serialized.
  fn lock_key(&self) -> String;

  /// Resolve a branch, tag, or commit to a full commit id.
  async fn resolve_revision(&self, revision: &str) -> Result<String, RepoError>;

  /// Materialize the commit into the working copy and return its root.
  async fn checkout(&self, revision: &str) -> Result<PathBuf, RepoError>;

  async fn revision_metadata(&self, revision: &str) -> Result<RevisionMetadata, RepoError>;
}

pub trait RepoFactory: Send + Sync {
  fn new_repo(&self, repo: &Repository) -> Result<Arc<dyn Repo>, RepoError>;
}

/// A full 40-character hex commit id.
pub fn is_commit_sha(revision: &str) -> bool {
  revision.len() == 40 && revision.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn commit_sha_detection() {
    assert!(is_commit_sha("0123456789abcdef0123456789abcdef01234567"));
    assert!(!is_commit_sha("main"));
    assert!(!is_commit_sha("0123456"));
    assert!(!is_commit_sha("g123456789abcdef0123456789abcdef01234567"));
  }
}
