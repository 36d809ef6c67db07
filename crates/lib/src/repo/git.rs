//! Git repositories backed by `gix`.
//!
//! # Cache Structure
//!
//! Each repository URL owns `<repo_cache_dir>/<hash(url)>/`:
//! - `repo/` is a bare clone, fetched incrementally
//! - `worktree/` holds the files of the last checked-out commit
//!
//! The worktree is cleared before every checkout so edits made by a previous
//! generation pass (kustomize edits, ks param set) never leak into the next.
//! Git work is blocking and runs on the blocking thread pool; dropping the
//! calling future raises the interrupt flag gix polls. All git work against
//! one cache directory is serialized, including revision resolution, which
//! clones and fetches outside the service's repository lock.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use gix::bstr::ByteSlice;
use gix::remote::Direction;
use tracing::{debug, info, warn};

use crate::consts::OBJ_HASH_PREFIX_LEN;
use crate::lock::RepoLock;
use crate::source::Repository;
use crate::util::hash::hash_bytes;

use super::{Repo, RepoError, RepoFactory, RevisionMetadata, is_commit_sha};

const BARE_DIR: &str = "repo";
const WORKTREE_DIR: &str = "worktree";

pub struct GitRepo {
  url: String,
  root: PathBuf,
  store_locks: Arc<RepoLock>,
}

impl GitRepo {
  /// `store_locks` must be shared by every `GitRepo` that may point at `root`.
  pub fn new(url: impl Into<String>, root: PathBuf, store_locks: Arc<RepoLock>) -> Self {
    Self {
      url: url.into(),
      root,
      store_locks,
    }
  }

  /// Run `op` on the blocking pool, interrupting it if this future is dropped.
  ///
  /// The store lock moves into the blocking task and is released only when
  /// `op` returns, even if the caller gave up earlier.
  async fn blocking<T, F>(&self, op: F) -> Result<T, RepoError>
  where
    T: Send + 'static,
    F: FnOnce(&Paths, &AtomicBool) -> Result<T, RepoError> + Send + 'static,
  {
    let paths = Paths {
      url: self.url.clone(),
      bare: self.root.join(BARE_DIR),
      worktree: self.root.join(WORKTREE_DIR),
    };
    let interrupt = Arc::new(AtomicBool::new(false));
    let _interrupt_guard = InterruptOnDrop(interrupt.clone());
    let store_guard = self.store_locks.acquire(&self.lock_key()).await;
    tokio::task::spawn_blocking(move || {
      let _store_guard = store_guard;
      op(&paths, &interrupt)
    })
    .await?
  }
}

struct Paths {
  url: String,
  bare: PathBuf,
  worktree: PathBuf,
}

struct InterruptOnDrop(Arc<AtomicBool>);

impl Drop for InterruptOnDrop {
  fn drop(&mut self) {
    self.0.store(true, Ordering::Relaxed);
  }
}

#[async_trait]
impl Repo for GitRepo {
  fn lock_key(&self) -> String {
    self.root.to_string_lossy().to_string()
  }

  async fn resolve_revision(&self, revision: &str) -> Result<String, RepoError> {
    let revision = revision.to_string();
    self
      .blocking(move |paths, interrupt| {
        let repo = open_or_clone(paths, interrupt)?;
        if is_commit_sha(&revision) && has_commit(&repo, &revision) {
          return Ok(revision.to_lowercase());
        }
        fetch(&repo, &paths.url, interrupt)?;
        resolve(&repo, &revision)
      })
      .await
  }

  async fn checkout(&self, revision: &str) -> Result<PathBuf, RepoError> {
    let revision = revision.to_string();
    self
      .blocking(move |paths, interrupt| {
        let repo = open_or_clone(paths, interrupt)?;
        if !has_commit(&repo, &revision) {
          fetch(&repo, &paths.url, interrupt)?;
        }
        let commit = resolve(&repo, &revision)?;
        materialize(&repo, &commit, &paths.worktree, interrupt)?;
        info!(url = %paths.url, revision = %commit, "checked out revision");
        Ok(paths.worktree.clone())
      })
      .await
  }

  async fn revision_metadata(&self, revision: &str) -> Result<RevisionMetadata, RepoError> {
    let revision = revision.to_string();
    self
      .blocking(move |paths, interrupt| {
        let repo = open_or_clone(paths, interrupt)?;
        if !has_commit(&repo, &revision) {
          fetch(&repo, &paths.url, interrupt)?;
        }
        metadata(&repo, &revision)
      })
      .await
  }
}

/// Creates [`GitRepo`]s rooted in the repository cache directory.
pub struct GitRepoFactory {
  cache_dir: PathBuf,
  store_locks: Arc<RepoLock>,
}

impl GitRepoFactory {
  pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
    Self {
      cache_dir: cache_dir.into(),
      store_locks: Arc::new(RepoLock::new()),
    }
  }

  /// Cache directory used for `url`.
  pub fn repo_root(&self, url: &str) -> PathBuf {
    let digest = hash_bytes(url.as_bytes());
    self.cache_dir.join(&digest[..OBJ_HASH_PREFIX_LEN])
  }
}

impl RepoFactory for GitRepoFactory {
  fn new_repo(&self, repo: &Repository) -> Result<Arc<dyn Repo>, RepoError> {
    Ok(Arc::new(GitRepo::new(
      repo.url.clone(),
      self.repo_root(&repo.url),
      self.store_locks.clone(),
    )))
  }
}

fn open_or_clone(paths: &Paths, interrupt: &AtomicBool) -> Result<gix::Repository, RepoError> {
  if paths.bare.join("HEAD").exists() {
    debug!(path = %paths.bare.display(), "opening existing repository");
    return gix::open(&paths.bare).map_err(|e| RepoError::Open {
      path: paths.bare.clone(),
      source: Box::new(e),
    });
  }

  // Without HEAD the directory is what an interrupted clone left behind.
  if paths.bare.exists() {
    debug!(path = %paths.bare.display(), "removing incomplete clone");
    fs::remove_dir_all(&paths.bare).map_err(|source| RepoError::CreateDir {
      path: paths.bare.clone(),
      source,
    })?;
  }
  if let Some(parent) = paths.bare.parent() {
    fs::create_dir_all(parent).map_err(|source| RepoError::CreateDir {
      path: parent.to_path_buf(),
      source,
    })?;
  }
  info!(url = %paths.url, path = %paths.bare.display(), "cloning repository");
  let clone_err = |e: Box<dyn std::error::Error + Send + Sync>| RepoError::Clone {
    url: paths.url.clone(),
    source: e,
  };
  let result = gix::prepare_clone_bare(paths.url.as_str(), &paths.bare)
    .map_err(|e| clone_err(Box::new(e)))
    .and_then(|mut prepared| {
      prepared
        .fetch_only(gix::progress::Discard, interrupt)
        .map(|(repo, _outcome)| repo)
        .map_err(|e| clone_err(Box::new(e)))
    });
  if result.is_err() && paths.bare.exists() {
    // The partial clone is this call's own.
    if let Err(error) = fs::remove_dir_all(&paths.bare) {
      warn!(path = %paths.bare.display(), %error, "failed to remove partial clone");
    }
  }
  result
}

fn fetch(repo: &gix::Repository, url: &str, interrupt: &AtomicBool) -> Result<(), RepoError> {
  debug!(url, "fetching updates");
  let fetch_err = |e: Box<dyn std::error::Error + Send + Sync>| RepoError::Fetch {
    url: url.to_string(),
    source: e,
  };

  let remote = repo
    .find_default_remote(Direction::Fetch)
    .ok_or(RepoError::NoRemote)?
    .map_err(|e| fetch_err(Box::new(e)))?;
  remote
    .connect(Direction::Fetch)
    .map_err(|e| fetch_err(Box::new(e)))?
    .prepare_fetch(gix::progress::Discard, Default::default())
    .map_err(|e| fetch_err(Box::new(e)))?
    .receive(gix::progress::Discard, interrupt)
    .map_err(|e| fetch_err(Box::new(e)))?;
  Ok(())
}

fn has_commit(repo: &gix::Repository, revision: &str) -> bool {
  is_commit_sha(revision)
    && gix::ObjectId::from_hex(revision.as_bytes())
      .map(|id| repo.has_object(id))
      .unwrap_or(false)
}

/// Resolve `revision` to a commit id.
///
/// Remote-tracking branches are tried before local names so a branch always
/// resolves to its most recently fetched tip.
fn resolve(repo: &gix::Repository, revision: &str) -> Result<String, RepoError> {
  let candidates: Vec<String> = if revision.is_empty() || revision == "HEAD" {
    match repo.head_name() {
      Ok(Some(branch)) => vec![format!("origin/{}", branch.shorten()), "HEAD".to_string()],
      _ => vec!["HEAD".to_string()],
    }
  } else {
    vec![format!("origin/{revision}"), revision.to_string()]
  };

  for candidate in &candidates {
    let Ok(id) = repo.rev_parse_single(candidate.as_str()) else {
      continue;
    };
    let object_err = |e: Box<dyn std::error::Error + Send + Sync>| RepoError::Object {
      rev: candidate.clone(),
      source: e,
    };
    let commit = id
      .object()
      .map_err(|e| object_err(Box::new(e)))?
      .peel_to_commit()
      .map_err(|e| object_err(Box::new(e)))?;
    debug!(revision, resolved = %commit.id, via = %candidate, "resolved revision");
    return Ok(commit.id.to_string());
  }
  Err(RepoError::RevisionNotFound {
    rev: revision.to_string(),
  })
}

fn find_commit<'r>(repo: &'r gix::Repository, revision: &str) -> Result<gix::Commit<'r>, RepoError> {
  let object_err = |e: Box<dyn std::error::Error + Send + Sync>| RepoError::Object {
    rev: revision.to_string(),
    source: e,
  };
  let id = gix::ObjectId::from_hex(revision.as_bytes()).map_err(|e| object_err(Box::new(e)))?;
  repo
    .find_object(id)
    .map_err(|e| object_err(Box::new(e)))?
    .peel_to_commit()
    .map_err(|e| object_err(Box::new(e)))
}

/// Write the tree of `revision` into a freshly cleared `dest`.
fn materialize(repo: &gix::Repository, revision: &str, dest: &Path, interrupt: &AtomicBool) -> Result<(), RepoError> {
  let write_err = |path: &Path| {
    let path = path.to_path_buf();
    move |source| RepoError::Checkout { path, source }
  };
  let object_err = |e: Box<dyn std::error::Error + Send + Sync>| RepoError::Object {
    rev: revision.to_string(),
    source: e,
  };

  let tree = find_commit(repo, revision)?
    .tree()
    .map_err(|e| object_err(Box::new(e)))?;
  let mut recorder = gix::traverse::tree::Recorder::default();
  tree
    .traverse()
    .breadthfirst(&mut recorder)
    .map_err(|e| object_err(Box::new(e)))?;

  if dest.exists() {
    fs::remove_dir_all(dest).map_err(write_err(dest))?;
  }
  fs::create_dir_all(dest).map_err(write_err(dest))?;

  for entry in recorder.records {
    if interrupt.load(Ordering::Relaxed) {
      return Err(RepoError::Interrupted);
    }
    let path = dest.join(entry.filepath.to_str_lossy().as_ref());
    if entry.mode.is_tree() {
      fs::create_dir_all(&path).map_err(write_err(&path))?;
      continue;
    }
    // Submodules are not materialized.
    if entry.mode.is_commit() {
      continue;
    }
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(write_err(parent))?;
    }
    let data = repo
      .find_object(entry.oid)
      .map_err(|e| object_err(Box::new(e)))?
      .detach()
      .data;
    if entry.mode.is_link() {
      write_symlink(&data, &path).map_err(write_err(&path))?;
    } else {
      fs::write(&path, &data).map_err(write_err(&path))?;
      if entry.mode.is_executable() {
        set_executable(&path).map_err(write_err(&path))?;
      }
    }
  }
  Ok(())
}

#[cfg(unix)]
fn write_symlink(target: &[u8], path: &Path) -> std::io::Result<()> {
  use std::os::unix::ffi::OsStrExt;
  std::os::unix::fs::symlink(std::ffi::OsStr::from_bytes(target), path)
}

#[cfg(windows)]
fn write_symlink(target: &[u8], path: &Path) -> std::io::Result<()> {
  fs::write(path, target)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(windows)]
fn set_executable(_path: &Path) -> std::io::Result<()> {
  Ok(())
}

fn metadata(repo: &gix::Repository, revision: &str) -> Result<RevisionMetadata, RepoError> {
  let object_err = |e: Box<dyn std::error::Error + Send + Sync>| RepoError::Object {
    rev: revision.to_string(),
    source: e,
  };
  let commit = find_commit(repo, revision)?;
  let author = commit.author().map_err(|e| object_err(Box::new(e)))?;
  let author = format!("{} <{}>", author.name, author.email);
  let message = commit.message_raw_sloppy().to_str_lossy().trim_end().to_string();

  let mut tags = Vec::new();
  let references = repo.references().map_err(|e| object_err(Box::new(e)))?;
  for reference in references.tags().map_err(|e| object_err(Box::new(e)))? {
    let Ok(mut reference) = reference else {
      continue;
    };
    let Ok(target) = reference.peel_to_id_in_place() else {
      continue;
    };
    if target.detach() == commit.id {
      tags.push(reference.name().shorten().to_string());
    }
  }
  tags.sort();

  Ok(RevisionMetadata { author, message, tags })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{config_map, write_tree};
  use std::process::Command;
  use tempfile::TempDir;

  fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
      .args(["-c", "user.name=Jane Doe", "-c", "user.email=jane@example.com", "-c", "init.defaultBranch=main"])
      .args(args)
      .current_dir(dir)
      .output()
      .ok()?;
    output
      .status
      .success()
      .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  /// A source repository with two commits and a tag on the first, or `None` without a git binary.
  fn source_repo() -> Option<(TempDir, String, String)> {
    let temp = TempDir::new().unwrap();
    git(temp.path(), &["init"])?;
    write_tree(temp.path(), &[("guestbook/cm.yaml", &config_map("first"))]);
    git(temp.path(), &["add", "."])?;
    git(temp.path(), &["commit", "-m", "first commit"])?;
    git(temp.path(), &["tag", "v1.0.0"])?;
    let first = git(temp.path(), &["rev-parse", "HEAD"])?;
    write_tree(temp.path(), &[("guestbook/cm.yaml", &config_map("second"))]);
    git(temp.path(), &["commit", "-am", "second commit"])?;
    let second = git(temp.path(), &["rev-parse", "HEAD"])?;
    Some((temp, first, second))
  }

  #[test]
  fn repo_root_is_stable_per_url() {
    let factory = GitRepoFactory::new("/cache");
    let a = factory.repo_root("https://example.com/a.git");
    assert_eq!(a, factory.repo_root("https://example.com/a.git"));
    assert_ne!(a, factory.repo_root("https://example.com/b.git"));
    assert_eq!(a.file_name().unwrap().len(), OBJ_HASH_PREFIX_LEN);
  }

  #[tokio::test]
  async fn resolves_checks_out_and_describes() {
    let Some((source, first, second)) = source_repo() else {
      return;
    };
    let cache = TempDir::new().unwrap();
    let factory = GitRepoFactory::new(cache.path());
    let repo = factory
      .new_repo(&Repository::new(source.path().to_string_lossy()))
      .unwrap();

    assert_eq!(repo.resolve_revision("main").await.unwrap(), second);
    assert_eq!(repo.resolve_revision("HEAD").await.unwrap(), second);
    assert_eq!(repo.resolve_revision("v1.0.0").await.unwrap(), first);
    assert_eq!(repo.resolve_revision(&first).await.unwrap(), first);
    assert!(matches!(
      repo.resolve_revision("no-such-branch").await,
      Err(RepoError::RevisionNotFound { .. })
    ));

    let worktree = repo.checkout(&first).await.unwrap();
    let content = fs::read_to_string(worktree.join("guestbook/cm.yaml")).unwrap();
    assert!(content.contains("name: first"));

    fs::write(worktree.join("guestbook/stray.yaml"), "leftover").unwrap();
    let worktree = repo.checkout(&second).await.unwrap();
    assert!(!worktree.join("guestbook/stray.yaml").exists());
    assert!(fs::read_to_string(worktree.join("guestbook/cm.yaml")).unwrap().contains("name: second"));

    let meta = repo.revision_metadata(&first).await.unwrap();
    assert_eq!(meta.author, "Jane Doe <jane@example.com>");
    assert_eq!(meta.message, "first commit");
    assert_eq!(meta.tags, vec!["v1.0.0"]);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_first_resolutions_share_one_clone() {
    let Some((source, _first, second)) = source_repo() else {
      return;
    };
    for _ in 0..5 {
      let cache = TempDir::new().unwrap();
      let factory = Arc::new(GitRepoFactory::new(cache.path()));
      let url = source.path().to_string_lossy().to_string();

      let mut tasks = Vec::new();
      for _ in 0..4 {
        let factory = factory.clone();
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
          let repo = factory.new_repo(&Repository::new(url)).unwrap();
          repo.resolve_revision("main").await
        }));
      }
      for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), second);
      }
    }
  }

  #[tokio::test]
  async fn incomplete_clone_is_replaced() {
    let Some((source, _first, second)) = source_repo() else {
      return;
    };
    let cache = TempDir::new().unwrap();
    let factory = GitRepoFactory::new(cache.path());
    let url = source.path().to_string_lossy().to_string();
    let bare = factory.repo_root(&url).join(BARE_DIR);
    write_tree(&bare, &[("objects/stray", "partial")]);

    let repo = factory.new_repo(&Repository::new(url)).unwrap();
    assert_eq!(repo.resolve_revision("main").await.unwrap(), second);
    assert!(!bare.join("objects/stray").exists());
  }
}
