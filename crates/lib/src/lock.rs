//! Per-repository locking.
//!
//! The table maps a repository's local-checkout identity to an async mutex.
//! Entries are created on first use and never removed, so the table grows
//! with the number of distinct repositories, not with request volume.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Error)]
pub enum LockError {
  #[error("timed out after {waited:?} waiting for repository lock '{key}'")]
  Timeout { key: String, waited: Duration },
}

#[derive(Debug, Default)]
pub struct RepoLock {
  table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held repository lock. Released on drop, on every exit path.
#[derive(Debug)]
pub struct RepoLockGuard {
  key: String,
  _guard: OwnedMutexGuard<()>,
}

impl RepoLockGuard {
  pub fn key(&self) -> &str {
    &self.key
  }
}

impl Drop for RepoLockGuard {
  fn drop(&mut self) {
    debug!(key = %self.key, "released repository lock");
  }
}

impl RepoLock {
  pub fn new() -> Self {
    Self::default()
  }

  fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
    // The map is only ever inserted into, so a poisoned table is still consistent.
    let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
    table.entry(key.to_string()).or_default().clone()
  }

  /// Wait until no other task holds `key`.
  pub async fn acquire(&self, key: &str) -> RepoLockGuard {
    let guard = self.entry(key).lock_owned().await;
    debug!(key, "acquired repository lock");
    RepoLockGuard {
      key: key.to_string(),
      _guard: guard,
    }
  }

  /// Like [`RepoLock::acquire`], giving up after `timeout`.
  pub async fn acquire_timeout(&self, key: &str, timeout: Duration) -> Result<RepoLockGuard, LockError> {
    tokio::time::timeout(timeout, self.acquire(key))
      .await
      .map_err(|_| LockError::Timeout {
        key: key.to_string(),
        waited: timeout,
      })
  }

  /// Number of repositories that have been locked at least once.
  pub fn len(&self) -> usize {
    self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn same_key_is_serialized() {
    let lock = Arc::new(RepoLock::new());
    let holders = Arc::new(AtomicUsize::new(0));
    let max_holders = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
      let lock = lock.clone();
      let holders = holders.clone();
      let max_holders = max_holders.clone();
      tasks.push(tokio::spawn(async move {
        let _guard = lock.acquire("repo-a").await;
        let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
        max_holders.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        holders.fetch_sub(1, Ordering::SeqCst);
      }));
    }
    for task in tasks {
      task.await.unwrap();
    }
    assert_eq!(max_holders.load(Ordering::SeqCst), 1);
    assert_eq!(lock.len(), 1);
  }

  #[tokio::test]
  async fn distinct_keys_do_not_contend() {
    let lock = RepoLock::new();
    let _a = lock.acquire("repo-a").await;
    let b = lock.acquire_timeout("repo-b", Duration::from_millis(50)).await;
    assert!(b.is_ok());
    assert_eq!(lock.len(), 2);
  }

  #[tokio::test]
  async fn times_out_while_held() {
    let lock = RepoLock::new();
    let held = lock.acquire("repo-a").await;
    let result = lock.acquire_timeout("repo-a", Duration::from_millis(20)).await;
    assert!(matches!(result, Err(LockError::Timeout { ref key, .. }) if key == "repo-a"));

    drop(held);
    let again = lock.acquire_timeout("repo-a", Duration::from_millis(50)).await.unwrap();
    assert_eq!(again.key(), "repo-a");
  }

  #[tokio::test]
  async fn cancelled_waiter_does_not_keep_lock() {
    let lock = Arc::new(RepoLock::new());
    let held = lock.acquire("repo-a").await;

    let waiter = {
      let lock = lock.clone();
      tokio::spawn(async move {
        let _guard = lock.acquire("repo-a").await;
        tokio::time::sleep(Duration::from_secs(60)).await;
      })
    };
    tokio::task::yield_now().await;
    waiter.abort();
    let _ = waiter.await;
    drop(held);

    assert!(lock.acquire_timeout("repo-a", Duration::from_millis(50)).await.is_ok());
  }
}
