//! Response cache.
//!
//! [`CacheStore`] is the raw byte store with time-based expiry;
//! [`ResponseCache`] layers typed JSON payloads and hashed keys on top.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::util::hash::{HashError, Hashable};

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to compute cache key: {0}")]
  Key(#[source] HashError),

  #[error("failed to encode cache entry '{key}': {source}")]
  Encode {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to decode cache entry '{key}': {source}")]
  Decode {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

pub trait CacheStore: Send + Sync {
  /// Payload stored under `key`, or `None` when absent or expired.
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

  fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

  /// Persist or drop pending state before shutdown.
  fn flush(&self) -> Result<(), CacheError>;
}

struct Entry {
  payload: Vec<u8>,
  inserted: Instant,
  ttl: Duration,
}

impl Entry {
  fn expired(&self, now: Instant) -> bool {
    now.duration_since(self.inserted) > self.ttl
  }
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryCache {
  entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Drop every expired entry.
  pub fn purge_expired(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    let before = entries.len();
    entries.retain(|_, entry| !entry.expired(now));
    before - entries.len()
  }

  pub fn len(&self) -> usize {
    self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl CacheStore for InMemoryCache {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    let now = Instant::now();
    {
      let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
      match entries.get(key) {
        None => return Ok(None),
        Some(entry) if !entry.expired(now) => return Ok(Some(entry.payload.clone())),
        Some(_) => {}
      }
    }
    self
      .entries
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .retain(|k, entry| k != key || !entry.expired(now));
    Ok(None)
  }

  fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
    let entry = Entry {
      payload,
      inserted: Instant::now(),
      ttl,
    };
    self
      .entries
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key.to_string(), entry);
    Ok(())
  }

  fn flush(&self) -> Result<(), CacheError> {
    let dropped = self.purge_expired();
    debug!(dropped, remaining = self.len(), "flushed in-memory cache");
    Ok(())
  }
}

/// Typed view over a [`CacheStore`] with a fixed time-to-live.
#[derive(Clone)]
pub struct ResponseCache {
  store: Arc<dyn CacheStore>,
  ttl: Duration,
}

impl ResponseCache {
  pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
    Self { store, ttl }
  }

  /// Build a key `<prefix>|<hash(value)>`.
  pub fn key(prefix: &str, value: &impl Hashable) -> Result<String, CacheError> {
    let hash = value.compute_hash().map_err(CacheError::Key)?;
    Ok(format!("{prefix}|{hash}"))
  }

  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
    let Some(payload) = self.store.get(key)? else {
      debug!(key, "cache miss");
      return Ok(None);
    };
    debug!(key, "cache hit");
    serde_json::from_slice(&payload).map(Some).map_err(|source| CacheError::Decode {
      key: key.to_string(),
      source,
    })
  }

  pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
    let payload = serde_json::to_vec(value).map_err(|source| CacheError::Encode {
      key: key.to_string(),
      source,
    })?;
    self.store.set(key, payload, self.ttl)
  }

  pub fn flush(&self) -> Result<(), CacheError> {
    self.store.flush()
  }
}
