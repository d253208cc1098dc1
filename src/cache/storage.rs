//! In-memory cache storage and the no-op fallback.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::CacheBackend;

/// A single cached response.
#[derive(Debug)]
struct CacheEntry {
  value: Value,
  /// When the value was written
  stored_at: DateTime<Utc>,
  /// When the expiry timer scheduled by this write fires
  expires_at: Option<DateTime<Utc>>,
}

type Entries = Mutex<HashMap<String, CacheEntry>>;

/// Process-local cache with optional per-entry expiry.
///
/// Cloning a `MemoryCache` yields a handle to the same entries. Expiry timers
/// run on the ambient tokio runtime; a later `set` on the same key does not
/// cancel an earlier timer, so the earlier timer still removes whatever value
/// occupies the key when it fires.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
  entries: Arc<Entries>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    // Entries hold no invariants a panicking writer could break.
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Whether an entry exists for `key`, regardless of its value.
  pub fn contains(&self, key: &str) -> bool {
    self.lock().contains_key(key)
  }

  /// When the value under `key` was last written.
  pub fn stored_at(&self, key: &str) -> Option<DateTime<Utc>> {
    self.lock().get(key).map(|entry| entry.stored_at)
  }

  /// When the timer scheduled by the last write of `key` removes it, if any.
  ///
  /// Timers of earlier writes are not reflected here.
  pub fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
    self.lock().get(key).and_then(|entry| entry.expires_at)
  }

  pub fn remove(&self, key: &str) -> Option<Value> {
    self.lock().remove(key).map(|entry| entry.value)
  }

  pub fn clear(&self) {
    self.lock().clear();
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Spawn the timer that removes `key` after `ttl`. Returns `false` when
  /// there is no runtime to run it on.
  fn schedule_expiry(&self, key: &str, ttl: Duration) -> bool {
    let handle = match tokio::runtime::Handle::try_current() {
      Ok(handle) => handle,
      Err(_) => {
        warn!(key, "no tokio runtime available, cache entry will not expire");
        return false;
      }
    };

    let entries: Weak<Entries> = Arc::downgrade(&self.entries);
    let key = key.to_string();

    handle.spawn(async move {
      tokio::time::sleep(ttl).await;
      if let Some(entries) = entries.upgrade() {
        let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(&key).is_some() {
          debug!(key = %key, "cache entry expired");
        }
      }
    });
    true
  }
}

impl CacheBackend for MemoryCache {
  fn get(&self, key: &str) -> Option<Value> {
    self.lock().get(key).map(|entry| entry.value.clone())
  }

  fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Value {
    let stored_at = Utc::now();
    let expires_at = ttl
      .filter(|ttl| !ttl.is_zero() && self.schedule_expiry(key, *ttl))
      .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
      .map(|ttl| stored_at + ttl);

    self.lock().insert(
      key.to_string(),
      CacheEntry {
        value: value.clone(),
        stored_at,
        expires_at,
      },
    );

    value
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when no cache is configured - every lookup misses and writes are discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl CacheBackend for NoopCache {
  fn get(&self, _key: &str) -> Option<Value> {
    None // Always miss
  }

  fn set(&self, _key: &str, value: Value, _ttl: Option<Duration>) -> Value {
    value // Discard
  }
}
