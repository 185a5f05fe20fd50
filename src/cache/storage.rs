//! Cache storage trait and in-memory implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub data: Value,
  /// When the entry was written
  pub timestamp: DateTime<Utc>,
}

/// Snapshot of a store's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub size: usize,
  pub keys: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
  #[error("cache lock poisoned")]
  Poisoned,
}

/// Trait for cache storage backends.
///
/// Reads and writes never fail: a backend that cannot answer behaves as a
/// miss. Only [`stats`](CacheStorage::stats) reports backend trouble, so
/// health checks can see it.
pub trait CacheStorage: Send + Sync {
  /// Raw entry lookup. Freshness is decided by the reader.
  fn get(&self, key: &str) -> Option<CacheEntry>;

  /// Store `data` stamped with the current time, overwriting any entry.
  fn set(&self, key: &str, data: Value);

  /// Remove one exact key.
  fn remove(&self, key: &str);

  /// Clear everything, or every key containing `pattern`.
  fn invalidate(&self, pattern: Option<&str>);

  fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &str) -> Option<CacheEntry> {
    None // Always miss
  }

  fn set(&self, _key: &str, _data: Value) {}

  fn remove(&self, _key: &str) {}

  fn invalidate(&self, _pattern: Option<&str>) {}

  fn stats(&self) -> Result<CacheStats, CacheError> {
    Ok(CacheStats::default())
  }
}

/// Process-memory storage. Unbounded; entries live until invalidated.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Write an entry with an explicit timestamp.
  pub fn insert_at(&self, key: &str, data: Value, timestamp: DateTime<Utc>) {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key.to_string(), CacheEntry { data, timestamp });
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &str) -> Option<CacheEntry> {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(key)
      .cloned()
  }

  fn set(&self, key: &str, data: Value) {
    self.insert_at(key, data, Utc::now());
  }

  fn remove(&self, key: &str) {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(key);
  }

  fn invalidate(&self, pattern: Option<&str>) {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    match pattern {
      Some(pattern) => entries.retain(|key, _| !key.contains(pattern)),
      None => entries.clear(),
    }
  }

  fn stats(&self) -> Result<CacheStats, CacheError> {
    let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
    let mut keys: Vec<String> = entries.keys().cloned().collect();
    keys.sort();
    Ok(CacheStats {
      size: keys.len(),
      keys,
    })
  }
}
