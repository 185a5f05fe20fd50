//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use super::storage::{CacheError, CacheStats, CacheStorage, MemoryStorage, NoopStorage};
use super::traits::{CacheResult, QueryKey};
use crate::error::TransportError;

type SharedFetch = Shared<BoxFuture<'static, Result<Value, TransportError>>>;

/// Requests currently on the wire, keyed like the cache, plus a
/// generation counter bumped by every pattern invalidation.
#[derive(Default)]
struct InFlight {
  requests: Mutex<HashMap<String, SharedFetch>>,
  generation: AtomicU64,
}

impl InFlight {
  fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  fn join_or_start<F, Fut>(&self, key: &str, fetcher: F) -> SharedFetch
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, TransportError>> + Send + 'static,
  {
    let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = requests.get(key) {
      debug!(key, "joining in-flight request");
      return existing.clone();
    }
    let shared = fetcher().boxed().shared();
    requests.insert(key.to_string(), shared.clone());
    shared
  }

  fn is_registered(&self, key: &str, fetch: &SharedFetch) -> bool {
    let requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
    requests.get(key).is_some_and(|current| current.ptr_eq(fetch))
  }

  fn forget(&self, key: &str, fetch: &SharedFetch) {
    let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
    if requests.get(key).is_some_and(|current| current.ptr_eq(fetch)) {
      requests.remove(key);
    }
  }

  /// Detach the request for exactly `key`. Other keys keep their requests
  /// and the generation is left alone.
  fn detach(&self, key: &str) {
    let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
    requests.remove(key);
  }

  fn invalidate(&self, pattern: Option<&str>) {
    self.generation.fetch_add(1, Ordering::SeqCst);
    let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
    match pattern {
      Some(pattern) => requests.retain(|key, _| !key.contains(pattern)),
      None => requests.clear(),
    }
  }
}

/// Drops the registry entry when the awaiting caller finishes or is
/// cancelled, so a finished future is never joined again.
struct InFlightGuard<'a> {
  inflight: &'a InFlight,
  key: &'a str,
  fetch: SharedFetch,
}

impl Drop for InFlightGuard<'_> {
  fn drop(&mut self) {
    self.inflight.forget(self.key, &self.fetch);
  }
}

/// Cache layer that manages caching logic and network fetching.
///
/// Cloning is cheap and clones share storage, so a handle can be given to
/// another service that must invalidate this cache.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  inflight: Arc<InFlight>,
  /// How long an entry stays valid
  ttl: Duration,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static, ttl: std::time::Duration) -> Self {
    Self {
      storage: Arc::new(storage),
      inflight: Arc::new(InFlight::default()),
      ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(36_500)),
    }
  }

  /// In-memory cache with the given TTL.
  pub fn memory(ttl: std::time::Duration) -> Self {
    Self::new(MemoryStorage::new(), ttl)
  }

  /// Cache that never stores anything. Identical concurrent reads are
  /// still coalesced.
  pub fn disabled() -> Self {
    Self::new(NoopStorage, std::time::Duration::ZERO)
  }

  pub fn ttl(&self) -> std::time::Duration {
    self.ttl.to_std().unwrap_or_default()
  }

  /// Check if cached data is stale based on its timestamp.
  fn is_stale(&self, cached_at: DateTime<Utc>) -> bool {
    Utc::now() - cached_at >= self.ttl
  }

  /// Fresh cached data for `key`, if any. Stale entries are left in place.
  pub fn get<K: QueryKey + ?Sized>(&self, key: &K) -> Option<Value> {
    let entry = self.storage.get(&key.cache_key())?;
    if self.is_stale(entry.timestamp) {
      None
    } else {
      Some(entry.data)
    }
  }

  pub fn set<K: QueryKey + ?Sized>(&self, key: &K, data: Value) {
    self.storage.set(&key.cache_key(), data);
  }

  /// Remove one exact key. A request in flight for that key will not
  /// write its result back; requests for other keys are unaffected.
  pub fn evict<K: QueryKey + ?Sized>(&self, key: &K) {
    let key = key.cache_key();
    debug!(key = %key, "evicting cache entry");
    self.storage.remove(&key);
    self.inflight.detach(&key);
  }

  /// Clear the whole cache, or every key containing `pattern`.
  ///
  /// Requests already in flight for affected keys will not write their
  /// result back.
  pub fn invalidate(&self, pattern: Option<&str>) {
    debug!(pattern = ?pattern, "invalidating cache");
    self.storage.invalidate(pattern);
    self.inflight.invalidate(pattern);
  }

  pub fn stats(&self) -> Result<CacheStats, CacheError> {
    self.storage.stats()
  }

  /// Cache-first fetch.
  ///
  /// 1. Fresh entry: return it without touching the network
  /// 2. Identical request in flight: await its result
  /// 3. Otherwise run `fetcher` and store its result
  ///
  /// Errors are never cached.
  pub async fn fetch<K, F, Fut>(
    &self,
    key: &K,
    fetcher: F,
  ) -> Result<CacheResult<Value>, TransportError>
  where
    K: QueryKey + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, TransportError>> + Send + 'static,
  {
    let key = key.cache_key();

    if let Some(entry) = self.storage.get(&key) {
      if !self.is_stale(entry.timestamp) {
        debug!(key = %key, "cache hit");
        return Ok(CacheResult::from_cache(entry.data, entry.timestamp));
      }
    }

    debug!(key = %key, "cache miss");
    let generation = self.inflight.generation();
    let mut started = false;
    let fetch = self.inflight.join_or_start(&key, || {
      started = true;
      fetcher()
    });

    let guard = InFlightGuard {
      inflight: &self.inflight,
      key: &key,
      fetch: fetch.clone(),
    };
    let result = fetch.clone().await;
    let registered = self.inflight.is_registered(&key, &fetch);
    drop(guard);

    let data = result?;
    if registered && self.inflight.generation() == generation {
      self.storage.set(&key, data.clone());
    } else {
      debug!(key = %key, "cache invalidated during fetch, not storing");
    }

    Ok(if started {
      CacheResult::from_network(data)
    } else {
      CacheResult::coalesced(data)
    })
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      inflight: Arc::clone(&self.inflight),
      ttl: self.ttl,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use serde_json::json;
  use std::sync::atomic::AtomicUsize;

  fn counting_fetcher(
    counter: &Arc<AtomicUsize>,
    value: Value,
  ) -> impl FnOnce() -> BoxFuture<'static, Result<Value, TransportError>> {
    let counter = Arc::clone(counter);
    move || {
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(value)
      }
      .boxed()
    }
  }

  #[tokio::test]
  async fn test_get_after_set_returns_value() {
    let cache = CacheLayer::memory(std::time::Duration::from_secs(60));
    cache.set("users_list:{}", json!([1, 2]));
    assert_eq!(cache.get("users_list:{}"), Some(json!([1, 2])));
  }

  #[tokio::test]
  async fn test_expired_entry_is_a_miss_but_stays_stored() {
    let storage = MemoryStorage::new();
    storage.insert_at("user:1", json!({"id": "1"}), Utc::now() - Duration::minutes(6));
    let cache = CacheLayer::new(storage, std::time::Duration::from_secs(5 * 60));

    assert_eq!(cache.get("user:1"), None);
    assert_eq!(cache.stats().expect("stats").keys, vec!["user:1"]);
  }

  #[tokio::test]
  async fn test_entry_expires_after_ttl() {
    let cache = CacheLayer::memory(std::time::Duration::from_millis(30));
    cache.set("k", json!(1));
    assert!(cache.get("k").is_some());

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    assert!(cache.get("k").is_none());
  }

  #[tokio::test]
  async fn test_fetch_caches_result() {
    let cache = CacheLayer::memory(std::time::Duration::from_secs(60));
    let counter = Arc::new(AtomicUsize::new(0));

    let first = cache
      .fetch("k", counting_fetcher(&counter, json!("v")))
      .await
      .expect("fetch");
    let second = cache
      .fetch("k", counting_fetcher(&counter, json!("other")))
      .await
      .expect("fetch");

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data, json!("v"));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_concurrent_identical_fetches_are_coalesced() {
    let cache = CacheLayer::memory(std::time::Duration::from_secs(60));
    let counter = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
      cache.fetch("k", counting_fetcher(&counter, json!(1))),
      cache.fetch("k", counting_fetcher(&counter, json!(2))),
    );

    let (a, b) = (a.expect("a"), b.expect("b"));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(a.data, b.data);
    let mut sources = [a.source, b.source];
    sources.sort_by_key(|s| *s as u8);
    assert_eq!(sources, [CacheSource::Network, CacheSource::Coalesced]);
  }

  #[tokio::test]
  async fn test_errors_are_not_cached() {
    let cache = CacheLayer::memory(std::time::Duration::from_secs(60));

    let failed = cache
      .fetch("k", || async { Err(TransportError::Network("down".into())) })
      .await;
    assert!(failed.is_err());

    let ok = cache
      .fetch("k", || async { Ok(json!("up")) })
      .await
      .expect("fetch");
    assert_eq!(ok.source, CacheSource::Network);
  }

  #[tokio::test]
  async fn test_invalidation_during_fetch_discards_result() {
    let cache = CacheLayer::memory(std::time::Duration::from_secs(60));
    let counter = Arc::new(AtomicUsize::new(0));

    let fetching = cache.fetch("k", counting_fetcher(&counter, json!("old")));
    let invalidating = async {
      tokio::time::sleep(std::time::Duration::from_millis(5)).await;
      cache.invalidate(None);
    };
    let (result, _) = tokio::join!(fetching, invalidating);

    assert_eq!(result.expect("fetch").data, json!("old"));
    assert!(cache.get("k").is_none());
  }

  #[tokio::test]
  async fn test_evict_during_fetch_discards_only_that_key() {
    let cache = CacheLayer::memory(std::time::Duration::from_secs(60));
    let counter = Arc::new(AtomicUsize::new(0));

    let evicted = cache.fetch("bulk_progress:1", counting_fetcher(&counter, json!("one")));
    let kept = cache.fetch("bulk_progress:10", counting_fetcher(&counter, json!("ten")));
    let evicting = async {
      tokio::time::sleep(std::time::Duration::from_millis(5)).await;
      cache.evict("bulk_progress:1");
    };
    let (evicted, kept, _) = tokio::join!(evicted, kept, evicting);

    assert_eq!(evicted.expect("fetch").data, json!("one"));
    assert_eq!(kept.expect("fetch").data, json!("ten"));
    assert!(cache.get("bulk_progress:1").is_none());
    assert_eq!(cache.get("bulk_progress:10"), Some(json!("ten")));
  }

  #[tokio::test]
  async fn test_disabled_cache_always_fetches() {
    let cache = CacheLayer::disabled();
    let counter = Arc::new(AtomicUsize::new(0));

    cache
      .fetch("k", counting_fetcher(&counter, json!(1)))
      .await
      .expect("fetch");
    cache
      .fetch("k", counting_fetcher(&counter, json!(1)))
      .await
      .expect("fetch");

    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_clones_share_storage() {
    let cache = CacheLayer::memory(std::time::Duration::from_secs(60));
    let linked = cache.clone();
    cache.set("k", json!(1));

    linked.invalidate(None);

    assert!(cache.get("k").is_none());
  }
}
