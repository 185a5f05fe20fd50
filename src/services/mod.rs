//! Domain services over the users API.
//!
//! Every service owns its own [`CacheLayer`] and shares a [`ServiceContext`]
//! (transport plus the runtime-tunable validation knobs). Reads go through
//! the cache, writes invalidate the whole service cache once the server
//! accepted them.

pub mod activity;
pub mod audit;
pub mod bulk;
pub mod notifications;
pub mod profiles;
pub mod roles;
pub mod stats;
pub mod users;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::{CacheError, CacheLayer, CacheStats, QueryKey};
use crate::config::{CacheConfig, Config};
use crate::error::{OperationContext, ServiceResult};
use crate::transport::{from_json, ApiClient, ApiRequest, Method};
use crate::types::Paginated;
use crate::validation::Validation;

pub use activity::ActivityService;
pub use audit::AuditService;
pub use bulk::BulkService;
pub use notifications::NotificationService;
pub use profiles::ProfileService;
pub use roles::RoleService;
pub use stats::StatsService;
pub use users::UserService;

/// State shared by every service built from the same configuration.
///
/// The knobs are atomics so that reconfiguring the facade takes effect on
/// services that are already constructed.
#[derive(Clone)]
pub struct ServiceContext {
  client: ApiClient,
  strict: Arc<AtomicBool>,
  max_batch: Arc<AtomicUsize>,
}

impl ServiceContext {
  pub fn new(client: ApiClient) -> Self {
    Self {
      client,
      strict: Arc::new(AtomicBool::new(true)),
      max_batch: Arc::new(AtomicUsize::new(100)),
    }
  }

  pub fn from_config(client: ApiClient, config: &Config) -> Self {
    let ctx = Self::new(client);
    ctx.apply(config);
    ctx
  }

  pub fn apply(&self, config: &Config) {
    self.set_strict(config.validation.strict_mode);
    self.set_max_batch_size(config.bulk_operations.max_batch_size);
  }

  pub fn client(&self) -> &ApiClient {
    &self.client
  }

  pub fn strict(&self) -> bool {
    self.strict.load(Ordering::Relaxed)
  }

  pub fn set_strict(&self, strict: bool) {
    self.strict.store(strict, Ordering::Relaxed);
  }

  pub fn max_batch_size(&self) -> usize {
    self.max_batch.load(Ordering::Relaxed)
  }

  pub fn set_max_batch_size(&self, size: usize) {
    self.max_batch.store(size.max(1), Ordering::Relaxed);
  }
}

/// Cache for a service with the given TTL, honouring `cache.enabled`.
pub fn cache_for(config: &CacheConfig, ttl: Duration) -> CacheLayer {
  if config.enabled {
    CacheLayer::memory(ttl)
  } else {
    CacheLayer::disabled()
  }
}

/// The request plumbing shared by all services: one base path, one cache
/// and any caches that must be cleared along with it.
#[derive(Clone)]
pub(crate) struct Resource {
  ctx: ServiceContext,
  cache: CacheLayer,
  linked: Vec<CacheLayer>,
  base: &'static str,
}

impl Resource {
  pub(crate) fn new(ctx: ServiceContext, cache: CacheLayer, base: &'static str) -> Self {
    Self {
      ctx,
      cache,
      linked: Vec::new(),
      base,
    }
  }

  pub(crate) fn link(&mut self, cache: CacheLayer) {
    self.linked.push(cache);
  }

  pub(crate) fn ctx(&self) -> &ServiceContext {
    &self.ctx
  }

  pub(crate) fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  /// `base` followed by `suffix`, e.g. `path("/42/activate")`.
  pub(crate) fn path(&self, suffix: &str) -> String {
    format!("{}{}", self.base, suffix)
  }

  /// Run the pre-flight checks unless strict mode is off.
  pub(crate) fn validate(&self, check: impl FnOnce() -> Validation) -> ServiceResult<()> {
    if self.ctx.strict() {
      check()?;
    }
    Ok(())
  }

  /// Cache-first read.
  pub(crate) async fn read<K: QueryKey + ?Sized>(
    &self,
    key: &K,
    request: ApiRequest,
    message: &'static str,
  ) -> ServiceResult<Value> {
    let client = self.ctx.client.clone();
    let result = self
      .cache
      .fetch(key, move || async move { client.send_json(request).await })
      .await
      .op(message)?;
    Ok(result.data)
  }

  pub(crate) async fn read_as<T, K>(
    &self,
    key: &K,
    request: ApiRequest,
    message: &'static str,
  ) -> ServiceResult<T>
  where
    T: DeserializeOwned,
    K: QueryKey + ?Sized,
  {
    let raw = self.read(key, request, message).await?;
    from_json(raw).op(message)
  }

  /// Cached listing with locally computed page math.
  pub(crate) async fn read_page<T, K>(
    &self,
    key: &K,
    request: ApiRequest,
    page: Option<u32>,
    limit: Option<u32>,
    message: &'static str,
  ) -> ServiceResult<Paginated<T>>
  where
    T: DeserializeOwned,
    K: QueryKey + ?Sized,
  {
    let raw = self.read(key, request, message).await?;
    Paginated::from_response(raw, page, limit).op(message)
  }

  /// Uncached request that leaves the cache untouched.
  pub(crate) async fn call(&self, request: ApiRequest, message: &'static str) -> ServiceResult<Value> {
    self.ctx.client.send_json(request).await.op(message)
  }

  pub(crate) async fn call_as<T: DeserializeOwned>(
    &self,
    request: ApiRequest,
    message: &'static str,
  ) -> ServiceResult<T> {
    let raw = self.call(request, message).await?;
    from_json(raw).op(message)
  }

  /// Mutating request; on success the whole cache (and every linked cache)
  /// is cleared.
  pub(crate) async fn write(&self, request: ApiRequest, message: &'static str) -> ServiceResult<Value> {
    let method = request.method;
    let path = request.path.clone();
    let value = self.ctx.client.send_json(request).await.op(message)?;
    info!(method = %method, path = %path, "mutation accepted, clearing cache");
    self.invalidate_all();
    Ok(value)
  }

  pub(crate) async fn write_as<T: DeserializeOwned>(
    &self,
    request: ApiRequest,
    message: &'static str,
  ) -> ServiceResult<T> {
    let raw = self.write(request, message).await?;
    from_json(raw).op(message)
  }

  pub(crate) async fn download(
    &self,
    method: Method,
    path: &str,
    query: Option<Value>,
    body: Option<Value>,
    message: &'static str,
  ) -> ServiceResult<Vec<u8>> {
    self
      .ctx
      .client
      .download(method, path, query, body)
      .await
      .op(message)
  }

  pub(crate) fn invalidate_all(&self) {
    self.cache.invalidate(None);
    for linked in &self.linked {
      linked.invalidate(None);
    }
  }
}

/// Common cache controls exposed by every service.
pub trait CachedService {
  fn cache(&self) -> &CacheLayer;

  fn clear_cache(&self) {
    self.cache().invalidate(None);
  }

  fn cache_stats(&self) -> Result<CacheStats, CacheError> {
    self.cache().stats()
  }
}
