//! Bulk operations over many users at once.
//!
//! Two flavours are offered. Long-running jobs are started server-side and
//! observed through [`BulkService::get_progress`] until they reach a
//! terminal [`BulkStatus`], then read once with [`BulkService::get_result`].
//! Small batches go through the synchronous endpoints (`create`, `delete`,
//! `assign_role`, ...) which answer with the final result directly.
//!
//! Items that fail inside a job are reported in [`BulkOperationResult::errors`];
//! they never turn the call itself into an error.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use super::users::{NewUser, UserUpdate};
use super::{CachedService, Resource, ServiceContext};
use crate::cache::{keyed, CacheLayer, QueryKey};
use crate::error::{OperationContext, ServiceResult, ValidationError};
use crate::transport::{to_json, ApiRequest, Method};
use crate::types::{id_string, DeletedCount, ExportFormat, Paginated};
use crate::validation::{self, Validation};

pub const BULK_TTL: Duration = Duration::from_secs(10 * 60);

const BASE: &str = "/api/users/bulk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl BulkStatus {
  /// Completed, failed and cancelled jobs never change again.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      BulkStatus::Completed | BulkStatus::Failed | BulkStatus::Cancelled
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperationProgress {
  #[serde(deserialize_with = "id_string")]
  pub operation_id: String,
  pub status: BulkStatus,
  /// Percentage, 0 to 100
  #[serde(default)]
  pub progress: f64,
  #[serde(default)]
  pub processed: u64,
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub errors: u64,
  #[serde(default)]
  pub start_time: Option<String>,
  #[serde(default)]
  pub estimated_completion: Option<String>,
  #[serde(default)]
  pub current_item: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
  #[serde(alias = "user_id", deserialize_with = "id_string")]
  pub item_id: String,
  pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
  #[serde(alias = "user_id", deserialize_with = "id_string")]
  pub item_id: String,
  pub success: bool,
  #[serde(default)]
  pub data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkOperationResult {
  pub success: bool,
  pub processed: u64,
  pub failed: u64,
  pub errors: Vec<ItemError>,
  pub results: Vec<ItemOutcome>,
  pub total_time: Option<f64>,
  pub average_time_per_item: Option<f64>,
}

impl BulkOperationResult {
  /// Ids of the items the server reported as failed.
  pub fn failed_ids(&self) -> Vec<&str> {
    self.errors.iter().map(|e| e.item_id.as_str()).collect()
  }
}

#[derive(Debug, Deserialize)]
struct Started {
  #[serde(deserialize_with = "id_string")]
  operation_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryFilters {
  pub page: Option<u32>,
  pub limit: Option<u32>,
  pub status: Option<BulkStatus>,
  pub operation: Option<String>,
  pub date_from: Option<String>,
  pub date_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
  #[serde(deserialize_with = "id_string")]
  pub operation_id: String,
  pub operation: String,
  pub status: BulkStatus,
  #[serde(default)]
  pub processed: u64,
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub errors: u64,
  #[serde(default)]
  pub start_time: Option<String>,
  #[serde(default)]
  pub end_time: Option<String>,
  #[serde(default)]
  pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkStats {
  pub total_operations: u64,
  pub successful_operations: u64,
  pub failed_operations: u64,
  pub operations_by_type: HashMap<String, u64>,
  pub average_processing_time: f64,
  pub total_processed_items: u64,
  pub total_failed_items: u64,
  pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkSettings {
  pub max_batch_size: u32,
  pub max_concurrent_operations: u32,
  pub timeout_seconds: u64,
  pub retry_attempts: u32,
  pub retry_delay_seconds: u64,
  pub auto_cleanup_days: u32,
  pub notification_enabled: bool,
}

/// Partial settings change; absent fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkSettingsUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_batch_size: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_concurrent_operations: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_seconds: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_attempts: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_delay_seconds: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub auto_cleanup_days: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notification_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkValidation {
  pub is_valid: bool,
  pub errors: Vec<String>,
  pub warnings: Vec<String>,
  pub suggestions: Vec<String>,
  pub valid_count: u64,
  pub invalid_count: u64,
}

/// Free-form switches forwarded as-is (`notify_users`, `soft_delete`, ...).
pub type BulkOptions = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkCreate {
  pub users: Vec<NewUser>,
  #[serde(skip_serializing_if = "Map::is_empty")]
  pub options: BulkOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserPatch {
  pub user_id: String,
  pub data: UserUpdate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkUpdate {
  pub updates: Vec<UserPatch>,
  #[serde(skip_serializing_if = "Map::is_empty")]
  pub options: BulkOptions,
}

/// Target users of delete, activate, deactivate and unsuspend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkSelection {
  pub user_ids: Vec<String>,
  #[serde(skip_serializing_if = "Map::is_empty")]
  pub options: BulkOptions,
}

impl BulkSelection {
  pub fn of(ids: &[&str]) -> Self {
    Self {
      user_ids: ids.iter().map(|id| id.to_string()).collect(),
      options: BulkOptions::new(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkRoleChange {
  pub user_ids: Vec<String>,
  pub role_id: String,
  #[serde(skip_serializing_if = "Map::is_empty")]
  pub options: BulkOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkSuspension {
  pub user_ids: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
  #[serde(skip_serializing_if = "Map::is_empty")]
  pub options: BulkOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkExport {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user_ids: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub filters: Option<Map<String, Value>>,
  pub format: ExportFormat,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub fields: Option<Vec<String>>,
}

enum BulkKey<'a> {
  Progress(&'a str),
  History(&'a HistoryFilters),
  Stats,
  Settings,
}

impl QueryKey for BulkKey<'_> {
  fn cache_key(&self) -> String {
    match self {
      BulkKey::Progress(id) => format!("bulk_progress:{}", id),
      BulkKey::History(filters) => keyed("bulk_history", filters),
      BulkKey::Stats => "bulk_operation_stats".to_string(),
      BulkKey::Settings => "bulk_operation_settings".to_string(),
    }
  }
}

#[derive(Clone)]
pub struct BulkService {
  resource: Resource,
}

impl BulkService {
  pub fn new(ctx: ServiceContext) -> Self {
    Self::with_cache(ctx, CacheLayer::memory(BULK_TTL))
  }

  pub fn with_cache(ctx: ServiceContext, cache: CacheLayer) -> Self {
    Self {
      resource: Resource::new(ctx, cache, BASE),
    }
  }

  /// Also clear `cache` whenever a synchronous bulk write succeeds, so
  /// readers of the affected users never see pre-write listings.
  pub fn with_linked_cache(mut self, cache: CacheLayer) -> Self {
    self.resource.link(cache);
    self
  }

  fn max_batch(&self) -> usize {
    self.resource.ctx().max_batch_size()
  }

  // Jobs

  /// Start a server-side job and return its id without waiting for it.
  pub async fn start(&self, operation: &str, data: Value) -> ServiceResult<String> {
    let request = ApiRequest::new(Method::Post, self.resource.path("/start"))
      .body(json!({ "operation": operation, "data": data }));
    let started: Started = self
      .resource
      .call_as(request, "Falha ao iniciar operação em lote")
      .await?;
    info!(operation, operation_id = %started.operation_id, "bulk job started");
    Ok(started.operation_id)
  }

  pub async fn get_progress(&self, operation_id: &str) -> ServiceResult<BulkOperationProgress> {
    let request = ApiRequest::new(
      Method::Get,
      self.resource.path(&format!("/progress/{}", operation_id)),
    );
    self
      .resource
      .read_as(
        &BulkKey::Progress(operation_id),
        request,
        "Falha ao obter progresso da operação",
      )
      .await
  }

  /// Progress straight from the server, replacing any cached snapshot.
  pub async fn refresh_progress(&self, operation_id: &str) -> ServiceResult<BulkOperationProgress> {
    self.resource.cache().evict(&BulkKey::Progress(operation_id));
    self.get_progress(operation_id).await
  }

  /// Ask the server to stop the job. A request already in flight is not
  /// aborted; the next progress read goes to the server.
  pub async fn cancel(&self, operation_id: &str) -> ServiceResult<()> {
    let request = ApiRequest::new(
      Method::Patch,
      self.resource.path(&format!("/cancel/{}", operation_id)),
    );
    self
      .resource
      .call(request, "Falha ao cancelar operação")
      .await?;
    self.resource.cache().evict(&BulkKey::Progress(operation_id));
    info!(operation_id, "bulk job cancelled");
    Ok(())
  }

  pub async fn get_result(&self, operation_id: &str) -> ServiceResult<BulkOperationResult> {
    let request = ApiRequest::new(
      Method::Get,
      self.resource.path(&format!("/result/{}", operation_id)),
    );
    self
      .resource
      .call_as(request, "Falha ao obter resultado da operação")
      .await
  }

  pub async fn history(&self, filters: &HistoryFilters) -> ServiceResult<Paginated<HistoryEntry>> {
    const MSG: &str = "Falha ao obter histórico de operações em lote";
    let request =
      ApiRequest::new(Method::Get, self.resource.path("/history")).query(to_json(filters).op(MSG)?);
    self
      .resource
      .read_page(&BulkKey::History(filters), request, filters.page, filters.limit, MSG)
      .await
  }

  pub async fn stats(&self) -> ServiceResult<BulkStats> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/stats"));
    self
      .resource
      .read_as(
        &BulkKey::Stats,
        request,
        "Falha ao obter estatísticas de operações em lote",
      )
      .await
  }

  pub async fn settings(&self) -> ServiceResult<BulkSettings> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/settings"));
    self
      .resource
      .read_as(
        &BulkKey::Settings,
        request,
        "Falha ao obter configurações de operações em lote",
      )
      .await
  }

  /// Only the settings entry is dropped; progress snapshots stay cached.
  pub async fn update_settings(&self, update: &BulkSettingsUpdate) -> ServiceResult<()> {
    const MSG: &str = "Falha ao atualizar configurações de operações em lote";
    let request = ApiRequest::new(Method::Put, self.resource.path("/settings")).body(to_json(update).op(MSG)?);
    self.resource.call(request, MSG).await?;
    self.resource.cache().evict(&BulkKey::Settings);
    Ok(())
  }

  /// Server-side dry run of `operation` over `data`.
  pub async fn validate(&self, operation: &str, data: Value) -> ServiceResult<BulkValidation> {
    let request = ApiRequest::new(Method::Post, self.resource.path("/validate"))
      .body(json!({ "operation": operation, "data": data }));
    self
      .resource
      .call_as(request, "Falha ao validar dados para operação em lote")
      .await
  }

  pub async fn cleanup(&self, days_to_keep: u32) -> ServiceResult<DeletedCount> {
    let request = ApiRequest::new(Method::Delete, self.resource.path("/cleanup"))
      .body(json!({ "days_to_keep": days_to_keep }));
    self
      .resource
      .write_as(request, "Falha ao limpar operações antigas")
      .await
  }

  pub async fn export(&self, export: &BulkExport) -> ServiceResult<Vec<u8>> {
    const MSG: &str = "Falha ao exportar usuários";
    let body = to_json(export).op(MSG)?;
    self
      .resource
      .download(Method::Post, &self.resource.path("/export"), None, Some(body), MSG)
      .await
  }

  pub async fn import_template(&self, format: ExportFormat) -> ServiceResult<Vec<u8>> {
    self
      .resource
      .download(
        Method::Get,
        &self.resource.path("/import-template"),
        Some(json!({ "format": format })),
        None,
        "Falha ao obter template de importação",
      )
      .await
  }

  // Synchronous batches

  async fn run(
    &self,
    method: Method,
    suffix: &str,
    check: impl FnOnce() -> Validation,
    payload: &impl Serialize,
    message: &'static str,
  ) -> ServiceResult<BulkOperationResult> {
    self.resource.validate(check)?;
    let request = ApiRequest::new(method, self.resource.path(suffix)).body(to_json(payload).op(message)?);
    let result: BulkOperationResult = self.resource.write_as(request, message).await?;
    info!(
      path = suffix,
      processed = result.processed,
      failed = result.failed,
      "bulk batch finished"
    );
    Ok(result)
  }

  pub async fn create(&self, batch: &BulkCreate) -> ServiceResult<BulkOperationResult> {
    let max = self.max_batch();
    self
      .run(
        Method::Post,
        "/create",
        || {
          validation::batch_size("users", batch.users.len(), max)?;
          batch.users.iter().try_for_each(NewUser::validate)
        },
        batch,
        "Falha ao criar usuários em lote",
      )
      .await
  }

  pub async fn update(&self, batch: &BulkUpdate) -> ServiceResult<BulkOperationResult> {
    let max = self.max_batch();
    self
      .run(
        Method::Put,
        "/update",
        || {
          validation::batch_size("updates", batch.updates.len(), max)?;
          batch.updates.iter().try_for_each(|patch| {
            if patch.user_id.trim().is_empty() {
              return Err(ValidationError::new("user_id", "IDs não podem ser vazios"));
            }
            patch.data.validate()
          })
        },
        batch,
        "Falha ao atualizar usuários em lote",
      )
      .await
  }

  pub async fn delete(&self, selection: &BulkSelection) -> ServiceResult<BulkOperationResult> {
    self
      .selection(Method::Delete, "/delete", selection, "Falha ao remover usuários em lote")
      .await
  }

  pub async fn assign_role(&self, change: &BulkRoleChange) -> ServiceResult<BulkOperationResult> {
    self
      .role_change(Method::Post, "/assign-role", change, "Falha ao atribuir role em lote")
      .await
  }

  pub async fn remove_role(&self, change: &BulkRoleChange) -> ServiceResult<BulkOperationResult> {
    self
      .role_change(Method::Delete, "/remove-role", change, "Falha ao remover role em lote")
      .await
  }

  pub async fn activate(&self, selection: &BulkSelection) -> ServiceResult<BulkOperationResult> {
    self
      .selection(Method::Patch, "/activate", selection, "Falha ao ativar usuários em lote")
      .await
  }

  pub async fn deactivate(&self, selection: &BulkSelection) -> ServiceResult<BulkOperationResult> {
    self
      .selection(
        Method::Patch,
        "/deactivate",
        selection,
        "Falha ao desativar usuários em lote",
      )
      .await
  }

  pub async fn suspend(&self, suspension: &BulkSuspension) -> ServiceResult<BulkOperationResult> {
    let max = self.max_batch();
    self
      .run(
        Method::Patch,
        "/suspend",
        || validation::non_empty_ids("user_ids", &suspension.user_ids, max),
        suspension,
        "Falha ao suspender usuários em lote",
      )
      .await
  }

  pub async fn unsuspend(&self, selection: &BulkSelection) -> ServiceResult<BulkOperationResult> {
    self
      .selection(
        Method::Patch,
        "/unsuspend",
        selection,
        "Falha ao remover suspensão de usuários em lote",
      )
      .await
  }

  async fn selection(
    &self,
    method: Method,
    suffix: &str,
    selection: &BulkSelection,
    message: &'static str,
  ) -> ServiceResult<BulkOperationResult> {
    let max = self.max_batch();
    self
      .run(
        method,
        suffix,
        || validation::non_empty_ids("user_ids", &selection.user_ids, max),
        selection,
        message,
      )
      .await
  }

  async fn role_change(
    &self,
    method: Method,
    suffix: &str,
    change: &BulkRoleChange,
    message: &'static str,
  ) -> ServiceResult<BulkOperationResult> {
    let max = self.max_batch();
    self
      .run(
        method,
        suffix,
        || {
          validation::non_empty_ids("user_ids", &change.user_ids, max)?;
          validation::required("role_id", &change.role_id, "Role é obrigatória")
        },
        change,
        message,
      )
      .await
  }
}

impl CachedService for BulkService {
  fn cache(&self) -> &CacheLayer {
    self.resource.cache()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::services::testing;

  fn progress(id: &str, status: &str, pct: f64) -> Value {
    json!({"operation_id": id, "status": status, "progress": pct, "processed": 1, "total": 2})
  }

  #[tokio::test]
  async fn test_start_returns_operation_id() {
    let (mock, ctx) = testing::context();
    mock.on_json(Method::Post, "/api/users/bulk/start", json!({"operation_id": 77}));
    let service = BulkService::new(ctx);

    let id = service
      .start("activate", json!({"user_ids": ["1"]}))
      .await
      .expect("start");

    assert_eq!(id, "77");
    let body = mock.calls()[0].body.clone().expect("body");
    assert_eq!(body["operation"], "activate");
    assert_eq!(body["data"]["user_ids"][0], "1");
  }

  #[tokio::test]
  async fn test_failed_start_surfaces() {
    let (mock, ctx) = testing::context();
    mock.on_status(Method::Post, "/api/users/bulk/start", 422);
    let service = BulkService::new(ctx);

    let err = service.start("delete", json!({})).await.expect_err("should fail");
    assert_eq!(err.to_string(), "Falha ao iniciar operação em lote");
    assert_eq!(err.status(), Some(422));
  }

  #[tokio::test]
  async fn test_progress_is_cached_until_cancel() {
    let (mock, ctx) = testing::context();
    mock.on_json(Method::Get, "/api/users/bulk/progress/9", progress("9", "running", 40.0));
    mock.on_json(Method::Patch, "/api/users/bulk/cancel/9", json!({}));
    let service = BulkService::new(ctx);

    service.get_progress("9").await.expect("progress");
    let cached = service.get_progress("9").await.expect("progress");
    assert_eq!(cached.status, BulkStatus::Running);
    assert_eq!(mock.call_count(Method::Get, "/api/users/bulk/progress/9"), 1);

    mock.on_json(Method::Get, "/api/users/bulk/progress/9", progress("9", "cancelled", 40.0));
    service.cancel("9").await.expect("cancel");
    let after = service.get_progress("9").await.expect("progress");

    assert_eq!(after.status, BulkStatus::Cancelled);
    assert!(after.status.is_terminal());
    assert_eq!(mock.call_count(Method::Get, "/api/users/bulk/progress/9"), 2);
  }

  #[tokio::test]
  async fn test_cancel_evicts_only_that_operation() {
    let (mock, ctx) = testing::context();
    mock.on_json(Method::Get, "/api/users/bulk/progress/1", progress("1", "running", 10.0));
    mock.on_json(Method::Get, "/api/users/bulk/progress/10", progress("10", "running", 10.0));
    mock.on_json(Method::Patch, "/api/users/bulk/cancel/1", json!({}));
    let service = BulkService::new(ctx);

    service.get_progress("1").await.expect("progress");
    service.get_progress("10").await.expect("progress");
    service.cancel("1").await.expect("cancel");
    service.get_progress("10").await.expect("progress");

    assert_eq!(mock.call_count(Method::Get, "/api/users/bulk/progress/10"), 1);
  }

  #[tokio::test]
  async fn test_result_is_never_cached() {
    let (mock, ctx) = testing::context();
    mock.on_json(
      Method::Get,
      "/api/users/bulk/result/3",
      json!({
        "success": false,
        "processed": 2,
        "failed": 1,
        "errors": [{"user_id": 5, "error": "not found"}],
        "results": [{"user_id": "4", "success": true}],
      }),
    );
    let service = BulkService::new(ctx);

    let result = service.get_result("3").await.expect("result");
    service.get_result("3").await.expect("result");

    assert_eq!(result.failed_ids(), vec!["5"]);
    assert!(result.results[0].success);
    assert_eq!(mock.total_calls(), 2);
  }

  #[tokio::test]
  async fn test_delete_clears_linked_cache() {
    let (mock, ctx) = testing::context();
    mock.on_json(
      Method::Delete,
      "/api/users/bulk/delete",
      json!({"success": true, "processed": 2, "failed": 0}),
    );
    let users = testing::cache();
    users.set("users:{}", json!({"data": [{"id": "1"}]}));
    let service = BulkService::new(ctx).with_linked_cache(users.clone());

    let result = service
      .delete(&BulkSelection::of(&["1", "2"]))
      .await
      .expect("delete");

    assert_eq!(result.processed, 2);
    assert!(users.get("users:{}").is_none());
    let body = mock.calls()[0].body.clone().expect("body");
    assert_eq!(body, json!({"user_ids": ["1", "2"]}));
  }

  #[tokio::test]
  async fn test_batch_limit_enforced_before_request() {
    let (mock, ctx) = testing::context();
    ctx.set_max_batch_size(2);
    let service = BulkService::new(ctx);

    let err = service
      .activate(&BulkSelection::of(&["1", "2", "3"]))
      .await
      .expect_err("too many");
    assert!(err.is_validation());
    assert_eq!(err.to_string(), "Operação em lote limitada a 2 itens");

    let err = service
      .assign_role(&BulkRoleChange {
        user_ids: vec!["1".into()],
        ..Default::default()
      })
      .await
      .expect_err("no role");
    assert_eq!(err.to_string(), "Role é obrigatória");
    assert_eq!(mock.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_create_validates_each_user() {
    let (mock, ctx) = testing::context();
    let service = BulkService::new(ctx);

    let err = service
      .create(&BulkCreate {
        users: vec![NewUser {
          name: "Ana".into(),
          email: "ana-at-example".into(),
          password: "12345678".into(),
          ..Default::default()
        }],
        ..Default::default()
      })
      .await
      .expect_err("bad email");

    assert!(err.is_validation());
    assert_eq!(mock.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_update_settings_evicts_settings_only() {
    let (mock, ctx) = testing::context();
    mock.on_json(Method::Get, "/api/users/bulk/settings", json!({"max_batch_size": 50}));
    mock.on_json(Method::Get, "/api/users/bulk/stats", json!({"total_operations": 3}));
    mock.on_json(Method::Put, "/api/users/bulk/settings", json!({}));
    let service = BulkService::new(ctx);

    service.settings().await.expect("settings");
    service.stats().await.expect("stats");
    service
      .update_settings(&BulkSettingsUpdate {
        max_batch_size: Some(20),
        ..Default::default()
      })
      .await
      .expect("update");
    service.settings().await.expect("settings");
    service.stats().await.expect("stats");

    assert_eq!(mock.call_count(Method::Get, "/api/users/bulk/settings"), 2);
    assert_eq!(mock.call_count(Method::Get, "/api/users/bulk/stats"), 1);
    let body = mock.calls()[2].body.clone().expect("body");
    assert_eq!(body, json!({"max_batch_size": 20}));
  }
}
