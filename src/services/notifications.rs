//! Notifications: delivery, read state, templates and scheduling.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::{CachedService, Resource, ServiceContext};
use crate::cache::{keyed, CacheLayer, QueryKey};
use crate::error::{OperationContext, ServiceResult, ValidationError};
use crate::transport::{from_json, to_json, ApiRequest, Method};
use crate::types::{id_string, LabelCount, Paginated, SortOrder};
use crate::validation::{self, Validation};

/// Unread counts go stale quickly.
pub const NOTIFICATIONS_TTL: Duration = Duration::from_secs(60);

const BASE: &str = "/api/users/notifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
  #[default]
  Info,
  Success,
  Warning,
  Error,
  System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Low,
  #[default]
  Medium,
  High,
  Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
  Email,
  Push,
  Sms,
  InApp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  #[serde(deserialize_with = "id_string")]
  pub id: String,
  #[serde(deserialize_with = "id_string")]
  pub user_id: String,
  #[serde(rename = "type", default)]
  pub kind: NotificationKind,
  pub title: String,
  pub message: String,
  #[serde(default)]
  pub data: Option<Map<String, Value>>,
  #[serde(default)]
  pub is_read: bool,
  #[serde(default)]
  pub is_archived: bool,
  #[serde(default)]
  pub priority: Priority,
  #[serde(default)]
  pub channels: Vec<Channel>,
  #[serde(default)]
  pub scheduled_at: Option<String>,
  #[serde(default)]
  pub read_at: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationFilters {
  pub user_id: Option<String>,
  #[serde(rename = "type")]
  pub kind: Option<NotificationKind>,
  pub priority: Option<Priority>,
  pub is_read: Option<bool>,
  pub is_archived: Option<bool>,
  pub date_from: Option<String>,
  pub date_to: Option<String>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
  pub sort_by: Option<String>,
  pub sort_order: Option<SortOrder>,
}

/// Narrows the scheduled lookup. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduledFilters {
  pub user_id: Option<String>,
  pub date_from: Option<String>,
  pub date_to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewNotification {
  pub user_id: String,
  #[serde(rename = "type")]
  pub kind: NotificationKind,
  pub title: String,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<Map<String, Value>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub channels: Vec<Channel>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub scheduled_at: Option<String>,
}

fn validate_content(title: &str, message: &str) -> Validation {
  validation::required("title", title, "Título da notificação é obrigatório")?;
  validation::required("message", message, "Mensagem da notificação é obrigatória")?;
  validation::max_len("title", title, 200, "Título deve ter no máximo 200 caracteres")?;
  validation::max_len("message", message, 1000, "Mensagem deve ter no máximo 1000 caracteres")?;
  Ok(())
}

fn validate_schedule(scheduled_at: Option<&str>) -> Validation {
  if let Some(when) = scheduled_at {
    match validation::parse_date(when) {
      Some(at) if at > Utc::now() => {}
      Some(_) => {
        return Err(ValidationError::new(
          "scheduled_at",
          "Data de agendamento deve ser no futuro",
        ))
      }
      None => return Err(ValidationError::new("scheduled_at", "Data de agendamento inválida")),
    }
  }
  Ok(())
}

impl NewNotification {
  pub fn validate(&self) -> Validation {
    validation::required("user_id", &self.user_id, "ID do usuário é obrigatório")?;
    validate_content(&self.title, &self.message)?;
    validate_schedule(self.scheduled_at.as_deref())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkNotification {
  pub user_ids: Vec<String>,
  #[serde(rename = "type")]
  pub kind: NotificationKind,
  pub title: String,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub channels: Vec<Channel>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub scheduled_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryError {
  #[serde(deserialize_with = "id_string")]
  pub user_id: String,
  pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkNotificationResult {
  pub success: bool,
  pub total_sent: u64,
  pub total_failed: u64,
  pub errors: Vec<DeliveryError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationStats {
  pub total_notifications: u64,
  pub unread_notifications: u64,
  pub read_notifications: u64,
  pub archived_notifications: u64,
  pub notifications_today: u64,
  pub average_read_time: f64,
  pub notifications_by_type: HashMap<String, u64>,
  pub most_common_types: Vec<LabelCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPreference {
  pub enabled: bool,
  pub types: Vec<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
  pub email_notifications: ChannelPreference,
  pub push_notifications: ChannelPreference,
  pub sms_notifications: ChannelPreference,
  pub in_app_notifications: ChannelPreference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTemplate {
  #[serde(deserialize_with = "id_string")]
  pub id: String,
  pub name: String,
  #[serde(rename = "type", default)]
  pub kind: String,
  #[serde(default)]
  pub title_template: String,
  #[serde(default)]
  pub message_template: String,
  #[serde(default)]
  pub variables: Vec<String>,
  #[serde(default)]
  pub is_active: bool,
}

enum NotificationKey<'a> {
  List(&'a NotificationFilters),
  Detail(&'a str),
  UnreadCount(&'a str),
  Stats,
  Settings(&'a str),
  Templates,
}

impl QueryKey for NotificationKey<'_> {
  fn cache_key(&self) -> String {
    match self {
      NotificationKey::List(filters) => keyed("notifications", filters),
      NotificationKey::Detail(id) => format!("notification:{}", id),
      NotificationKey::UnreadCount(user_id) => format!("unread_count:{}", user_id),
      NotificationKey::Stats => "notification_stats".to_string(),
      NotificationKey::Settings(user_id) => format!("notification_settings:{}", user_id),
      NotificationKey::Templates => "notification_templates".to_string(),
    }
  }
}

#[derive(Clone)]
pub struct NotificationService {
  resource: Resource,
}

impl NotificationService {
  pub fn new(ctx: ServiceContext) -> Self {
    Self::with_cache(ctx, CacheLayer::memory(NOTIFICATIONS_TTL))
  }

  pub fn with_cache(ctx: ServiceContext, cache: CacheLayer) -> Self {
    Self {
      resource: Resource::new(ctx, cache, BASE),
    }
  }

  pub async fn list(&self, filters: &NotificationFilters) -> ServiceResult<Paginated<Notification>> {
    const MSG: &str = "Falha ao carregar notificações";
    let request = ApiRequest::new(Method::Get, BASE).query(to_json(filters).op(MSG)?);
    self
      .resource
      .read_page(&NotificationKey::List(filters), request, filters.page, filters.limit, MSG)
      .await
  }

  pub async fn get(&self, id: &str) -> ServiceResult<Notification> {
    let request = ApiRequest::new(Method::Get, self.resource.path(&format!("/{}", id)));
    self
      .resource
      .read_as(&NotificationKey::Detail(id), request, "Falha ao carregar notificação")
      .await
  }

  pub async fn send(&self, notification: &NewNotification) -> ServiceResult<Notification> {
    const MSG: &str = "Falha ao enviar notificação";
    self.resource.validate(|| notification.validate())?;
    let request = ApiRequest::new(Method::Post, BASE).body(to_json(notification).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }

  /// Same as [`send`](Self::send) but a future `scheduled_at` is mandatory.
  pub async fn schedule(&self, notification: &NewNotification) -> ServiceResult<Notification> {
    if notification.scheduled_at.is_none() {
      return Err(ValidationError::new("scheduled_at", "Data de agendamento é obrigatória").into());
    }
    self.send(notification).await
  }

  pub async fn cancel_scheduled(&self, id: &str) -> ServiceResult<()> {
    let request = ApiRequest::new(Method::Patch, self.resource.path(&format!("/{}/cancel", id)));
    self
      .resource
      .write(request, "Falha ao cancelar notificação agendada")
      .await?;
    Ok(())
  }

  /// Notifications that carry a schedule date, out of the first thousand matching `filters`.
  pub async fn scheduled(&self, filters: &ScheduledFilters) -> ServiceResult<Vec<Notification>> {
    const MSG: &str = "Falha ao buscar notificações agendadas";
    let filters = NotificationFilters {
      user_id: filters.user_id.clone(),
      date_from: filters.date_from.clone(),
      date_to: filters.date_to.clone(),
      limit: Some(1000),
      ..Default::default()
    };
    let request = ApiRequest::new(Method::Get, BASE).query(to_json(&filters).op(MSG)?);
    let page: Paginated<Notification> = self
      .resource
      .read_page(&NotificationKey::List(&filters), request, filters.page, filters.limit, MSG)
      .await?;
    Ok(
      page
        .data
        .into_iter()
        .filter(|n| n.scheduled_at.is_some())
        .collect(),
    )
  }

  pub async fn for_user(
    &self,
    user_id: &str,
    filters: &NotificationFilters,
  ) -> ServiceResult<Paginated<Notification>> {
    let filters = NotificationFilters {
      user_id: Some(user_id.to_string()),
      ..filters.clone()
    };
    self.list(&filters).await
  }

  pub async fn unread(&self, user_id: &str) -> ServiceResult<Vec<Notification>> {
    let filters = NotificationFilters {
      is_read: Some(false),
      is_archived: Some(false),
      limit: Some(100),
      ..Default::default()
    };
    Ok(self.for_user(user_id, &filters).await?.data)
  }

  pub async fn mark_read(&self, id: &str) -> ServiceResult<Notification> {
    self
      .patch_one(id, "read", "Falha ao marcar notificação como lida")
      .await
  }

  pub async fn mark_many_read(&self, ids: &[String]) -> ServiceResult<()> {
    let request = ApiRequest::new(Method::Patch, self.resource.path("/mark-read"))
      .body(json!({ "notification_ids": ids }));
    self
      .resource
      .write(request, "Falha ao marcar notificações como lidas")
      .await?;
    Ok(())
  }

  pub async fn mark_all_read(&self, user_id: &str) -> ServiceResult<()> {
    let request = ApiRequest::new(Method::Patch, self.resource.path("/mark-all-read"))
      .body(json!({ "user_id": user_id }));
    self
      .resource
      .write(request, "Falha ao marcar todas as notificações como lidas")
      .await?;
    Ok(())
  }

  pub async fn archive(&self, id: &str) -> ServiceResult<Notification> {
    self.patch_one(id, "archive", "Falha ao arquivar notificação").await
  }

  pub async fn unarchive(&self, id: &str) -> ServiceResult<Notification> {
    self.patch_one(id, "unarchive", "Falha ao desarquivar notificação").await
  }

  async fn patch_one(&self, id: &str, action: &str, message: &'static str) -> ServiceResult<Notification> {
    let request = ApiRequest::new(Method::Patch, self.resource.path(&format!("/{}/{}", id, action)));
    self.resource.write_as(request, message).await
  }

  pub async fn delete(&self, id: &str) -> ServiceResult<()> {
    let request = ApiRequest::new(Method::Delete, self.resource.path(&format!("/{}", id)));
    self.resource.write(request, "Falha ao remover notificação").await?;
    Ok(())
  }

  pub async fn unread_count(&self, user_id: &str) -> ServiceResult<u64> {
    const MSG: &str = "Falha ao obter contagem de notificações não lidas";
    let request =
      ApiRequest::new(Method::Get, self.resource.path("/unread-count")).query(json!({ "user_id": user_id }));
    let raw = self
      .resource
      .read(&NotificationKey::UnreadCount(user_id), request, MSG)
      .await?;
    match raw.get("count").cloned() {
      Some(count) => from_json(count).op(MSG),
      None => from_json(raw).op(MSG),
    }
  }

  pub async fn stats(&self) -> ServiceResult<NotificationStats> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/stats"));
    self
      .resource
      .read_as(
        &NotificationKey::Stats,
        request,
        "Falha ao obter estatísticas de notificações",
      )
      .await
  }

  pub async fn settings(&self, user_id: &str) -> ServiceResult<DeliverySettings> {
    let request = ApiRequest::new(Method::Get, self.resource.path(&format!("/settings/{}", user_id)));
    self
      .resource
      .read_as(
        &NotificationKey::Settings(user_id),
        request,
        "Falha ao obter configurações de notificação",
      )
      .await
  }

  pub async fn update_settings(
    &self,
    user_id: &str,
    settings: &DeliverySettings,
  ) -> ServiceResult<DeliverySettings> {
    const MSG: &str = "Falha ao atualizar configurações de notificação";
    let request = ApiRequest::new(Method::Put, self.resource.path(&format!("/settings/{}", user_id)))
      .body(to_json(settings).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }

  pub async fn templates(&self) -> ServiceResult<Vec<NotificationTemplate>> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/templates"));
    self
      .resource
      .read_as(
        &NotificationKey::Templates,
        request,
        "Falha ao carregar templates de notificação",
      )
      .await
  }

  pub async fn send_template(
    &self,
    template_id: &str,
    user_id: &str,
    variables: Map<String, Value>,
  ) -> ServiceResult<Notification> {
    let request = ApiRequest::new(Method::Post, self.resource.path("/send-template")).body(json!({
      "template_id": template_id,
      "user_id": user_id,
      "variables": variables,
    }));
    self
      .resource
      .write_as(request, "Falha ao enviar notificação template")
      .await
  }

  pub async fn send_bulk(&self, bulk: &BulkNotification) -> ServiceResult<BulkNotificationResult> {
    const MSG: &str = "Falha ao enviar notificação em lote";
    self.resource.validate(|| {
      validation::non_empty_ids("user_ids", &bulk.user_ids, self.resource.ctx().max_batch_size())?;
      validate_content(&bulk.title, &bulk.message)?;
      validate_schedule(bulk.scheduled_at.as_deref())
    })?;
    let request = ApiRequest::new(Method::Post, self.resource.path("/bulk-send")).body(to_json(bulk).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }
}

impl CachedService for NotificationService {
  fn cache(&self) -> &CacheLayer {
    self.resource.cache()
  }
}
