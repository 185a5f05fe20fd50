//! Audit trail of changes made through the admin API.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::users::User;
use super::{CachedService, Resource, ServiceContext};
use crate::cache::{keyed, CacheLayer, QueryKey};
use crate::error::{OperationContext, ServiceResult};
use crate::transport::{to_json, ApiRequest, Method};
use crate::types::{id_string, opt_id_string, DeletedCount, ExportFormat, LabelCount, Paginated, SortOrder};
use crate::validation::{self, Validation};

pub const AUDIT_TTL: Duration = Duration::from_secs(5 * 60);

const BASE: &str = "/api/users/audit";

/// Actions treated as security events.
pub const SECURITY_ACTIONS: [&str; 4] = ["login_failed", "privilege_escalation", "data_export", "admin_action"];

/// Page size for the unpaged lookups (today, by IP, by location).
const LOOKUP_LIMIT: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
  #[serde(deserialize_with = "id_string")]
  pub id: String,
  #[serde(deserialize_with = "id_string")]
  pub user_id: String,
  pub action: String,
  pub resource_type: String,
  #[serde(deserialize_with = "id_string")]
  pub resource_id: String,
  #[serde(default)]
  pub old_values: Option<Map<String, Value>>,
  #[serde(default)]
  pub new_values: Option<Map<String, Value>>,
  #[serde(default)]
  pub ip_address: Option<String>,
  #[serde(default)]
  pub user_agent: Option<String>,
  #[serde(default)]
  pub location: Option<AuditLocation>,
  #[serde(default)]
  pub created_at: Option<String>,
}

impl AuditLog {
  /// Whether `place` names the city, region or country of the entry.
  pub fn is_located_in(&self, place: &str) -> bool {
    self.location.as_ref().is_some_and(|loc| {
      [&loc.city, &loc.region, &loc.country]
        .into_iter()
        .any(|part| part.as_deref() == Some(place))
    })
  }

  pub fn is_security_event(&self) -> bool {
    SECURITY_ACTIONS.contains(&self.action.as_str())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditLocation {
  pub city: Option<String>,
  pub region: Option<String>,
  pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditFilters {
  pub user_id: Option<String>,
  pub action: Option<String>,
  pub resource_type: Option<String>,
  pub resource_id: Option<String>,
  pub date_from: Option<String>,
  pub date_to: Option<String>,
  pub ip_address: Option<String>,
  pub severity: Option<String>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
  pub sort_by: Option<String>,
  pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SecurityEventParams {
  pub severity: Option<String>,
  pub date_from: Option<String>,
  pub date_to: Option<String>,
  /// Defaults to 100
  pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportRequest {
  pub date_from: String,
  pub date_to: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub filters: Option<AuditFilters>,
}

impl ReportRequest {
  pub fn validate(&self) -> Validation {
    validation::required("date_from", &self.date_from, "Data inicial é obrigatória")?;
    validation::required("date_to", &self.date_to, "Data final é obrigatória")?;
    Ok(())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportPeriod {
  pub from: String,
  pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActionCount {
  pub user: User,
  pub count: u64,
  #[serde(default)]
  pub last_action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionCount {
  pub action: String,
  pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateCount {
  pub date: String,
  pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityEventCount {
  #[serde(rename = "type")]
  pub kind: String,
  pub count: u64,
  pub severity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditReport {
  pub period: ReportPeriod,
  pub total_logs: u64,
  pub unique_users: u64,
  pub logs_by_action: HashMap<String, u64>,
  pub logs_by_user: Vec<UserActionCount>,
  pub top_actions: Vec<ActionCount>,
  pub audit_timeline: Vec<DateCount>,
  pub security_events: Vec<SecurityEventCount>,
  pub generated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditAlert {
  #[serde(deserialize_with = "id_string")]
  pub id: String,
  #[serde(rename = "type")]
  pub kind: String,
  pub severity: String,
  pub message: String,
  #[serde(default, deserialize_with = "opt_id_string")]
  pub user_id: Option<String>,
  #[serde(default)]
  pub resource_type: Option<String>,
  #[serde(default, deserialize_with = "opt_id_string")]
  pub resource_id: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub is_resolved: bool,
  #[serde(default)]
  pub resolved_at: Option<String>,
  #[serde(default)]
  pub resolved_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewAuditLog {
  pub user_id: String,
  pub action: String,
  pub resource_type: String,
  pub resource_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub old_values: Option<Map<String, Value>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub new_values: Option<Map<String, Value>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ip_address: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user_agent: Option<String>,
}

impl NewAuditLog {
  pub fn validate(&self) -> Validation {
    validation::required("user_id", &self.user_id, "ID do usuário é obrigatório")?;
    validation::required("action", &self.action, "Ação é obrigatória")?;
    validation::required("resource_type", &self.resource_type, "Tipo de recurso é obrigatório")?;
    validation::required("resource_id", &self.resource_id, "ID do recurso é obrigatório")?;
    Ok(())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditStats {
  pub total_logs: u64,
  pub logs_today: u64,
  pub logs_this_week: u64,
  pub logs_this_month: u64,
  pub logs_by_action: HashMap<String, u64>,
  pub logs_by_resource_type: HashMap<String, u64>,
  pub most_audited_resources: Vec<LabelCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditActionType {
  pub name: String,
  pub display_name: String,
  pub description: String,
  pub category: String,
  pub severity: String,
  pub requires_approval: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
  pub enabled: bool,
  pub log_levels: Vec<String>,
  pub retention_days: u32,
  pub auto_cleanup: bool,
  pub real_time_alerts: bool,
  pub excluded_actions: Vec<String>,
  pub excluded_users: Vec<String>,
  pub ip_whitelist: Vec<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

enum AuditKey<'a> {
  List(&'a AuditFilters),
  Detail(&'a str),
  Recent(u32),
  Stats,
  ActionTypes,
  Settings,
}

impl QueryKey for AuditKey<'_> {
  fn cache_key(&self) -> String {
    match self {
      AuditKey::List(filters) => keyed("audit_logs", filters),
      AuditKey::Detail(id) => format!("audit_log:{}", id),
      AuditKey::Recent(limit) => format!("recent_audit_logs:{}", limit),
      AuditKey::Stats => "audit_stats".to_string(),
      AuditKey::ActionTypes => "audit_action_types".to_string(),
      AuditKey::Settings => "audit_settings".to_string(),
    }
  }
}

#[derive(Clone)]
pub struct AuditService {
  resource: Resource,
}

impl AuditService {
  pub fn new(ctx: ServiceContext) -> Self {
    Self::with_cache(ctx, CacheLayer::memory(AUDIT_TTL))
  }

  pub fn with_cache(ctx: ServiceContext, cache: CacheLayer) -> Self {
    Self {
      resource: Resource::new(ctx, cache, BASE),
    }
  }

  pub async fn list(&self, filters: &AuditFilters) -> ServiceResult<Paginated<AuditLog>> {
    self.search(filters, "Falha ao carregar logs de auditoria").await
  }

  /// Cached listing reported under `message`. The narrower lookups below
  /// share the listing cache.
  async fn search(&self, filters: &AuditFilters, message: &'static str) -> ServiceResult<Paginated<AuditLog>> {
    let request = ApiRequest::new(Method::Get, BASE).query(to_json(filters).op(message)?);
    self
      .resource
      .read_page(&AuditKey::List(filters), request, filters.page, filters.limit, message)
      .await
  }

  pub async fn by_action(&self, action: &str, filters: &AuditFilters) -> ServiceResult<Paginated<AuditLog>> {
    let filters = AuditFilters {
      action: Some(action.to_string()),
      ..filters.clone()
    };
    self
      .search(&filters, "Falha ao carregar logs de auditoria da ação")
      .await
  }

  pub async fn by_resource_type(
    &self,
    resource_type: &str,
    filters: &AuditFilters,
  ) -> ServiceResult<Paginated<AuditLog>> {
    let filters = AuditFilters {
      resource_type: Some(resource_type.to_string()),
      ..filters.clone()
    };
    self
      .search(&filters, "Falha ao carregar logs de auditoria do tipo de recurso")
      .await
  }

  pub async fn by_resource(
    &self,
    resource_type: &str,
    resource_id: &str,
    filters: &AuditFilters,
  ) -> ServiceResult<Paginated<AuditLog>> {
    let filters = AuditFilters {
      resource_type: Some(resource_type.to_string()),
      resource_id: Some(resource_id.to_string()),
      ..filters.clone()
    };
    self
      .search(&filters, "Falha ao carregar logs de auditoria do recurso")
      .await
  }

  pub async fn by_ip(&self, ip_address: &str) -> ServiceResult<Vec<AuditLog>> {
    let filters = AuditFilters {
      ip_address: Some(ip_address.to_string()),
      limit: Some(LOOKUP_LIMIT),
      ..Default::default()
    };
    let page = self
      .search(&filters, "Falha ao buscar logs de auditoria por IP")
      .await?;
    Ok(page.data)
  }

  /// Entries whose city, region or country equals `place`. The server has
  /// no location filter, so the match runs on the latest entries.
  pub async fn by_location(&self, place: &str) -> ServiceResult<Vec<AuditLog>> {
    let filters = AuditFilters {
      limit: Some(LOOKUP_LIMIT),
      ..Default::default()
    };
    let page = self
      .search(&filters, "Falha ao buscar logs de auditoria por localização")
      .await?;
    Ok(page.data.into_iter().filter(|log| log.is_located_in(place)).collect())
  }

  /// Entries dated today (UTC).
  pub async fn today(&self) -> ServiceResult<Vec<AuditLog>> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let filters = AuditFilters {
      date_from: Some(today.clone()),
      date_to: Some(today),
      limit: Some(LOOKUP_LIMIT),
      ..Default::default()
    };
    let page = self
      .search(&filters, "Falha ao carregar logs de auditoria de hoje")
      .await?;
    Ok(page.data)
  }

  /// Entries whose action is one of [`SECURITY_ACTIONS`].
  pub async fn security_events(&self, params: &SecurityEventParams) -> ServiceResult<Vec<AuditLog>> {
    let filters = AuditFilters {
      severity: params.severity.clone(),
      date_from: params.date_from.clone(),
      date_to: params.date_to.clone(),
      limit: Some(params.limit.unwrap_or(100)),
      ..Default::default()
    };
    let page = self
      .search(&filters, "Falha ao buscar eventos de segurança")
      .await?;
    Ok(page.data.into_iter().filter(AuditLog::is_security_event).collect())
  }

  /// Server-side report over a date range. Never cached.
  pub async fn report(&self, request: &ReportRequest) -> ServiceResult<AuditReport> {
    const MSG: &str = "Falha ao gerar relatório de auditoria";
    self.resource.validate(|| request.validate())?;
    let request = ApiRequest::new(Method::Post, self.resource.path("/report")).body(to_json(request).op(MSG)?);
    self.resource.call_as(request, MSG).await
  }

  pub async fn alerts(&self) -> ServiceResult<Vec<AuditAlert>> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/alerts"));
    self
      .resource
      .call_as(request, "Falha ao obter alertas de auditoria")
      .await
  }

  pub async fn resolve_alert(&self, alert_id: &str, resolved_by: &str, notes: Option<&str>) -> ServiceResult<()> {
    const MSG: &str = "Falha ao resolver alerta de auditoria";
    self
      .resource
      .validate(|| validation::required("resolved_by", resolved_by, "Responsável é obrigatório"))?;
    let request = ApiRequest::new(
      Method::Patch,
      self.resource.path(&format!("/alerts/{}/resolve", alert_id)),
    )
    .body(json!({ "resolved_by": resolved_by, "notes": notes }));
    self.resource.write(request, MSG).await?;
    Ok(())
  }

  pub async fn get(&self, id: &str) -> ServiceResult<AuditLog> {
    let request = ApiRequest::new(Method::Get, self.resource.path(&format!("/{}", id)));
    self
      .resource
      .read_as(&AuditKey::Detail(id), request, "Falha ao carregar log de auditoria")
      .await
  }

  pub async fn log(&self, entry: &NewAuditLog) -> ServiceResult<AuditLog> {
    const MSG: &str = "Falha ao registrar log de auditoria";
    self.resource.validate(|| entry.validate())?;
    let request = ApiRequest::new(Method::Post, BASE).body(to_json(entry).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }

  pub async fn for_user(&self, user_id: &str, filters: &AuditFilters) -> ServiceResult<Paginated<AuditLog>> {
    let filters = AuditFilters {
      user_id: Some(user_id.to_string()),
      ..filters.clone()
    };
    self.list(&filters).await
  }

  pub async fn recent(&self, limit: u32) -> ServiceResult<Vec<AuditLog>> {
    let request =
      ApiRequest::new(Method::Get, self.resource.path("/recent")).query(json!({ "limit": limit }));
    self
      .resource
      .read_as(
        &AuditKey::Recent(limit),
        request,
        "Falha ao carregar logs de auditoria recentes",
      )
      .await
  }

  pub async fn stats(&self) -> ServiceResult<AuditStats> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/stats"));
    self
      .resource
      .read_as(&AuditKey::Stats, request, "Falha ao obter estatísticas de auditoria")
      .await
  }

  pub async fn action_types(&self) -> ServiceResult<Vec<AuditActionType>> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/action-types"));
    self
      .resource
      .read_as(
        &AuditKey::ActionTypes,
        request,
        "Falha ao carregar tipos de ação de auditoria",
      )
      .await
  }

  pub async fn export(&self, filters: &AuditFilters, format: ExportFormat) -> ServiceResult<Vec<u8>> {
    const MSG: &str = "Falha ao exportar logs de auditoria";
    let mut body = to_json(filters).op(MSG)?;
    if let Value::Object(map) = &mut body {
      map.insert("format".to_string(), to_json(&format).op(MSG)?);
    }
    self
      .resource
      .download(Method::Post, &self.resource.path("/export"), None, Some(body), MSG)
      .await
  }

  /// Delete entries older than `days_to_keep` days.
  pub async fn cleanup(&self, days_to_keep: u32) -> ServiceResult<DeletedCount> {
    let request = ApiRequest::new(Method::Delete, self.resource.path("/cleanup"))
      .body(json!({ "days_to_keep": days_to_keep }));
    self
      .resource
      .write_as(request, "Falha ao limpar logs de auditoria antigos")
      .await
  }

  pub async fn settings(&self) -> ServiceResult<AuditSettings> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/settings"));
    self
      .resource
      .read_as(
        &AuditKey::Settings,
        request,
        "Falha ao obter configurações de auditoria",
      )
      .await
  }

  pub async fn update_settings(&self, settings: &AuditSettings) -> ServiceResult<AuditSettings> {
    const MSG: &str = "Falha ao atualizar configurações de auditoria";
    let request = ApiRequest::new(Method::Put, self.resource.path("/settings")).body(to_json(settings).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }
}

impl CachedService for AuditService {
  fn cache(&self) -> &CacheLayer {
    self.resource.cache()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::services::testing;

  #[tokio::test]
  async fn test_log_requires_resource_id() {
    let (mock, ctx) = testing::context();
    let service = AuditService::new(ctx);

    let err = service
      .log(&NewAuditLog {
        user_id: "1".into(),
        action: "update".into(),
        resource_type: "user".into(),
        ..Default::default()
      })
      .await
      .expect_err("should fail");

    assert_eq!(err.to_string(), "ID do recurso é obrigatório");
    assert_eq!(mock.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_user_logs_share_listing_cache() {
    let (mock, ctx) = testing::context();
    mock.on_json(
      Method::Get,
      BASE,
      json!({"data": [{"id": 1, "user_id": 4, "action": "login", "resource_type": "session", "resource_id": 9}], "total": 31}),
    );
    let service = AuditService::new(ctx);

    let by_user = service
      .for_user("4", &AuditFilters::default())
      .await
      .expect("user logs");
    let listed = service
      .list(&AuditFilters {
        user_id: Some("4".into()),
        ..Default::default()
      })
      .await
      .expect("list");

    assert_eq!(by_user, listed);
    assert_eq!(by_user.total_pages, 4);
    assert_eq!(mock.total_calls(), 1);
  }

  fn entry(id: u32, action: &str, city: Option<&str>) -> Value {
    json!({
      "id": id,
      "user_id": 4,
      "action": action,
      "resource_type": "user",
      "resource_id": 9,
      "location": city.map(|c| json!({"city": c, "country": "Brasil"})),
    })
  }

  #[tokio::test]
  async fn test_lookups_filter_and_keep_their_messages() {
    let (mock, ctx) = testing::context();
    mock.on_json(
      Method::Get,
      BASE,
      json!({"data": [
        entry(1, "login_failed", Some("Recife")),
        entry(2, "update", Some("Natal")),
        entry(3, "data_export", None),
      ], "total": 3}),
    );
    let service = AuditService::new(ctx);

    let security = service
      .security_events(&SecurityEventParams::default())
      .await
      .expect("security events");
    let ids: Vec<&str> = security.iter().map(|log| log.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3"]);

    let natal = service.by_location("Natal").await.expect("by location");
    assert_eq!(natal.len(), 1);
    assert_eq!(natal[0].id, "2");
    assert_eq!(service.by_location("Brasil").await.expect("by country").len(), 2);

    service.by_ip("10.0.0.1").await.expect("by ip");
    let query = mock.calls().last().and_then(|call| call.query.clone()).expect("query");
    assert_eq!(query["ip_address"], "10.0.0.1");
    assert_eq!(query["limit"], 1000);

    mock.on_status(Method::Get, BASE, 500);
    service.clear_cache();
    let err = service
      .by_action("login", &AuditFilters::default())
      .await
      .expect_err("server down");
    assert_eq!(err.to_string(), "Falha ao carregar logs de auditoria da ação");
    let err = service.today().await.expect_err("server down");
    assert_eq!(err.to_string(), "Falha ao carregar logs de auditoria de hoje");
  }

  #[tokio::test]
  async fn test_by_resource_sends_type_and_id() {
    let (mock, ctx) = testing::context();
    mock.on_json(Method::Get, BASE, json!({"data": [], "total": 0}));
    let service = AuditService::new(ctx);

    service
      .by_resource("role", "12", &AuditFilters::default())
      .await
      .expect("by resource");

    let query = mock.calls()[0].query.clone().expect("query");
    assert_eq!(query["resource_type"], "role");
    assert_eq!(query["resource_id"], "12");
  }

  #[tokio::test]
  async fn test_report_is_validated_and_uncached() {
    let (mock, ctx) = testing::context();
    mock.on_json(
      Method::Post,
      "/api/users/audit/report",
      json!({"period": {"from": "2024-01-01", "to": "2024-01-31"}, "total_logs": 40, "top_actions": [{"action": "login", "count": 30}]}),
    );
    let service = AuditService::new(ctx);

    let err = service
      .report(&ReportRequest::default())
      .await
      .expect_err("dates required");
    assert!(err.is_validation());

    let request = ReportRequest {
      date_from: "2024-01-01".into(),
      date_to: "2024-01-31".into(),
      filters: None,
    };
    service.report(&request).await.expect("report");
    let report = service.report(&request).await.expect("report");

    assert_eq!(report.total_logs, 40);
    assert_eq!(report.top_actions[0].count, 30);
    assert_eq!(report.period.to, "2024-01-31");
    assert_eq!(mock.total_calls(), 2);
  }

  #[tokio::test]
  async fn test_resolve_alert_clears_cache() {
    let (mock, ctx) = testing::context();
    mock.on_json(
      Method::Get,
      "/api/users/audit/alerts",
      json!([{"id": 5, "type": "brute_force", "severity": "high", "message": "x", "user_id": 3}]),
    );
    mock.on_json(Method::Get, "/api/users/audit/stats", json!({"total_logs": 1}));
    mock.on_json(Method::Patch, "/api/users/audit/alerts/5/resolve", Value::Null);
    let service = AuditService::new(ctx);

    let alerts = service.alerts().await.expect("alerts");
    assert_eq!(alerts[0].kind, "brute_force");
    assert_eq!(alerts[0].user_id.as_deref(), Some("3"));
    assert!(!alerts[0].is_resolved);

    service.stats().await.expect("stats");
    service
      .resolve_alert("5", "admin", Some("false positive"))
      .await
      .expect("resolve");

    assert_eq!(service.cache_stats().expect("stats").size, 0);
    let call = mock.calls().pop().expect("call");
    assert_eq!(call.body.as_ref().expect("body")["resolved_by"], "admin");
    assert_eq!(call.body.as_ref().expect("body")["notes"], "false positive");
  }

  #[tokio::test]
  async fn test_cleanup_reports_deleted_and_clears_cache() {
    let (mock, ctx) = testing::context();
    mock.on_json(Method::Get, "/api/users/audit/stats", json!({"total_logs": 10}));
    mock.on_json(Method::Delete, "/api/users/audit/cleanup", json!({"deleted_count": 7}));
    let service = AuditService::new(ctx);

    service.stats().await.expect("stats");
    let deleted = service.cleanup(30).await.expect("cleanup");

    assert_eq!(deleted.deleted_count, 7);
    assert_eq!(service.cache_stats().expect("stats").size, 0);
    let call = &mock.calls()[1];
    assert_eq!(call.body.as_ref().expect("body")["days_to_keep"], 30);
  }
}
