//! Activity log: what users did and when.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::{CachedService, Resource, ServiceContext};
use crate::cache::{keyed, CacheLayer, QueryKey};
use crate::error::{OperationContext, ServiceResult};
use crate::transport::{to_json, ApiRequest, Method};
use crate::types::{id_string, ExportFormat, LabelCount, Paginated};
use crate::validation::{self, Validation};

/// Activity moves fast, so entries are kept briefly.
pub const ACTIVITY_TTL: Duration = Duration::from_secs(2 * 60);

const BASE: &str = "/api/users/activities";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
  #[serde(deserialize_with = "id_string")]
  pub id: String,
  #[serde(deserialize_with = "id_string")]
  pub user_id: String,
  #[serde(alias = "action")]
  pub activity_type: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub ip_address: Option<String>,
  #[serde(default)]
  pub user_agent: Option<String>,
  #[serde(default)]
  pub metadata: Option<Map<String, Value>>,
  #[serde(default)]
  pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityFilters {
  pub user_id: Option<String>,
  pub activity_type: Option<String>,
  pub date_from: Option<String>,
  pub date_to: Option<String>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewActivity {
  pub user_id: String,
  pub activity_type: String,
  pub description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub metadata: Option<Map<String, Value>>,
}

impl NewActivity {
  pub fn validate(&self) -> Validation {
    validation::required("user_id", &self.user_id, "ID do usuário é obrigatório")?;
    validation::required("activity_type", &self.activity_type, "Tipo de atividade é obrigatório")?;
    validation::required("description", &self.description, "Descrição é obrigatória")?;
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HourCount {
  pub hour: u8,
  pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityStats {
  pub total_activities: u64,
  pub activities_today: u64,
  pub activities_by_type: HashMap<String, u64>,
  pub most_active_users: Vec<LabelCount>,
  pub peak_activity_hours: Vec<HourCount>,
}

enum ActivityKey<'a> {
  List(&'a ActivityFilters),
  Detail(&'a str),
  User(&'a str, &'a ActivityFilters),
  Recent(u32),
  Stats,
  Types,
}

impl QueryKey for ActivityKey<'_> {
  fn cache_key(&self) -> String {
    match self {
      ActivityKey::List(filters) => keyed("activities", filters),
      ActivityKey::Detail(id) => format!("activity:{}", id),
      ActivityKey::User(user_id, filters) => keyed(&format!("user_activities:{}", user_id), filters),
      ActivityKey::Recent(limit) => format!("recent_activities:{}", limit),
      ActivityKey::Stats => "activity_stats".to_string(),
      ActivityKey::Types => "activity_types".to_string(),
    }
  }
}

#[derive(Clone)]
pub struct ActivityService {
  resource: Resource,
}

impl ActivityService {
  pub fn new(ctx: ServiceContext) -> Self {
    Self::with_cache(ctx, CacheLayer::memory(ACTIVITY_TTL))
  }

  pub fn with_cache(ctx: ServiceContext, cache: CacheLayer) -> Self {
    Self {
      resource: Resource::new(ctx, cache, BASE),
    }
  }

  pub async fn list(&self, filters: &ActivityFilters) -> ServiceResult<Paginated<Activity>> {
    const MSG: &str = "Falha ao carregar atividades";
    let request = ApiRequest::new(Method::Get, BASE).query(to_json(filters).op(MSG)?);
    self
      .resource
      .read_page(&ActivityKey::List(filters), request, filters.page, filters.limit, MSG)
      .await
  }

  pub async fn get(&self, id: &str) -> ServiceResult<Activity> {
    let request = ApiRequest::new(Method::Get, self.resource.path(&format!("/{}", id)));
    self
      .resource
      .read_as(&ActivityKey::Detail(id), request, "Falha ao carregar atividade")
      .await
  }

  pub async fn log(&self, activity: &NewActivity) -> ServiceResult<Activity> {
    const MSG: &str = "Falha ao registrar atividade";
    self.resource.validate(|| activity.validate())?;
    let request = ApiRequest::new(Method::Post, BASE).body(to_json(activity).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }

  pub async fn for_user(
    &self,
    user_id: &str,
    filters: &ActivityFilters,
  ) -> ServiceResult<Paginated<Activity>> {
    const MSG: &str = "Falha ao carregar atividades do usuário";
    let request = ApiRequest::new(Method::Get, self.resource.path(&format!("/user/{}", user_id)))
      .query(to_json(filters).op(MSG)?);
    self
      .resource
      .read_page(
        &ActivityKey::User(user_id, filters),
        request,
        filters.page,
        filters.limit,
        MSG,
      )
      .await
  }

  pub async fn recent(&self, limit: u32) -> ServiceResult<Vec<Activity>> {
    let request =
      ApiRequest::new(Method::Get, self.resource.path("/recent")).query(json!({ "limit": limit }));
    self
      .resource
      .read_as(
        &ActivityKey::Recent(limit),
        request,
        "Falha ao carregar atividades recentes",
      )
      .await
  }

  pub async fn stats(&self) -> ServiceResult<ActivityStats> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/stats"));
    self
      .resource
      .read_as(
        &ActivityKey::Stats,
        request,
        "Falha ao obter estatísticas de atividades",
      )
      .await
  }

  pub async fn types(&self) -> ServiceResult<Vec<String>> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/types"));
    self
      .resource
      .read_as(&ActivityKey::Types, request, "Falha ao carregar tipos de atividade")
      .await
  }

  pub async fn export(&self, filters: &ActivityFilters, format: ExportFormat) -> ServiceResult<Vec<u8>> {
    const MSG: &str = "Falha ao exportar atividades";
    let mut query = to_json(filters).op(MSG)?;
    if let Value::Object(map) = &mut query {
      map.insert("format".to_string(), to_json(&format).op(MSG)?);
    }
    self
      .resource
      .download(Method::Get, &self.resource.path("/export"), Some(query), None, MSG)
      .await
  }
}

impl CachedService for ActivityService {
  fn cache(&self) -> &CacheLayer {
    self.resource.cache()
  }
}
