//! User accounts: CRUD, status transitions and lookups.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::{CachedService, Resource, ServiceContext};
use crate::cache::{keyed, CacheLayer, QueryKey};
use crate::error::{OperationContext, ServiceResult};
use crate::transport::{to_json, ApiRequest, Method};
use crate::types::{id_string, ExportFormat, Paginated, SortOrder, ValidationReport};
use crate::validation::{self, Validation};

pub const USERS_TTL: Duration = Duration::from_secs(5 * 60);

const BASE: &str = "/api/users";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
  Active,
  Inactive,
  Suspended,
  Pending,
}

impl UserStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      UserStatus::Active => "active",
      UserStatus::Inactive => "inactive",
      UserStatus::Suspended => "suspended",
      UserStatus::Pending => "pending",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  #[serde(deserialize_with = "id_string")]
  pub id: String,
  pub name: String,
  pub email: String,
  pub status: UserStatus,
  #[serde(default)]
  pub role: String,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub avatar_url: Option<String>,
  #[serde(default)]
  pub last_login_at: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

/// Listing filters. Every field takes part in the cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserFilters {
  pub search: Option<String>,
  pub role: Option<String>,
  pub status: Option<UserStatus>,
  pub date_from: Option<String>,
  pub date_to: Option<String>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
  pub sort_by: Option<String>,
  pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewUser {
  pub name: String,
  pub email: String,
  pub password: String,
  pub role: Option<String>,
  pub status: Option<UserStatus>,
  pub phone: Option<String>,
}

impl NewUser {
  pub fn validate(&self) -> Validation {
    validation::min_trimmed("name", &self.name, 2, "Nome deve ter pelo menos 2 caracteres")?;
    validation::email("email", &self.email)?;
    if self.password.chars().count() < 8 {
      return Err(crate::error::ValidationError::new(
        "password",
        "Senha deve ter pelo menos 8 caracteres",
      ));
    }
    if let Some(phone) = &self.phone {
      validation::phone("phone", phone)?;
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<UserStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
}

impl UserUpdate {
  pub fn validate(&self) -> Validation {
    if let Some(name) = &self.name {
      validation::min_trimmed("name", name, 2, "Nome deve ter pelo menos 2 caracteres")?;
    }
    if let Some(email) = &self.email {
      validation::email("email", email)?;
    }
    if let Some(phone) = &self.phone {
      validation::phone("phone", phone)?;
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserStats {
  pub total_users: u64,
  pub active_users: u64,
  pub inactive_users: u64,
  pub suspended_users: u64,
  pub pending_users: u64,
  pub new_users_today: u64,
  pub new_users_this_month: u64,
  pub users_growth_rate: f64,
  pub users_by_role: HashMap<String, u64>,
}

enum UserKey<'a> {
  List(&'a UserFilters),
  Detail(&'a str),
  Stats,
}

impl QueryKey for UserKey<'_> {
  fn cache_key(&self) -> String {
    match self {
      UserKey::List(filters) => keyed("users", filters),
      UserKey::Detail(id) => format!("user:{}", id),
      UserKey::Stats => "user_stats".to_string(),
    }
  }
}

#[derive(Clone)]
pub struct UserService {
  resource: Resource,
}

impl UserService {
  pub fn new(ctx: ServiceContext) -> Self {
    Self::with_cache(ctx, CacheLayer::memory(USERS_TTL))
  }

  pub fn with_cache(ctx: ServiceContext, cache: CacheLayer) -> Self {
    Self {
      resource: Resource::new(ctx, cache, BASE),
    }
  }

  pub async fn list(&self, filters: &UserFilters) -> ServiceResult<Paginated<User>> {
    const MSG: &str = "Falha ao carregar usuários";
    let request = ApiRequest::new(Method::Get, BASE).query(to_json(filters).op(MSG)?);
    self
      .resource
      .read_page(&UserKey::List(filters), request, filters.page, filters.limit, MSG)
      .await
  }

  pub async fn get(&self, id: &str) -> ServiceResult<User> {
    let request = ApiRequest::new(Method::Get, self.resource.path(&format!("/{}", id)));
    self
      .resource
      .read_as(&UserKey::Detail(id), request, "Falha ao carregar usuário")
      .await
  }

  pub async fn create(&self, user: &NewUser) -> ServiceResult<User> {
    const MSG: &str = "Falha ao criar usuário";
    self.resource.validate(|| user.validate())?;
    let request = ApiRequest::new(Method::Post, BASE).body(to_json(user).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }

  pub async fn update(&self, id: &str, update: &UserUpdate) -> ServiceResult<User> {
    const MSG: &str = "Falha ao atualizar usuário";
    self.resource.validate(|| update.validate())?;
    let request =
      ApiRequest::new(Method::Put, self.resource.path(&format!("/{}", id))).body(to_json(update).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }

  pub async fn delete(&self, id: &str) -> ServiceResult<()> {
    let request = ApiRequest::new(Method::Delete, self.resource.path(&format!("/{}", id)));
    self.resource.write(request, "Falha ao remover usuário").await?;
    Ok(())
  }

  pub async fn activate(&self, id: &str) -> ServiceResult<User> {
    self.transition(id, "activate", None, "Falha ao ativar usuário").await
  }

  pub async fn deactivate(&self, id: &str) -> ServiceResult<User> {
    self.transition(id, "deactivate", None, "Falha ao desativar usuário").await
  }

  pub async fn suspend(&self, id: &str, reason: Option<&str>) -> ServiceResult<User> {
    let body = json!({ "reason": reason });
    self
      .transition(id, "suspend", Some(body), "Falha ao suspender usuário")
      .await
  }

  pub async fn unsuspend(&self, id: &str) -> ServiceResult<User> {
    self
      .transition(id, "unsuspend", None, "Falha ao remover suspensão do usuário")
      .await
  }

  async fn transition(
    &self,
    id: &str,
    action: &str,
    body: Option<Value>,
    message: &'static str,
  ) -> ServiceResult<User> {
    let mut request = ApiRequest::new(Method::Patch, self.resource.path(&format!("/{}/{}", id, action)));
    request.body = body;
    self.resource.write_as(request, message).await
  }

  pub async fn stats(&self) -> ServiceResult<UserStats> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/stats"));
    self
      .resource
      .read_as(&UserKey::Stats, request, "Falha ao obter estatísticas de usuários")
      .await
  }

  /// Ask the server to validate a payload without creating anything.
  pub async fn validate_user(&self, user: &NewUser) -> ServiceResult<ValidationReport> {
    const MSG: &str = "Falha ao validar usuário";
    let request = ApiRequest::new(Method::Post, self.resource.path("/validate")).body(to_json(user).op(MSG)?);
    self.resource.call_as(request, MSG).await
  }

  /// `None` when the server answers 404.
  pub async fn find_by_email(&self, email: &str) -> ServiceResult<Option<User>> {
    const MSG: &str = "Falha ao buscar usuário por email";
    let request =
      ApiRequest::new(Method::Get, self.resource.path("/by-email")).query(json!({ "email": email }));
    match self.resource.ctx().client().send_json(request).await {
      Ok(raw) => crate::transport::from_json(raw).map(Some).op(MSG),
      Err(err) if err.is_not_found() => Ok(None),
      Err(err) => Err(err).op(MSG),
    }
  }

  pub async fn by_role(&self, role: &str) -> ServiceResult<Vec<User>> {
    let filters = UserFilters {
      role: Some(role.to_string()),
      limit: Some(1000),
      ..Default::default()
    };
    Ok(self.list(&filters).await?.data)
  }

  pub async fn by_status(&self, status: UserStatus) -> ServiceResult<Vec<User>> {
    let filters = UserFilters {
      status: Some(status),
      limit: Some(1000),
      ..Default::default()
    };
    Ok(self.list(&filters).await?.data)
  }

  /// Create an inactive copy of an existing user under a derived name and
  /// email.
  pub async fn duplicate(&self, id: &str, password: &str) -> ServiceResult<User> {
    let original = self.get(id).await?;
    let copy = NewUser {
      name: format!("{} (Copy)", original.name),
      email: format!("copy_{}", original.email),
      password: password.to_string(),
      role: Some(original.role),
      status: Some(UserStatus::Inactive),
      phone: original.phone,
    };
    self.create(&copy).await
  }

  pub async fn export(&self, filters: &UserFilters, format: ExportFormat) -> ServiceResult<Vec<u8>> {
    const MSG: &str = "Falha ao exportar usuários";
    let mut body = to_json(filters).op(MSG)?;
    if let Value::Object(map) = &mut body {
      map.insert("format".to_string(), to_json(&format).op(MSG)?);
    }
    self
      .resource
      .download(Method::Post, &self.resource.path("/export"), None, Some(body), MSG)
      .await
  }
}

impl CachedService for UserService {
  fn cache(&self) -> &CacheLayer {
    self.resource.cache()
  }
}
