//! Roles, permissions and their assignment to users.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::users::User;
use super::{CachedService, Resource, ServiceContext};
use crate::cache::{CacheLayer, QueryKey};
use crate::error::{OperationContext, ServiceResult, ValidationError};
use crate::transport::{from_json, to_json, ApiRequest, Method};
use crate::types::{id_string, LabelCount, ValidationReport};
use crate::validation::{self, Validation};

/// Roles rarely change.
pub const ROLES_TTL: Duration = Duration::from_secs(15 * 60);

const BASE: &str = "/api/users/roles";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
  #[serde(deserialize_with = "id_string")]
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub display_name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub permissions: Vec<String>,
  #[serde(default)]
  pub is_system_role: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
  #[serde(deserialize_with = "id_string")]
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub display_name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignment {
  #[serde(deserialize_with = "id_string")]
  pub user_id: String,
  #[serde(deserialize_with = "id_string")]
  pub role_id: String,
  #[serde(default)]
  pub assigned_by: Option<String>,
  #[serde(default)]
  pub assigned_at: Option<String>,
  #[serde(default)]
  pub expires_at: Option<String>,
  #[serde(default)]
  pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewRole {
  pub name: String,
  pub display_name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub permissions: Vec<String>,
}

impl NewRole {
  pub fn validate(&self) -> Validation {
    validation::min_trimmed("name", &self.name, 2, "Nome da role deve ter pelo menos 2 caracteres")?;
    validation::min_trimmed(
      "display_name",
      &self.display_name,
      2,
      "Nome de exibição da role deve ter pelo menos 2 caracteres",
    )?;
    if let Some(description) = &self.description {
      validation::max_len(
        "description",
        description,
        500,
        "Descrição deve ter no máximo 500 caracteres",
      )?;
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoleUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub display_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub permissions: Option<Vec<String>>,
}

impl RoleUpdate {
  pub fn validate(&self) -> Validation {
    if let Some(display_name) = &self.display_name {
      validation::min_trimmed(
        "display_name",
        display_name,
        2,
        "Nome de exibição da role deve ter pelo menos 2 caracteres",
      )?;
    }
    if let Some(description) = &self.description {
      validation::max_len(
        "description",
        description,
        500,
        "Descrição deve ter no máximo 500 caracteres",
      )?;
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleStats {
  pub total_roles: u64,
  pub system_roles: u64,
  pub custom_roles: u64,
  pub users_by_role: HashMap<String, u64>,
  pub permissions_by_role: HashMap<String, u64>,
  pub most_used_roles: Vec<LabelCount>,
  pub least_used_roles: Vec<LabelCount>,
}

/// Why a user does or does not hold a permission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionCheck {
  pub has_permission: bool,
  pub granted_by: Vec<String>,
  pub denied_by: Vec<String>,
  pub reason: Option<String>,
}

fn role_selection(user_id: &str, role_ids: &[String]) -> Validation {
  validation::required("user_id", user_id, "ID do usuário é obrigatório")?;
  if role_ids.is_empty() {
    return Err(ValidationError::new("role_ids", "Informe ao menos uma role"));
  }
  Ok(())
}

enum RoleKey<'a> {
  All,
  Detail(&'a str),
  Permissions,
  PermissionsByCategory,
  UserRoles(&'a str),
  UserPermissions(&'a str),
  RoleUsers(&'a str),
  PermissionUsers(&'a str),
  Stats,
}

impl QueryKey for RoleKey<'_> {
  fn cache_key(&self) -> String {
    match self {
      RoleKey::All => "all_roles".to_string(),
      RoleKey::Detail(id) => format!("role:{}", id),
      RoleKey::Permissions => "all_permissions".to_string(),
      RoleKey::PermissionsByCategory => "permissions_by_category".to_string(),
      RoleKey::UserRoles(user_id) => format!("user_roles:{}", user_id),
      RoleKey::UserPermissions(user_id) => format!("user_permissions:{}", user_id),
      RoleKey::RoleUsers(role_id) => format!("users_by_role:{}", role_id),
      RoleKey::PermissionUsers(permission) => format!("users_by_permission:{}", permission),
      RoleKey::Stats => "role_stats".to_string(),
    }
  }
}

#[derive(Clone)]
pub struct RoleService {
  resource: Resource,
}

impl RoleService {
  pub fn new(ctx: ServiceContext) -> Self {
    Self::with_cache(ctx, CacheLayer::memory(ROLES_TTL))
  }

  pub fn with_cache(ctx: ServiceContext, cache: CacheLayer) -> Self {
    Self {
      resource: Resource::new(ctx, cache, BASE),
    }
  }

  pub async fn list(&self) -> ServiceResult<Vec<Role>> {
    let request = ApiRequest::new(Method::Get, BASE);
    self
      .resource
      .read_as(&RoleKey::All, request, "Falha ao carregar roles")
      .await
  }

  pub async fn get(&self, id: &str) -> ServiceResult<Role> {
    let request = ApiRequest::new(Method::Get, self.resource.path(&format!("/{}", id)));
    self
      .resource
      .read_as(&RoleKey::Detail(id), request, "Falha ao carregar role")
      .await
  }

  pub async fn create(&self, role: &NewRole) -> ServiceResult<Role> {
    const MSG: &str = "Falha ao criar role";
    self.resource.validate(|| role.validate())?;
    let request = ApiRequest::new(Method::Post, BASE).body(to_json(role).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }

  pub async fn update(&self, id: &str, update: &RoleUpdate) -> ServiceResult<Role> {
    const MSG: &str = "Falha ao atualizar role";
    self.resource.validate(|| update.validate())?;
    let request =
      ApiRequest::new(Method::Put, self.resource.path(&format!("/{}", id))).body(to_json(update).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }

  pub async fn delete(&self, id: &str) -> ServiceResult<()> {
    let request = ApiRequest::new(Method::Delete, self.resource.path(&format!("/{}", id)));
    self.resource.write(request, "Falha ao remover role").await?;
    Ok(())
  }

  /// Copy a role as `<name>_copy` with the same permissions.
  pub async fn duplicate(&self, id: &str) -> ServiceResult<Role> {
    let original = self.get(id).await?;
    let copy = NewRole {
      name: format!("{}_copy", original.name),
      display_name: format!("{} (Copy)", original.display_name),
      description: original.description,
      permissions: original.permissions,
    };
    self.create(&copy).await
  }

  pub async fn validate_role(&self, role: &NewRole) -> ServiceResult<ValidationReport> {
    const MSG: &str = "Falha ao validar role";
    let request = ApiRequest::new(Method::Post, self.resource.path("/validate")).body(to_json(role).op(MSG)?);
    self.resource.call_as(request, MSG).await
  }

  pub async fn permissions(&self) -> ServiceResult<Vec<Permission>> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/permissions"));
    self
      .resource
      .read_as(&RoleKey::Permissions, request, "Falha ao carregar permissões")
      .await
  }

  /// Permissions grouped by their category, derived from [`permissions`](Self::permissions).
  pub async fn permissions_by_category(&self) -> ServiceResult<BTreeMap<String, Vec<Permission>>> {
    const MSG: &str = "Falha ao carregar permissões por categoria";
    let cache = self.resource.cache();
    if let Some(cached) = cache.get(&RoleKey::PermissionsByCategory) {
      return from_json(cached).op(MSG);
    }

    let mut grouped: BTreeMap<String, Vec<Permission>> = BTreeMap::new();
    for permission in self.permissions().await? {
      grouped
        .entry(permission.category.clone())
        .or_default()
        .push(permission);
    }
    cache.set(&RoleKey::PermissionsByCategory, to_json(&grouped).op(MSG)?);
    Ok(grouped)
  }

  pub async fn assign(
    &self,
    user_id: &str,
    role_id: &str,
    expires_at: Option<&str>,
  ) -> ServiceResult<RoleAssignment> {
    let request = ApiRequest::new(Method::Post, self.resource.path("/assign")).body(json!({
      "user_id": user_id,
      "role_id": role_id,
      "expires_at": expires_at,
    }));
    self.resource.write_as(request, "Falha ao atribuir role").await
  }

  pub async fn remove(&self, user_id: &str, role_id: &str) -> ServiceResult<()> {
    let request = ApiRequest::new(Method::Delete, self.resource.path("/assign"))
      .body(json!({ "user_id": user_id, "role_id": role_id }));
    self.resource.write(request, "Falha ao remover role").await?;
    Ok(())
  }

  pub async fn user_roles(&self, user_id: &str) -> ServiceResult<Vec<Role>> {
    let request = ApiRequest::new(Method::Get, self.resource.path(&format!("/user/{}", user_id)));
    self
      .resource
      .read_as(
        &RoleKey::UserRoles(user_id),
        request,
        "Falha ao carregar roles do usuário",
      )
      .await
  }

  pub async fn user_permissions(&self, user_id: &str) -> ServiceResult<Vec<Permission>> {
    let request = ApiRequest::new(
      Method::Get,
      self.resource.path(&format!("/user/{}/permissions", user_id)),
    );
    self
      .resource
      .read_as(
        &RoleKey::UserPermissions(user_id),
        request,
        "Falha ao carregar permissões do usuário",
      )
      .await
  }

  pub async fn role_users(&self, role_id: &str) -> ServiceResult<Vec<User>> {
    let request = ApiRequest::new(Method::Get, self.resource.path(&format!("/{}/users", role_id)));
    self
      .resource
      .read_as(
        &RoleKey::RoleUsers(role_id),
        request,
        "Falha ao obter usuários da role",
      )
      .await
  }

  /// Never fails: any error reads as "no".
  pub async fn has_permission(&self, user_id: &str, permission: &str) -> bool {
    let path = self
      .resource
      .path(&format!("/user/{}/permission/{}", user_id, permission));
    self.flag(&path, "has_permission").await
  }

  /// Never fails: any error reads as "no".
  pub async fn has_role(&self, user_id: &str, role: &str) -> bool {
    let path = self.resource.path(&format!("/user/{}/role/{}", user_id, role));
    self.flag(&path, "has_role").await
  }

  async fn flag(&self, path: &str, field: &str) -> bool {
    match self.resource.ctx().client().get(path, None).await {
      Ok(raw) => raw.get(field).and_then(Value::as_bool).unwrap_or(false),
      Err(err) => {
        tracing::debug!(error = %err, path, "check failed, answering no");
        false
      }
    }
  }

  /// Check several permissions at once; the answer maps each name to a verdict.
  pub async fn check_permissions(
    &self,
    user_id: &str,
    permissions: &[String],
  ) -> ServiceResult<HashMap<String, bool>> {
    let request = ApiRequest::new(
      Method::Post,
      self.resource.path(&format!("/user/{}/permissions/check", user_id)),
    )
    .body(json!({ "permissions": permissions }));
    self
      .resource
      .call_as(request, "Falha ao verificar permissões")
      .await
  }

  /// Check several roles at once; the answer maps each role to a verdict.
  pub async fn check_roles(&self, user_id: &str, roles: &[String]) -> ServiceResult<HashMap<String, bool>> {
    let request = ApiRequest::new(
      Method::Post,
      self.resource.path(&format!("/user/{}/roles/check", user_id)),
    )
    .body(json!({ "roles": roles }));
    self.resource.call_as(request, "Falha ao verificar roles").await
  }

  pub async fn permission_check(&self, user_id: &str, permission: &str) -> ServiceResult<PermissionCheck> {
    let request = ApiRequest::new(
      Method::Get,
      self
        .resource
        .path(&format!("/user/{}/permission/{}/details", user_id, permission)),
    );
    self
      .resource
      .call_as(request, "Falha ao obter detalhes da permissão")
      .await
  }

  pub async fn permission_users(&self, permission: &str) -> ServiceResult<Vec<User>> {
    let request = ApiRequest::new(
      Method::Get,
      self.resource.path(&format!("/permission/{}/users", permission)),
    );
    self
      .resource
      .read_as(
        &RoleKey::PermissionUsers(permission),
        request,
        "Falha ao obter usuários da permissão",
      )
      .await
  }

  pub async fn assign_many(&self, user_id: &str, role_ids: &[String]) -> ServiceResult<Vec<RoleAssignment>> {
    self.resource.validate(|| role_selection(user_id, role_ids))?;
    let request = ApiRequest::new(Method::Post, self.resource.path("/assign-multiple"))
      .body(json!({ "user_id": user_id, "role_ids": role_ids }));
    self
      .resource
      .write_as(request, "Falha ao atribuir múltiplas roles")
      .await
  }

  pub async fn remove_many(&self, user_id: &str, role_ids: &[String]) -> ServiceResult<()> {
    self.resource.validate(|| role_selection(user_id, role_ids))?;
    let request = ApiRequest::new(Method::Delete, self.resource.path("/assign-multiple"))
      .body(json!({ "user_id": user_id, "role_ids": role_ids }));
    self
      .resource
      .write(request, "Falha ao remover múltiplas roles")
      .await?;
    Ok(())
  }

  pub async fn stats(&self) -> ServiceResult<RoleStats> {
    let request = ApiRequest::new(Method::Get, self.resource.path("/stats"));
    self
      .resource
      .read_as(&RoleKey::Stats, request, "Falha ao obter estatísticas de roles")
      .await
  }
}

impl CachedService for RoleService {
  fn cache(&self) -> &CacheLayer {
    self.resource.cache()
  }
}
