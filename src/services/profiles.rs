//! Public profiles, privacy and notification preferences, follow graph.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::users::User;
use super::{CachedService, Resource, ServiceContext};
use crate::cache::{keyed, CacheLayer, QueryKey};
use crate::error::{OperationContext, ServiceResult, ValidationError};
use crate::transport::{to_json, ApiRequest, Method};
use crate::types::{id_string, Paginated, ValidationReport};
use crate::validation::{self, Validation};

/// Profiles change less often than accounts.
pub const PROFILES_TTL: Duration = Duration::from_secs(10 * 60);

const BASE: &str = "/api/users/profiles";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
  #[serde(deserialize_with = "id_string")]
  pub user_id: String,
  #[serde(default)]
  pub first_name: String,
  #[serde(default)]
  pub last_name: String,
  #[serde(default)]
  pub bio: Option<String>,
  #[serde(default)]
  pub website: Option<String>,
  #[serde(default)]
  pub location: Option<String>,
  #[serde(default)]
  pub date_of_birth: Option<String>,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub avatar: Option<String>,
  #[serde(default)]
  pub cover_image: Option<String>,
  #[serde(default)]
  pub timezone: Option<String>,
  #[serde(default)]
  pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub first_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bio: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub website: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub location: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub date_of_birth: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timezone: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub language: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub social_links: Option<BTreeMap<String, String>>,
}

impl ProfileUpdate {
  pub fn validate(&self) -> Validation {
    if let Some(first_name) = &self.first_name {
      validation::required("first_name", first_name, "Nome deve ter pelo menos 1 caractere")?;
    }
    if let Some(last_name) = &self.last_name {
      validation::required("last_name", last_name, "Sobrenome deve ter pelo menos 1 caractere")?;
    }
    if let Some(bio) = &self.bio {
      validation::max_len("bio", bio, 500, "Bio deve ter no máximo 500 caracteres")?;
    }
    if let Some(website) = &self.website {
      if !validation::is_valid_url(website) {
        return Err(ValidationError::new("website", "Website deve ser uma URL válida"));
      }
    }
    if let Some(phone) = &self.phone {
      validation::phone("phone", phone)?;
    }
    if let Some(date_of_birth) = &self.date_of_birth {
      if validation::parse_date(date_of_birth).is_none() {
        return Err(ValidationError::new("date_of_birth", "Data de nascimento inválida"));
      }
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileStats {
  pub profile_completion: f64,
  pub missing_fields: Vec<String>,
  pub views_count: u64,
  pub followers_count: u64,
  pub following_count: u64,
  pub profile_views_this_month: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
  #[default]
  Public,
  Private,
  Friends,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
  pub profile_visibility: Visibility,
  pub show_email: bool,
  pub show_phone: bool,
  pub show_birthday: bool,
  pub show_location: bool,
  pub show_website: bool,
  pub allow_messages: bool,
  pub allow_follow_requests: bool,
  /// Settings this client does not know about, sent back untouched
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Per-channel toggles, keyed by event name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
  pub email_notifications: BTreeMap<String, bool>,
  pub push_notifications: BTreeMap<String, bool>,
  pub sms_notifications: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublicProfileQuery {
  pub search: Option<String>,
  pub location: Option<String>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PageQuery {
  pub page: Option<u32>,
  pub limit: Option<u32>,
}

enum ProfileKey<'a> {
  Profile(&'a str),
  Stats(&'a str),
  Privacy(&'a str),
  Notifications(&'a str),
  Public(&'a PublicProfileQuery),
  Followers(&'a str, &'a PageQuery),
  Following(&'a str, &'a PageQuery),
}

impl QueryKey for ProfileKey<'_> {
  fn cache_key(&self) -> String {
    match self {
      ProfileKey::Profile(id) => format!("profile:{}", id),
      ProfileKey::Stats(id) => format!("profile_stats:{}", id),
      ProfileKey::Privacy(id) => format!("privacy_settings:{}", id),
      ProfileKey::Notifications(id) => format!("notification_settings:{}", id),
      ProfileKey::Public(query) => keyed("public_profiles", query),
      ProfileKey::Followers(id, page) => keyed(&format!("followers:{}", id), page),
      ProfileKey::Following(id, page) => keyed(&format!("following:{}", id), page),
    }
  }
}

#[derive(Clone)]
pub struct ProfileService {
  resource: Resource,
}

impl ProfileService {
  pub fn new(ctx: ServiceContext) -> Self {
    Self::with_cache(ctx, CacheLayer::memory(PROFILES_TTL))
  }

  pub fn with_cache(ctx: ServiceContext, cache: CacheLayer) -> Self {
    Self {
      resource: Resource::new(ctx, cache, BASE),
    }
  }

  fn user_path(&self, user_id: &str, suffix: &str) -> String {
    self.resource.path(&format!("/{}{}", user_id, suffix))
  }

  pub async fn get(&self, user_id: &str) -> ServiceResult<UserProfile> {
    let request = ApiRequest::new(Method::Get, self.user_path(user_id, ""));
    self
      .resource
      .read_as(&ProfileKey::Profile(user_id), request, "Falha ao carregar perfil")
      .await
  }

  pub async fn update(&self, user_id: &str, update: &ProfileUpdate) -> ServiceResult<UserProfile> {
    const MSG: &str = "Falha ao atualizar perfil";
    self.resource.validate(|| update.validate())?;
    let request = ApiRequest::new(Method::Put, self.user_path(user_id, "")).body(to_json(update).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }

  pub async fn remove_avatar(&self, user_id: &str) -> ServiceResult<()> {
    let request = ApiRequest::new(Method::Delete, self.user_path(user_id, "/avatar"));
    self.resource.write(request, "Falha ao remover avatar").await?;
    Ok(())
  }

  pub async fn remove_cover(&self, user_id: &str) -> ServiceResult<()> {
    let request = ApiRequest::new(Method::Delete, self.user_path(user_id, "/cover"));
    self.resource.write(request, "Falha ao remover cover").await?;
    Ok(())
  }

  pub async fn stats(&self, user_id: &str) -> ServiceResult<ProfileStats> {
    let request = ApiRequest::new(Method::Get, self.user_path(user_id, "/stats"));
    self
      .resource
      .read_as(
        &ProfileKey::Stats(user_id),
        request,
        "Falha ao obter estatísticas do perfil",
      )
      .await
  }

  pub async fn validate_profile(&self, user_id: &str) -> ServiceResult<ValidationReport> {
    let request = ApiRequest::new(Method::Post, self.user_path(user_id, "/validate"));
    self.resource.call_as(request, "Falha ao validar perfil").await
  }

  pub async fn privacy_settings(&self, user_id: &str) -> ServiceResult<PrivacySettings> {
    let request = ApiRequest::new(Method::Get, self.user_path(user_id, "/privacy"));
    self
      .resource
      .read_as(
        &ProfileKey::Privacy(user_id),
        request,
        "Falha ao obter configurações de privacidade",
      )
      .await
  }

  pub async fn update_privacy_settings(
    &self,
    user_id: &str,
    settings: &PrivacySettings,
  ) -> ServiceResult<PrivacySettings> {
    const MSG: &str = "Falha ao atualizar configurações de privacidade";
    let request =
      ApiRequest::new(Method::Put, self.user_path(user_id, "/privacy")).body(to_json(settings).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }

  pub async fn notification_settings(&self, user_id: &str) -> ServiceResult<NotificationSettings> {
    let request = ApiRequest::new(Method::Get, self.user_path(user_id, "/notifications"));
    self
      .resource
      .read_as(
        &ProfileKey::Notifications(user_id),
        request,
        "Falha ao obter configurações de notificações",
      )
      .await
  }

  pub async fn update_notification_settings(
    &self,
    user_id: &str,
    settings: &NotificationSettings,
  ) -> ServiceResult<NotificationSettings> {
    const MSG: &str = "Falha ao atualizar configurações de notificações";
    let request = ApiRequest::new(Method::Put, self.user_path(user_id, "/notifications"))
      .body(to_json(settings).op(MSG)?);
    self.resource.write_as(request, MSG).await
  }

  pub async fn search_public(&self, query: &PublicProfileQuery) -> ServiceResult<Paginated<UserProfile>> {
    const MSG: &str = "Falha ao buscar perfis públicos";
    let request = ApiRequest::new(Method::Get, self.resource.path("/public")).query(to_json(query).op(MSG)?);
    self
      .resource
      .read_page(&ProfileKey::Public(query), request, query.page, query.limit, MSG)
      .await
  }

  pub async fn follow(&self, user_id: &str, target_user_id: &str) -> ServiceResult<()> {
    let request = ApiRequest::new(Method::Post, self.user_path(user_id, "/follow"))
      .body(json!({ "target_user_id": target_user_id }));
    self.resource.write(request, "Falha ao seguir usuário").await?;
    Ok(())
  }

  pub async fn unfollow(&self, user_id: &str, target_user_id: &str) -> ServiceResult<()> {
    let request = ApiRequest::new(
      Method::Delete,
      self.user_path(user_id, &format!("/follow/{}", target_user_id)),
    );
    self
      .resource
      .write(request, "Falha ao deixar de seguir usuário")
      .await?;
    Ok(())
  }

  pub async fn followers(&self, user_id: &str, page: &PageQuery) -> ServiceResult<Paginated<User>> {
    const MSG: &str = "Falha ao obter seguidores";
    let request =
      ApiRequest::new(Method::Get, self.user_path(user_id, "/followers")).query(to_json(page).op(MSG)?);
    self
      .resource
      .read_page(&ProfileKey::Followers(user_id, page), request, page.page, page.limit, MSG)
      .await
  }

  pub async fn following(&self, user_id: &str, page: &PageQuery) -> ServiceResult<Paginated<User>> {
    const MSG: &str = "Falha ao obter usuários seguidos";
    let request =
      ApiRequest::new(Method::Get, self.user_path(user_id, "/following")).query(to_json(page).op(MSG)?);
    self
      .resource
      .read_page(&ProfileKey::Following(user_id, page), request, page.page, page.limit, MSG)
      .await
  }

  /// Never fails: any error reads as "not following".
  pub async fn is_following(&self, user_id: &str, target_user_id: &str) -> bool {
    let path = self.user_path(user_id, &format!("/following/{}", target_user_id));
    match self.resource.ctx().client().get(&path, None).await {
      Ok(raw) => raw
        .get("is_following")
        .and_then(Value::as_bool)
        .unwrap_or(false),
      Err(err) => {
        tracing::debug!(error = %err, "follow check failed, assuming not following");
        false
      }
    }
  }
}

impl CachedService for ProfileService {
  fn cache(&self) -> &CacheLayer {
    self.resource.cache()
  }
}
