//! Single entry point over every user-administration service.
//!
//! The facade owns one instance of each service, wires their caches
//! together and adds the cross-service operations: aggregated statistics,
//! health reporting, full sync and periodic auto-sync.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use crate::cache::{CacheError, CacheLayer, CacheStats};
use crate::config::{Config, ConfigUpdate};
use crate::error::{ServiceError, ServiceResult};
use crate::retry::RetryPolicy;
use crate::scheduler::{BulkPoller, ScheduledTask};
use crate::services::activity::{HourCount, ACTIVITY_TTL};
use crate::services::audit::AUDIT_TTL;
use crate::services::bulk::BULK_TTL;
use crate::services::notifications::NOTIFICATIONS_TTL;
use crate::services::profiles::PROFILES_TTL;
use crate::services::roles::ROLES_TTL;
use crate::services::stats::{StatsParams, STATS_TTL};
use crate::services::users::USERS_TTL;
use crate::services::{
  cache_for, ActivityService, AuditService, BulkService, CachedService, NotificationService,
  ProfileService, RoleService, ServiceContext, StatsService, UserService,
};
use crate::transport::{ApiClient, HttpTransport, ReqwestTransport};
use crate::types::LabelCount;

const GLOBAL_STATS_MSG: &str = "Falha ao obter estatísticas globais";

/// Profile statistics are requested for this pseudo user id when
/// aggregating.
const GLOBAL_PROFILE: &str = "global";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsersSummary {
  pub total_users: u64,
  pub active_users: u64,
  pub inactive_users: u64,
  pub suspended_users: u64,
  pub pending_users: u64,
  pub new_users_today: u64,
  pub users_growth_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfilesSummary {
  pub average_completion_rate: f64,
  pub views_count: u64,
  pub followers_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RolesSummary {
  pub total_roles: u64,
  pub system_roles: u64,
  pub custom_roles: u64,
  pub most_used_roles: Vec<LabelCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivitySummary {
  pub total_activities: u64,
  pub activities_today: u64,
  pub most_active_users: Vec<LabelCount>,
  pub peak_activity_hours: Vec<HourCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationsSummary {
  pub total_notifications: u64,
  pub unread_notifications: u64,
  pub notifications_today: u64,
  pub average_read_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeneralSummary {
  pub total_users: u64,
  pub new_users_this_week: u64,
  pub average_session_duration: f64,
  pub users_by_status: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkSummary {
  pub total_operations: u64,
  pub successful_operations: u64,
  pub failed_operations: u64,
  pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditSummary {
  pub total_logs: u64,
  pub logs_today: u64,
  pub most_audited_resources: Vec<LabelCount>,
}

/// Every service's statistics, reshaped into one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalStats {
  pub users: UsersSummary,
  pub profiles: ProfilesSummary,
  pub roles: RolesSummary,
  pub activities: ActivitySummary,
  pub notifications: NotificationsSummary,
  pub general: GeneralSummary,
  pub bulk_operations: BulkSummary,
  pub audit: AuditSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
  Healthy,
  Warning,
  Error,
}

impl HealthState {
  fn of(probe: &Result<CacheStats, CacheError>, max_size: usize) -> Self {
    match probe {
      Ok(stats) if stats.size > max_size => HealthState::Warning,
      Ok(_) => HealthState::Healthy,
      Err(_) => HealthState::Error,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
  pub status: HealthState,
  pub services: BTreeMap<&'static str, HealthState>,
  pub message: String,
  pub timestamp: DateTime<Utc>,
}

impl HealthReport {
  fn from_services(services: BTreeMap<&'static str, HealthState>) -> Self {
    let status = services
      .values()
      .copied()
      .max()
      .unwrap_or(HealthState::Healthy);
    let message = match status {
      HealthState::Healthy => "Todos os services estão funcionando normalmente",
      _ => "Alguns services apresentam problemas",
    };
    Self {
      status,
      services,
      message: message.to_string(),
      timestamp: Utc::now(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
  pub success: bool,
  pub message: String,
  pub synced: Vec<&'static str>,
  pub errors: Vec<String>,
}

struct Inner {
  config: RwLock<Config>,
  ctx: ServiceContext,
  users: UserService,
  profiles: ProfileService,
  roles: RoleService,
  activity: ActivityService,
  notifications: NotificationService,
  stats: StatsService,
  bulk: BulkService,
  audit: AuditService,
}

/// Cheaply cloneable; clones share services, caches and configuration.
#[derive(Clone)]
pub struct UsersFacade {
  inner: Arc<Inner>,
}

impl UsersFacade {
  pub fn new(config: Config, transport: Arc<dyn HttpTransport>) -> Self {
    let ctx = ServiceContext::from_config(ApiClient::new(transport), &config);
    let cache = |ttl| cache_for(&config.cache, ttl);

    let users = UserService::with_cache(ctx.clone(), cache(USERS_TTL));
    let bulk = BulkService::with_cache(ctx.clone(), cache(BULK_TTL))
      .with_linked_cache(users.cache().clone());

    let inner = Inner {
      profiles: ProfileService::with_cache(ctx.clone(), cache(PROFILES_TTL)),
      roles: RoleService::with_cache(ctx.clone(), cache(ROLES_TTL)),
      activity: ActivityService::with_cache(ctx.clone(), cache(ACTIVITY_TTL)),
      notifications: NotificationService::with_cache(ctx.clone(), cache(NOTIFICATIONS_TTL)),
      stats: StatsService::with_cache(ctx.clone(), cache(STATS_TTL)),
      audit: AuditService::with_cache(ctx.clone(), cache(AUDIT_TTL)),
      users,
      bulk,
      ctx,
      config: RwLock::new(config),
    };
    Self {
      inner: Arc::new(inner),
    }
  }

  /// Facade over HTTP, authenticated with the token from the environment
  /// when one is set.
  pub fn from_config(config: Config) -> color_eyre::Result<Self> {
    let transport = ReqwestTransport::from_config(&config)?;
    Ok(Self::new(config, Arc::new(transport)))
  }

  pub fn users(&self) -> &UserService {
    &self.inner.users
  }

  pub fn profiles(&self) -> &ProfileService {
    &self.inner.profiles
  }

  pub fn roles(&self) -> &RoleService {
    &self.inner.roles
  }

  pub fn activity(&self) -> &ActivityService {
    &self.inner.activity
  }

  pub fn notifications(&self) -> &NotificationService {
    &self.inner.notifications
  }

  pub fn stats(&self) -> &StatsService {
    &self.inner.stats
  }

  pub fn bulk(&self) -> &BulkService {
    &self.inner.bulk
  }

  pub fn audit(&self) -> &AuditService {
    &self.inner.audit
  }

  // Configuration

  /// Replace the given sections. Validation and batch limits apply to
  /// the running services at once; `cache.enabled` only applies to
  /// facades built afterwards.
  pub fn configure(&self, update: ConfigUpdate) {
    let mut config = self
      .inner
      .config
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    config.apply(update);
    self.inner.ctx.apply(&config);
    info!(
      strict = config.validation.strict_mode,
      max_batch = config.bulk_operations.max_batch_size,
      "configuration updated"
    );
  }

  pub fn get_config(&self) -> Config {
    self
      .inner
      .config
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn caches(&self) -> [(&'static str, &CacheLayer); 8] {
    let inner = &self.inner;
    [
      ("users", inner.users.cache()),
      ("profiles", inner.profiles.cache()),
      ("roles", inner.roles.cache()),
      ("activity", inner.activity.cache()),
      ("notifications", inner.notifications.cache()),
      ("stats", inner.stats.cache()),
      ("bulk", inner.bulk.cache()),
      ("audit", inner.audit.cache()),
    ]
  }

  // Statistics

  /// All services' statistics at once. Any failing source fails the whole
  /// call; the attempt is retried per the `retry` configuration.
  pub async fn get_global_stats(&self) -> ServiceResult<GlobalStats> {
    let policy = RetryPolicy::from(&self.get_config().retry);
    policy
      .execute(move || self.collect_global_stats())
      .await
      .map_err(|err| match err {
        ServiceError::Operation { source, .. } => ServiceError::operation(GLOBAL_STATS_MSG, source),
        other => other,
      })
  }

  async fn collect_global_stats(&self) -> ServiceResult<GlobalStats> {
    let inner = &self.inner;
    let general_params = StatsParams::default();
    let (users, profiles, roles, activity, notifications, general, bulk, audit) = futures::try_join!(
      inner.users.stats(),
      inner.profiles.stats(GLOBAL_PROFILE),
      inner.roles.stats(),
      inner.activity.stats(),
      inner.notifications.stats(),
      inner.stats.general(&general_params),
      inner.bulk.stats(),
      inner.audit.stats()
    )?;

    Ok(GlobalStats {
      users: UsersSummary {
        total_users: users.total_users,
        active_users: users.active_users,
        inactive_users: users.inactive_users,
        suspended_users: users.suspended_users,
        pending_users: users.pending_users,
        new_users_today: users.new_users_today,
        users_growth_rate: users.users_growth_rate,
      },
      profiles: ProfilesSummary {
        average_completion_rate: profiles.profile_completion,
        views_count: profiles.views_count,
        followers_count: profiles.followers_count,
      },
      roles: RolesSummary {
        total_roles: roles.total_roles,
        system_roles: roles.system_roles,
        custom_roles: roles.custom_roles,
        most_used_roles: roles.most_used_roles,
      },
      activities: ActivitySummary {
        total_activities: activity.total_activities,
        activities_today: activity.activities_today,
        most_active_users: activity.most_active_users,
        peak_activity_hours: activity.peak_activity_hours,
      },
      notifications: NotificationsSummary {
        total_notifications: notifications.total_notifications,
        unread_notifications: notifications.unread_notifications,
        notifications_today: notifications.notifications_today,
        average_read_time: notifications.average_read_time,
      },
      general: GeneralSummary {
        total_users: general.total_users,
        new_users_this_week: general.new_users_this_week,
        average_session_duration: general.average_session_duration,
        users_by_status: general.users_by_status,
      },
      bulk_operations: BulkSummary {
        total_operations: bulk.total_operations,
        successful_operations: bulk.successful_operations,
        failed_operations: bulk.failed_operations,
        success_rate: bulk.success_rate,
      },
      audit: AuditSummary {
        total_logs: audit.total_logs,
        logs_today: audit.logs_today,
        most_audited_resources: audit.most_audited_resources,
      },
    })
  }

  // Caches and health

  pub fn clear_all_caches(&self) {
    for (_, cache) in self.caches() {
      cache.invalidate(None);
    }
    info!("all service caches cleared");
  }

  pub fn all_cache_stats(&self) -> Result<BTreeMap<&'static str, CacheStats>, CacheError> {
    self
      .caches()
      .into_iter()
      .map(|(name, cache)| cache.stats().map(|stats| (name, stats)))
      .collect()
  }

  /// Probe every service cache. Never fails; problems are reported in
  /// the returned status.
  pub fn get_health_status(&self) -> HealthReport {
    let max_size = self.get_config().cache.max_size;
    let services = self
      .caches()
      .into_iter()
      .map(|(name, cache)| {
        let probe = cache.stats();
        if let Err(err) = &probe {
          warn!(service = name, error = %err, "cache probe failed");
        }
        (name, HealthState::of(&probe, max_size))
      })
      .collect();
    HealthReport::from_services(services)
  }

  // Sync

  /// Drop every cached response, then reload each service's statistics
  /// so the caches start warm. Failures are collected, not returned.
  pub async fn perform_full_sync(&self) -> SyncReport {
    self.clear_all_caches();

    let inner = &self.inner;
    let general_params = StatsParams::default();
    let (users, profiles, roles, activity, notifications, stats, bulk, audit) = futures::join!(
      inner.users.stats(),
      inner.profiles.stats(GLOBAL_PROFILE),
      inner.roles.stats(),
      inner.activity.stats(),
      inner.notifications.stats(),
      inner.stats.general(&general_params),
      inner.bulk.stats(),
      inner.audit.stats()
    );
    let outcomes: [(&'static str, Option<ServiceError>); 8] = [
      ("users", users.err()),
      ("profiles", profiles.err()),
      ("roles", roles.err()),
      ("activity", activity.err()),
      ("notifications", notifications.err()),
      ("stats", stats.err()),
      ("bulk", bulk.err()),
      ("audit", audit.err()),
    ];

    let mut synced = Vec::new();
    let mut errors = Vec::new();
    for (name, outcome) in outcomes {
      match outcome {
        None => synced.push(name),
        Some(err) => errors.push(format!("Sincronização de {} falhou: {}", name, err)),
      }
    }

    let success = errors.is_empty();
    let message = if success {
      "Sincronização completa bem-sucedida"
    } else {
      "Sincronização parcial"
    };
    info!(synced = synced.len(), failed = errors.len(), "full sync finished");
    SyncReport {
      success,
      message: message.to_string(),
      synced,
      errors,
    }
  }

  /// Run [`perform_full_sync`](Self::perform_full_sync) every
  /// `auto_sync.interval_secs`, or nothing when auto-sync is disabled.
  /// Sync stops when the returned handle is dropped.
  pub fn start_auto_sync(&self) -> Option<ScheduledTask> {
    let config = self.get_config().auto_sync;
    if !config.enabled {
      return None;
    }
    let facade = self.clone();
    Some(ScheduledTask::every("auto-sync", config.interval(), move || {
      let facade = facade.clone();
      async move {
        let report = facade.perform_full_sync().await;
        if !report.success {
          warn!(errors = ?report.errors, "auto-sync incomplete");
        }
        ControlFlow::Continue(())
      }
    }))
  }

  /// Start polling a bulk job with the configured interval and timeout.
  pub fn watch_bulk_operation(&self, operation_id: impl Into<String>) -> BulkPoller {
    let config = self.get_config().bulk_operations;
    BulkPoller::start(self.inner.bulk.clone(), operation_id, &config)
  }
}
