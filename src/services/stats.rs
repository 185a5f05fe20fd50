//! Read-only aggregate statistics.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::{CachedService, Resource, ServiceContext};
use crate::cache::{keyed, CacheLayer, QueryKey};
use crate::error::{OperationContext, ServiceResult};
use crate::transport::{to_json, ApiRequest, Method};
use crate::types::LabelCount;

pub const STATS_TTL: Duration = Duration::from_secs(5 * 60);

const BASE: &str = "/api/users/stats";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Period {
  Day,
  Week,
  #[default]
  Month,
  Year,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsParams {
  pub date_from: Option<String>,
  pub date_to: Option<String>,
  pub period: Option<Period>,
  pub group_by: Option<Period>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralStats {
  pub total_users: u64,
  pub active_users: u64,
  pub inactive_users: u64,
  pub suspended_users: u64,
  pub pending_users: u64,
  pub new_users_today: u64,
  pub new_users_this_week: u64,
  pub new_users_this_month: u64,
  pub users_growth_rate: f64,
  pub average_session_duration: f64,
  pub users_by_status: HashMap<String, u64>,
  pub users_by_role: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthPoint {
  pub date: String,
  pub new_users: u64,
  pub active_users: u64,
  pub total_users: u64,
  pub growth_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthStats {
  pub period: Period,
  pub data: Vec<GrowthPoint>,
  pub total_growth: i64,
  pub average_growth_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginStats {
  pub total_logins: u64,
  pub logins_today: u64,
  pub logins_this_week: u64,
  pub logins_this_month: u64,
  pub average_logins_per_user: f64,
  pub login_sources: Vec<LabelCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionRate {
  pub period: u32,
  pub rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cohort {
  pub cohort_date: String,
  pub total_users: u64,
  pub retention_rates: Vec<RetentionRate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionStats {
  pub period: Period,
  pub cohorts: Vec<Cohort>,
  pub average_retention_rate: f64,
}

#[derive(Clone, Copy)]
enum Report {
  General,
  Growth,
  Activity,
  Retention,
}

impl Report {
  fn segment(self) -> &'static str {
    match self {
      Report::General => "general",
      Report::Growth => "growth",
      Report::Activity => "activity",
      Report::Retention => "retention",
    }
  }
}

struct StatsKey<'a> {
  report: Report,
  params: &'a StatsParams,
}

impl QueryKey for StatsKey<'_> {
  fn cache_key(&self) -> String {
    keyed(&format!("{}_stats", self.report.segment()), self.params)
  }
}

#[derive(Clone)]
pub struct StatsService {
  resource: Resource,
}

impl StatsService {
  pub fn new(ctx: ServiceContext) -> Self {
    Self::with_cache(ctx, CacheLayer::memory(STATS_TTL))
  }

  pub fn with_cache(ctx: ServiceContext, cache: CacheLayer) -> Self {
    Self {
      resource: Resource::new(ctx, cache, BASE),
    }
  }

  async fn report<T: serde::de::DeserializeOwned>(
    &self,
    report: Report,
    params: &StatsParams,
    message: &'static str,
  ) -> ServiceResult<T> {
    let request = ApiRequest::new(Method::Get, self.resource.path(&format!("/{}", report.segment())))
      .query(to_json(params).op(message)?);
    self
      .resource
      .read_as(&StatsKey { report, params }, request, message)
      .await
  }

  pub async fn general(&self, params: &StatsParams) -> ServiceResult<GeneralStats> {
    self
      .report(Report::General, params, "Falha ao obter estatísticas gerais")
      .await
  }

  pub async fn growth(&self, params: &StatsParams) -> ServiceResult<GrowthStats> {
    self
      .report(Report::Growth, params, "Falha ao obter estatísticas de crescimento")
      .await
  }

  pub async fn activity(&self, params: &StatsParams) -> ServiceResult<LoginStats> {
    self
      .report(Report::Activity, params, "Falha ao obter estatísticas de atividade")
      .await
  }

  pub async fn retention(&self, params: &StatsParams) -> ServiceResult<RetentionStats> {
    self
      .report(Report::Retention, params, "Falha ao obter estatísticas de retenção")
      .await
  }
}

impl CachedService for StatsService {
  fn cache(&self) -> &CacheLayer {
    self.resource.cache()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::services::testing;
  use serde_json::json;

  #[tokio::test]
  async fn test_reports_keyed_by_params() {
    let (mock, ctx) = testing::context();
    mock.on_json(
      Method::Get,
      "/api/users/stats/growth",
      json!({"period": "week", "data": [{"date": "2024-01-01", "new_users": 5}], "total_growth": 5}),
    );
    let service = StatsService::new(ctx);

    let weekly = StatsParams {
      period: Some(Period::Week),
      ..Default::default()
    };
    let growth = service.growth(&weekly).await.expect("growth");
    service.growth(&weekly).await.expect("growth");
    service
      .growth(&StatsParams {
        period: Some(Period::Month),
        ..Default::default()
      })
      .await
      .expect("growth");

    assert_eq!(growth.period, Period::Week);
    assert_eq!(growth.data[0].new_users, 5);
    assert_eq!(mock.total_calls(), 2);
    assert_eq!(mock.calls()[0].query.as_ref().expect("query")["period"], "week");
  }

  #[tokio::test]
  async fn test_general_failure_message() {
    let (_mock, ctx) = testing::context();
    let service = StatsService::new(ctx);

    let err = service
      .general(&StatsParams::default())
      .await
      .expect_err("unrouted");
    assert_eq!(err.to_string(), "Falha ao obter estatísticas gerais");
    assert_eq!(err.status(), Some(404));
  }
}
