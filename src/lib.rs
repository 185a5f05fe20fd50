//! Client-side data access for the user administration API.
//!
//! [`UsersFacade`] is the usual entry point: it owns one service per
//! resource (users, profiles, roles, activity, notifications, audit,
//! statistics, bulk operations), each reading through its own TTL cache,
//! plus cross-service statistics, health checks and scheduled sync.
//!
//! ```no_run
//! # async fn run() -> color_eyre::Result<()> {
//! use userhub_client::{Config, UsersFacade};
//!
//! let config = Config::load(None)?;
//! let _guard = userhub_client::logging::init(&config.logging)?;
//! let facade = UsersFacade::from_config(config)?;
//! let page = facade.users().list(&Default::default()).await?;
//! println!("{} users", page.total);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod logging;
pub mod retry;
pub mod scheduler;
pub mod services;
pub mod transport;
pub mod types;
pub mod validation;

pub use config::{Config, ConfigUpdate};
pub use error::{ServiceError, ServiceResult, TransportError, ValidationError};
pub use facade::{GlobalStats, HealthReport, HealthState, SyncReport, UsersFacade};
pub use retry::{execute_with_retry, RetryPolicy};
pub use scheduler::{BulkPoller, ScheduledTask};
pub use types::{ExportFormat, Paginated, SortOrder};
