use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub auto_sync: AutoSyncConfig,
  #[serde(default)]
  pub validation: ValidationConfig,
  #[serde(default)]
  pub bulk_operations: BulkOperationsConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  /// Size above which health checks report a warning. Not enforced.
  pub max_size: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_size: 1000,
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
  pub enabled: bool,
  pub max_attempts: u32,
  /// Base delay, multiplied by the attempt number
  pub delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_attempts: 3,
      delay_ms: 1000,
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AutoSyncConfig {
  pub enabled: bool,
  pub interval_secs: u64,
}

impl Default for AutoSyncConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      interval_secs: 30 * 60,
    }
  }
}

impl AutoSyncConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
  /// When false, requests go to the server without local pre-flight checks
  pub strict_mode: bool,
}

impl Default for ValidationConfig {
  fn default() -> Self {
    Self { strict_mode: true }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BulkOperationsConfig {
  pub max_batch_size: usize,
  pub timeout_seconds: u64,
  /// Interval between progress polls of a running job
  pub poll_interval_ms: u64,
}

impl Default for BulkOperationsConfig {
  fn default() -> Self {
    Self {
      max_batch_size: 100,
      timeout_seconds: 300,
      poll_interval_ms: 2000,
    }
  }
}

impl BulkOperationsConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter directive, overridden by `RUST_LOG`
  pub level: String,
  /// Directory for rolling log files
  pub directory: Option<PathBuf>,
  /// Log to files under the platform data dir when no directory is set
  pub to_file: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
      to_file: false,
    }
  }
}

/// Sections to replace at runtime; `None` keeps the current section.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
  pub cache: Option<CacheConfig>,
  pub retry: Option<RetryConfig>,
  pub auto_sync: Option<AutoSyncConfig>,
  pub validation: Option<ValidationConfig>,
  pub bulk_operations: Option<BulkOperationsConfig>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./userhub.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/userhub/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("userhub.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("userhub").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.retry.max_attempts == 0 {
      return Err(eyre!("retry.max_attempts must be at least 1"));
    }
    Ok(config)
  }

  /// Replace the sections present in `update`.
  pub fn apply(&mut self, update: ConfigUpdate) {
    if let Some(cache) = update.cache {
      self.cache = cache;
    }
    if let Some(retry) = update.retry {
      self.retry = retry;
    }
    if let Some(auto_sync) = update.auto_sync {
      self.auto_sync = auto_sync;
    }
    if let Some(validation) = update.validation {
      self.validation = validation;
    }
    if let Some(bulk_operations) = update.bulk_operations {
      self.bulk_operations = bulk_operations;
    }
  }

  /// Get the API token from environment variables.
  ///
  /// Checks USERHUB_API_TOKEN first, then API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("USERHUB_API_TOKEN")
      .or_else(|_| std::env::var("API_TOKEN"))
      .map_err(|_| eyre!("API token not found. Set USERHUB_API_TOKEN or API_TOKEN environment variable."))
  }
}
