//! Tracing setup for applications embedding the client.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Install a global subscriber.
///
/// `RUST_LOG` wins over the configured level. When a log directory is
/// configured or discovered (see [`log_dir`]), output goes to a daily
/// rolling file instead of stderr and the returned guard must be kept
/// alive to flush it.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.level))
    .map_err(|e| eyre!("Invalid log filter '{}': {}", config.level, e))?;

  match &log_dir(config) {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let appender = tracing_appender::rolling::daily(dir, "userhub.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

      Ok(None)
    }
  }
}

/// Default log directory under the platform data dir.
pub fn default_log_dir() -> Option<PathBuf> {
  dirs::data_dir().map(|dir| dir.join("userhub").join("logs"))
}

/// Where log files go: the configured directory, else the default one
/// when `to_file` is set, else nowhere.
pub fn log_dir(config: &LoggingConfig) -> Option<PathBuf> {
  match &config.directory {
    Some(dir) => Some(dir.clone()),
    None if config.to_file => default_log_dir(),
    None => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_configured_directory_wins() {
    let config = LoggingConfig {
      directory: Some(PathBuf::from("/var/log/userhub")),
      to_file: true,
      ..Default::default()
    };
    assert_eq!(log_dir(&config), Some(PathBuf::from("/var/log/userhub")));
  }

  #[test]
  fn test_to_file_falls_back_to_data_dir() {
    let config = LoggingConfig {
      to_file: true,
      ..Default::default()
    };
    assert_eq!(log_dir(&config), default_log_dir());
  }

  #[test]
  fn test_stderr_only_by_default() {
    assert_eq!(log_dir(&LoggingConfig::default()), None);
  }
}
