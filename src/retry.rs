//! Bounded retry with linear backoff for facade-level composite calls.
//!
//! Services never retry on their own: a mutation retried blindly could be
//! applied twice. Only calls explicitly wrapped here are retried.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
  pub enabled: bool,
  pub max_attempts: u32,
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      enabled: true,
      max_attempts: 3,
      base_delay: Duration::from_millis(1000),
    }
  }
}

impl From<&RetryConfig> for RetryPolicy {
  fn from(config: &RetryConfig) -> Self {
    Self {
      enabled: config.enabled,
      max_attempts: config.max_attempts,
      base_delay: Duration::from_millis(config.delay_ms),
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
    Self {
      enabled: true,
      max_attempts,
      base_delay,
    }
  }

  /// A policy that runs the operation exactly once.
  pub fn disabled() -> Self {
    Self {
      enabled: false,
      ..Self::default()
    }
  }

  /// Total number of invocations this policy allows.
  pub fn attempts(&self) -> u32 {
    if self.enabled {
      self.max_attempts.max(1)
    } else {
      1
    }
  }

  /// Pause after the failed `attempt` (1-based).
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    self.base_delay.saturating_mul(attempt)
  }

  /// Run `operation` until it succeeds or the attempts run out, returning
  /// the last error in that case.
  pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
  {
    let attempts = self.attempts();
    let mut attempt = 1;
    loop {
      match operation().await {
        Ok(value) => return Ok(value),
        Err(err) if attempt >= attempts => return Err(err),
        Err(err) => {
          let delay = self.delay_for_attempt(attempt);
          warn!(
            error = %err,
            attempt,
            max_attempts = attempts,
            "operation failed, retrying in {:?}",
            delay
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
      }
    }
  }
}

/// Run `operation` under a one-off policy of `attempts` and `base_delay`.
pub async fn execute_with_retry<F, Fut, T, E>(
  operation: F,
  attempts: u32,
  base_delay: Duration,
) -> Result<T, E>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: Display,
{
  RetryPolicy::new(attempts, base_delay).execute(operation).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use tokio::time::Instant;

  #[tokio::test(start_paused = true)]
  async fn test_exhausted_attempts_surface_last_error() {
    let calls = &AtomicU32::new(0);
    let started = Instant::now();

    let result: Result<(), String> = execute_with_retry(
      move || async move {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(format!("failure {}", n))
      },
      3,
      Duration::from_millis(1000),
    )
    .await;

    assert_eq!(result, Err("failure 3".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 1s after the first failure, 2s after the second, none after the last
    assert_eq!(started.elapsed(), Duration::from_millis(3000));
  }

  #[tokio::test(start_paused = true)]
  async fn test_first_success_runs_once() {
    let calls = &AtomicU32::new(0);
    let started = Instant::now();

    let result: Result<u32, String> = RetryPolicy::default()
      .execute(move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(7)
      })
      .await;

    assert_eq!(result, Ok(7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
  }

  #[tokio::test(start_paused = true)]
  async fn test_recovers_on_second_attempt() {
    let calls = &AtomicU32::new(0);

    let result: Result<&str, &str> = RetryPolicy::new(5, Duration::from_millis(10))
      .execute(move || async move {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
          Err("flaky")
        } else {
          Ok("ok")
        }
      })
      .await;

    assert_eq!(result, Ok("ok"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_disabled_policy_calls_once() {
    let calls = &AtomicU32::new(0);

    let result: Result<(), &str> = RetryPolicy::disabled()
      .execute(move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err("down")
      })
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_policy_from_config() {
    let policy = RetryPolicy::from(&RetryConfig {
      enabled: true,
      max_attempts: 4,
      delay_ms: 250,
    });
    assert_eq!(policy.attempts(), 4);
    assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(750));
  }
}
