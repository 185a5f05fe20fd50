//! Owned background tasks: periodic jobs and bulk progress polling.
//!
//! Every task lives behind a [`ScheduledTask`] handle. Dropping the handle
//! stops the task at its next await point; a request already handed to the
//! transport is not interrupted.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::BulkOperationsConfig;
use crate::services::bulk::{BulkOperationProgress, BulkService};

/// Handle to a spawned task, aborted when dropped.
#[derive(Debug)]
pub struct ScheduledTask {
  name: &'static str,
  handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
  pub fn spawn<Fut>(name: &'static str, task: Fut) -> Self
  where
    Fut: Future<Output = ()> + Send + 'static,
  {
    debug!(task = name, "scheduled task started");
    Self {
      name,
      handle: Some(tokio::spawn(task)),
    }
  }

  /// Run `tick` every `period`, first after one full period, until it
  /// returns `Break` or the handle is dropped.
  pub fn every<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
  {
    Self::spawn(name, async move {
      let mut interval = tokio::time::interval_at(Instant::now() + period, period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        interval.tick().await;
        if tick().await.is_break() {
          break;
        }
      }
    })
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn is_finished(&self) -> bool {
    self.handle.as_ref().map_or(true, JoinHandle::is_finished)
  }

  /// Stop the task now.
  pub fn cancel(mut self) {
    self.abort();
  }

  /// Wait for the task to end on its own.
  pub async fn join(mut self) {
    if let Some(handle) = self.handle.take() {
      if let Err(err) = handle.await {
        if err.is_panic() {
          warn!(task = self.name, "scheduled task panicked");
        }
      }
    }
  }

  fn abort(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.abort();
      debug!(task = self.name, "scheduled task cancelled");
    }
  }
}

impl Drop for ScheduledTask {
  fn drop(&mut self) {
    self.abort();
  }
}

/// Decide what to publish after a poll. Progress never moves backwards and
/// nothing follows a terminal state.
fn advance(
  current: Option<&BulkOperationProgress>,
  mut next: BulkOperationProgress,
) -> Option<BulkOperationProgress> {
  let Some(current) = current else {
    return Some(next);
  };
  if current.status.is_terminal() {
    return None;
  }
  if next.progress < current.progress {
    if !next.status.is_terminal() {
      return None;
    }
    next.progress = current.progress;
  }
  next.processed = next.processed.max(current.processed);
  Some(next)
}

/// Polls a bulk job until it reaches a terminal state, publishing each
/// snapshot through a watch channel.
pub struct BulkPoller {
  operation_id: String,
  rx: watch::Receiver<Option<BulkOperationProgress>>,
  task: ScheduledTask,
}

impl BulkPoller {
  /// Poll every `poll_interval` (first poll right away); give up after
  /// `timeout_seconds`.
  pub fn start(
    service: BulkService,
    operation_id: impl Into<String>,
    config: &BulkOperationsConfig,
  ) -> Self {
    let operation_id = operation_id.into();
    let (tx, rx) = watch::channel(None);
    let period = config.poll_interval();
    let deadline = Instant::now() + Duration::from_secs(config.timeout_seconds);

    let id = operation_id.clone();
    let task = ScheduledTask::spawn("bulk-poller", async move {
      let mut interval = tokio::time::interval(period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        interval.tick().await;
        if Instant::now() >= deadline {
          warn!(operation_id = %id, "bulk job still running at timeout, polling stopped");
          break;
        }

        match service.refresh_progress(&id).await {
          Ok(progress) => {
            debug!(operation_id = %id, status = ?progress.status, progress = progress.progress, "bulk progress");
            let mut published = None;
            tx.send_if_modified(|current| match advance(current.as_ref(), progress) {
              Some(next) => {
                published = Some(next.status);
                *current = Some(next);
                true
              }
              None => false,
            });
            if let Some(status) = published.filter(|s| s.is_terminal()) {
              info!(operation_id = %id, status = ?status, "bulk job finished");
              break;
            }
          }
          // A failed poll is retried on the next tick
          Err(err) => warn!(operation_id = %id, error = %err, "bulk progress poll failed"),
        }

        if tx.is_closed() {
          break;
        }
      }
    });

    Self {
      operation_id,
      rx,
      task,
    }
  }

  pub fn operation_id(&self) -> &str {
    &self.operation_id
  }

  pub fn subscribe(&self) -> watch::Receiver<Option<BulkOperationProgress>> {
    self.rx.clone()
  }

  pub fn latest(&self) -> Option<BulkOperationProgress> {
    self.rx.borrow().clone()
  }

  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }

  /// Resolve once the job is terminal, or with the last snapshot if
  /// polling stopped first (timeout).
  pub async fn wait(&mut self) -> Option<BulkOperationProgress> {
    let terminal = match self
      .rx
      .wait_for(|p| p.as_ref().is_some_and(|p| p.status.is_terminal()))
      .await
    {
      Ok(progress) => progress.clone(),
      Err(_) => None,
    };
    terminal.or_else(|| self.rx.borrow().clone())
  }

  /// Stop polling. The job itself keeps running server-side.
  pub fn stop(self) {
    self.task.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::services::bulk::BulkStatus;
  use crate::services::testing;
  use crate::transport::{ApiResponse, Method};
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
  use std::sync::Arc;

  fn snapshot(status: BulkStatus, progress: f64) -> BulkOperationProgress {
    BulkOperationProgress {
      operation_id: "1".into(),
      status,
      progress,
      processed: 0,
      total: 10,
      errors: 0,
      start_time: None,
      estimated_completion: None,
      current_item: None,
    }
  }

  fn config(poll_ms: u64, timeout_secs: u64) -> BulkOperationsConfig {
    BulkOperationsConfig {
      poll_interval_ms: poll_ms,
      timeout_seconds: timeout_secs,
      ..Default::default()
    }
  }

  #[test]
  fn test_advance_never_goes_backwards() {
    let running = snapshot(BulkStatus::Running, 50.0);
    assert!(advance(Some(&running), snapshot(BulkStatus::Running, 40.0)).is_none());

    let failed = advance(Some(&running), snapshot(BulkStatus::Failed, 0.0)).expect("terminal");
    assert_eq!(failed.status, BulkStatus::Failed);
    assert_eq!(failed.progress, 50.0);

    assert!(advance(Some(&failed), snapshot(BulkStatus::Running, 90.0)).is_none());
    assert!(advance(None, snapshot(BulkStatus::Pending, 0.0)).is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_every_runs_until_break() {
    let ticks = Arc::new(AtomicU32::new(0));
    let counter = ticks.clone();
    let task = ScheduledTask::every("test", Duration::from_secs(1), move || {
      let counter = counter.clone();
      async move {
        if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
          ControlFlow::Break(())
        } else {
          ControlFlow::Continue(())
        }
      }
    });

    let started = Instant::now();
    task.join().await;

    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropped_task_stops_ticking() {
    let ticks = Arc::new(AtomicU32::new(0));
    let counter = ticks.clone();
    let task = ScheduledTask::every("test", Duration::from_secs(1), move || {
      counter.fetch_add(1, Ordering::SeqCst);
      async { ControlFlow::Continue(()) }
    });

    tokio::time::sleep(Duration::from_millis(2500)).await;
    drop(task);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(ticks.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_poller_publishes_monotonic_progress() {
    let (mock, ctx) = testing::context();
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    mock.on(Method::Get, "/api/users/bulk/progress/7", move |_| {
      let steps = [("running", 10), ("running", 5), ("running", 60), ("completed", 100)];
      let n = counter.fetch_add(1, Ordering::SeqCst).min(steps.len() - 1);
      let (status, progress) = steps[n];
      Ok(ApiResponse::Json(
        json!({"operation_id": "7", "status": status, "progress": progress}),
      ))
    });
    let service = BulkService::new(ctx);

    let mut poller = BulkPoller::start(service, "7", &config(100, 60));
    let mut rx = poller.subscribe();
    let mut seen = Vec::new();
    while rx.changed().await.is_ok() {
      if let Some(p) = rx.borrow_and_update().clone() {
        seen.push(p.progress);
      }
    }

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
    assert!(!seen.contains(&5.0));
    let last = poller.wait().await.expect("terminal");
    assert_eq!(last.status, BulkStatus::Completed);
    assert_eq!(polls.load(Ordering::SeqCst), 4);
    assert!(poller.is_finished());
  }

  #[tokio::test(start_paused = true)]
  async fn test_poller_stops_at_timeout() {
    let (mock, ctx) = testing::context();
    mock.on_json(
      Method::Get,
      "/api/users/bulk/progress/8",
      json!({"operation_id": "8", "status": "running", "progress": 20}),
    );
    let service = BulkService::new(ctx);

    let mut poller = BulkPoller::start(service, "8", &config(500, 2));
    let last = poller.wait().await.expect("snapshot");

    assert_eq!(last.status, BulkStatus::Running);
    let calls = mock.call_count(Method::Get, "/api/users/bulk/progress/8");
    assert_eq!(calls, 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stopped_poller_sends_no_more_requests() {
    let (mock, ctx) = testing::context();
    mock.on_json(
      Method::Get,
      "/api/users/bulk/progress/9",
      json!({"operation_id": "9", "status": "running", "progress": 20}),
    );
    let service = BulkService::new(ctx);

    let poller = BulkPoller::start(service, "9", &config(100, 60));
    tokio::time::sleep(Duration::from_millis(250)).await;
    poller.stop();
    let before = mock.total_calls();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(before >= 1);
    assert_eq!(mock.total_calls(), before);
  }
}
