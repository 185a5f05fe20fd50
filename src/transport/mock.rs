//! In-memory transport for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{ApiRequest, ApiResponse, HttpTransport, Method};
use crate::error::TransportError;

type Responder = Arc<dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync>;

struct Route {
  method: Method,
  path: String,
  responder: Responder,
}

/// Transport that answers from registered routes and records every request.
///
/// Routes are matched on exact method and path; the most recently
/// registered route wins, so a test can override an earlier answer.
/// Unmatched requests fail with a 404.
#[derive(Default)]
pub struct MockTransport {
  routes: Mutex<Vec<Route>>,
  calls: Mutex<Vec<ApiRequest>>,
  latency: Mutex<Duration>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a responder computed from the request.
  pub fn on<F>(&self, method: Method, path: &str, responder: F)
  where
    F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
  {
    self
      .routes
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(Route {
        method,
        path: path.to_string(),
        responder: Arc::new(responder),
      });
  }

  /// Answer with a fixed JSON body.
  pub fn on_json(&self, method: Method, path: &str, body: Value) {
    self.on(method, path, move |_| Ok(ApiResponse::Json(body.clone())));
  }

  /// Answer with a fixed binary body.
  pub fn on_bytes(&self, method: Method, path: &str, body: Vec<u8>) {
    self.on(method, path, move |_| Ok(ApiResponse::Binary(body.clone())));
  }

  /// Answer with a non-2xx status.
  pub fn on_status(&self, method: Method, path: &str, status: u16) {
    self.on(method, path, move |_| {
      Err(TransportError::Status {
        status,
        message: format!("mock status {}", status),
      })
    });
  }

  /// Delay every response, so concurrent callers overlap.
  pub fn set_latency(&self, latency: Duration) {
    *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
  }

  /// All recorded requests, in order.
  pub fn calls(&self) -> Vec<ApiRequest> {
    self
      .calls
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn call_count(&self, method: Method, path: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .filter(|call| call.method == method && call.path == path)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self
      .calls
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  fn responder_for(&self, request: &ApiRequest) -> Option<Responder> {
    self
      .routes
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .rev()
      .find(|route| route.method == request.method && route.path == request.path)
      .map(|route| Arc::clone(&route.responder))
  }
}

#[async_trait]
impl HttpTransport for MockTransport {
  async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
    self
      .calls
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(request.clone());

    let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }

    match self.responder_for(&request) {
      Some(responder) => responder(&request),
      None => Err(TransportError::Status {
        status: 404,
        message: format!("no mock route for {} {}", request.method, request.path),
      }),
    }
  }
}
