//! HTTP transport abstraction.
//!
//! Services never talk to `reqwest` directly; they go through [`ApiClient`],
//! which wraps any [`HttpTransport`]. Production code uses
//! [`ReqwestTransport`], tests use [`MockTransport`].

mod http;
pub mod mock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::TransportError;

pub use http::ReqwestTransport;
pub use mock::MockTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Expected shape of the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
  #[default]
  Json,
  Binary,
}

/// A single request handed to the transport.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  /// Path relative to the API base url, e.g. `/api/users/42`
  pub path: String,
  /// Query parameters as a flat JSON object
  pub query: Option<Value>,
  pub body: Option<Value>,
  pub response_type: ResponseType,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: None,
      body: None,
      response_type: ResponseType::Json,
    }
  }

  pub fn query(mut self, query: Value) -> Self {
    self.query = Some(query);
    self
  }

  pub fn body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn binary(mut self) -> Self {
    self.response_type = ResponseType::Binary;
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
  Json(Value),
  Binary(Vec<u8>),
}

impl ApiResponse {
  pub fn into_json(self) -> Result<Value, TransportError> {
    match self {
      ApiResponse::Json(value) => Ok(value),
      ApiResponse::Binary(bytes) => {
        if bytes.is_empty() {
          Ok(Value::Null)
        } else {
          serde_json::from_slice(&bytes).map_err(TransportError::from)
        }
      }
    }
  }

  pub fn into_bytes(self) -> Result<Vec<u8>, TransportError> {
    match self {
      ApiResponse::Binary(bytes) => Ok(bytes),
      ApiResponse::Json(value) => serde_json::to_vec(&value).map_err(TransportError::from),
    }
  }
}

/// Anything able to execute an [`ApiRequest`].
///
/// Non-2xx responses must be reported as [`TransportError::Status`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
  async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Shared, cheaply cloneable handle over a transport with JSON helpers.
#[derive(Clone)]
pub struct ApiClient {
  transport: Arc<dyn HttpTransport>,
}

impl ApiClient {
  pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
    Self { transport }
  }

  pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
    tracing::trace!(method = %request.method, path = %request.path, "api request");
    self.transport.request(request).await
  }

  pub async fn send_json(&self, request: ApiRequest) -> Result<Value, TransportError> {
    self.send(request).await?.into_json()
  }

  pub async fn get(&self, path: &str, query: Option<Value>) -> Result<Value, TransportError> {
    let mut request = ApiRequest::new(Method::Get, path);
    request.query = query;
    self.send_json(request).await
  }

  /// Fetch a binary payload (exports, templates).
  pub async fn download(
    &self,
    method: Method,
    path: &str,
    query: Option<Value>,
    body: Option<Value>,
  ) -> Result<Vec<u8>, TransportError> {
    let mut request = ApiRequest::new(method, path).binary();
    request.query = query;
    request.body = body;
    self.send(request).await?.into_bytes()
  }
}

/// Serialize a request payload into a JSON value.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Value, TransportError> {
  serde_json::to_value(value).map_err(TransportError::from)
}

/// Decode a JSON value into a typed response.
pub fn from_json<T: DeserializeOwned>(value: Value) -> Result<T, TransportError> {
  serde_json::from_value(value).map_err(TransportError::from)
}
