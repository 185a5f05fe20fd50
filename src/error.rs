//! Error types shared by the transport, the services and the facade.

/// Failure reported by an [`HttpTransport`](crate::transport::HttpTransport).
///
/// Cloneable so a single failed request can be handed to every caller that
/// was waiting on the same in-flight fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
  /// The server answered with a non-2xx status
  #[error("HTTP {status}: {message}")]
  Status { status: u16, message: String },

  /// The request never produced a response (DNS, connect, timeout, ...)
  #[error("network error: {0}")]
  Network(String),

  /// The response body did not have the expected shape
  #[error("failed to decode response: {0}")]
  Decode(String),
}

impl TransportError {
  /// HTTP status code, when the server answered at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      TransportError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn is_not_found(&self) -> bool {
    self.status() == Some(404)
  }
}

impl From<serde_json::Error> for TransportError {
  fn from(err: serde_json::Error) -> Self {
    TransportError::Decode(err.to_string())
  }
}

/// A request rejected before reaching the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
  pub field: &'static str,
  pub message: String,
}

impl ValidationError {
  pub fn new(field: &'static str, message: impl Into<String>) -> Self {
    Self {
      field,
      message: message.into(),
    }
  }
}

/// Error returned by every domain service method.
///
/// Transport failures render as a fixed, per-operation message; the
/// underlying [`TransportError`] stays reachable through `source()`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
  #[error("{0}")]
  Validation(#[from] ValidationError),

  #[error("{message}")]
  Operation {
    message: &'static str,
    #[source]
    source: TransportError,
  },
}

impl ServiceError {
  pub fn operation(message: &'static str, source: TransportError) -> Self {
    ServiceError::Operation { message, source }
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, ServiceError::Validation(_))
  }

  /// The fixed message of a wrapped transport failure.
  pub fn operation_message(&self) -> Option<&'static str> {
    match self {
      ServiceError::Operation { message, .. } => Some(message),
      ServiceError::Validation(_) => None,
    }
  }

  /// The original transport failure, if any.
  pub fn cause(&self) -> Option<&TransportError> {
    match self {
      ServiceError::Operation { source, .. } => Some(source),
      ServiceError::Validation(_) => None,
    }
  }

  /// HTTP status of the original failure, if the server answered.
  pub fn status(&self) -> Option<u16> {
    self.cause().and_then(TransportError::status)
  }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Extension used by the services to wrap transport failures with their
/// operation message.
pub(crate) trait OperationContext<T> {
  fn op(self, message: &'static str) -> ServiceResult<T>;
}

impl<T> OperationContext<T> for std::result::Result<T, TransportError> {
  fn op(self, message: &'static str) -> ServiceResult<T> {
    self.map_err(|source| {
      tracing::warn!(error = %source, "{}", message);
      ServiceError::operation(message, source)
    })
  }
}
