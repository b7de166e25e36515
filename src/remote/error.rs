//! Normalized error envelope returned by every remote boundary call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failed remote call.
///
/// The backend access layer picks the kind; the coordinator only propagates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
  /// Transient failure (connection, timeout, 5xx). Caller may retry.
  #[serde(rename = "NetworkError")]
  Network,
  /// Payload rejected by the backend. Not retried, shown to the user.
  #[serde(rename = "ValidationError")]
  Validation,
  /// Session missing or rejected. Caller must re-authenticate.
  #[serde(rename = "AuthError")]
  Auth,
  #[serde(rename = "NotFoundError")]
  NotFound,
  /// Anything the access layer could not classify.
  #[serde(rename = "UnknownError")]
  Unknown,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::Network => "NetworkError",
      ErrorKind::Validation => "ValidationError",
      ErrorKind::Auth => "AuthError",
      ErrorKind::NotFound => "NotFoundError",
      ErrorKind::Unknown => "UnknownError",
    }
  }

  /// Only network failures are worth retrying.
  pub fn is_retryable(&self) -> bool {
    matches!(self, ErrorKind::Network)
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A classified remote failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
  pub kind: ErrorKind,
  pub message: String,
}

impl RemoteError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  pub fn network(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Network, message)
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Validation, message)
  }

  pub fn auth(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Auth, message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::NotFound, message)
  }

  pub fn unknown(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Unknown, message)
  }

  pub fn is_retryable(&self) -> bool {
    self.kind.is_retryable()
  }
}

impl From<serde_json::Error> for RemoteError {
  fn from(e: serde_json::Error) -> Self {
    RemoteError::unknown(format!("Failed to decode payload: {}", e))
  }
}

/// Result of a remote read or write: `Ok(value)` or a classified error.
pub type RemoteResult<T> = Result<T, RemoteError>;
