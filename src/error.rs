//! Failure types and error normalization.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

use crate::cache::is_truthy;

/// Raw failure of a single request attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
  /// Network unreachable, connection reset, TLS failure...
  #[error("network request failed: {0}")]
  Transport(String),

  #[error("invalid URL: {0}")]
  InvalidUrl(String),

  /// Response body was not valid JSON
  #[error("failed to parse response body: {0}")]
  Parse(String),

  /// Response JSON did not match the expected data type
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// Non-2xx status; the parsed body is the error payload
  #[error("request failed with status {status}")]
  Status { status: u16, body: Value },
}

impl FetchError {
  /// HTTP status of an application failure.
  pub fn status(&self) -> Option<u16> {
    match self {
      FetchError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// JSON form of the failure, before normalization.
  ///
  /// Application failures carry their response body; every other failure is
  /// represented as `{"message": "..."}`.
  pub fn to_value(&self) -> Value {
    match self {
      FetchError::Status { body, .. } => body.clone(),
      other => json!({ "message": other.to_string() }),
    }
  }
}

/// Failure reported to callers once the retry budget is exhausted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
  /// HTTP status, for application failures
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<u16>,
  /// Normalized error payload
  pub payload: Value,
}

impl ApiError {
  /// The payload's `message` field, if it has one.
  pub fn message(&self) -> Option<&str> {
    self.payload.get("message").and_then(Value::as_str)
  }
}

impl fmt::Display for ApiError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.status, self.message()) {
      (Some(status), _) => write!(f, "HTTP {}: {}", status, self.payload),
      (None, Some(message)) => f.write_str(message),
      (None, None) => write!(f, "{}", self.payload),
    }
  }
}

impl std::error::Error for ApiError {}

/// Normalize a failure into the error reported to callers.
pub fn normalize(error: &FetchError) -> ApiError {
  ApiError {
    status: error.status(),
    payload: normalize_value(error.to_value()),
  }
}

/// Unwrap one conventional level of error nesting.
///
/// Values carrying a `response` field are unwrapped to `response.data.errors`,
/// else `response.data`, else `response`. Anything else is returned unchanged.
pub fn normalize_value(raw: Value) -> Value {
  let response = match raw.get("response") {
    Some(response) if is_truthy(response) => response,
    _ => return raw,
  };

  let data = response.get("data").filter(|data| is_truthy(data));
  let errors = data
    .and_then(|data| data.get("errors"))
    .filter(|errors| is_truthy(errors));

  errors.or(data).unwrap_or(response).clone()
}
