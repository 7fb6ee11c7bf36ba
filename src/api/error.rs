//! Classified API failure taxonomy.
//!
//! Every outbound call resolves or rejects with one of these variants so
//! the retry policy, mutation path, and sync engine can decide what to do
//! without string-matching error messages.

use serde::Deserialize;
use thiserror::Error;

/// A field-level rejection attached to a validation failure.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FieldError {
  pub field: String,
  pub message: String,
}

/// Classified failure from the remote API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
  /// No connectivity. Always retryable once online.
  #[error("network unreachable")]
  Offline,

  /// The request timed out. Retryable.
  #[error("request timed out")]
  Timeout,

  /// 5xx from the server. Retryable with backoff.
  #[error("server error (status {status})")]
  Server { status: u16 },

  /// 4xx rejection. Not retryable; represents a genuine refusal.
  #[error("request rejected (status {status}): {message}")]
  Client { status: u16, message: String },

  /// 422-class rejection carrying field errors for the UI. Not retryable.
  #[error("validation failed ({} field error(s))", errors.len())]
  Validation { errors: Vec<FieldError> },

  /// The server answered but the body did not parse. Not retryable.
  #[error("unexpected response body: {0}")]
  Decode(String),
}

/// Shape of the API's error body. Field errors are optional.
#[derive(Debug, Deserialize)]
struct ErrorBody {
  #[serde(default)]
  message: Option<String>,
  #[serde(default)]
  errors: Vec<FieldError>,
}

impl ApiError {
  /// Whether the sync engine and retry policy may try this call again.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Offline | Self::Timeout | Self::Server { .. })
  }

  /// Classify a non-success HTTP status with its (possibly empty) body.
  pub fn from_status(status: u16, body: &str) -> Self {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();

    if status == 422 {
      let errors = parsed.map(|b| b.errors).unwrap_or_default();
      return Self::Validation { errors };
    }

    if (500..600).contains(&status) {
      return Self::Server { status };
    }

    let message = parsed
      .and_then(|b| b.message)
      .unwrap_or_else(|| "request failed".to_string());
    Self::Client { status, message }
  }

  /// Classify a transport-level failure.
  pub fn from_transport(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      Self::Timeout
    } else if err.is_decode() {
      Self::Decode(err.to_string())
    } else {
      // Connection refused, DNS failure, connection reset: all read as
      // "no connectivity" to the offline fallback path.
      Self::Offline
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_retryable_classification() {
    assert!(ApiError::Offline.is_retryable());
    assert!(ApiError::Timeout.is_retryable());
    assert!(ApiError::Server { status: 503 }.is_retryable());
    assert!(!ApiError::Client {
      status: 404,
      message: "not found".into()
    }
    .is_retryable());
    assert!(!ApiError::Validation { errors: vec![] }.is_retryable());
  }

  #[test]
  fn test_validation_carries_field_errors() {
    let body = r#"{"message":"invalid","errors":[{"field":"cost","message":"must be positive"}]}"#;
    match ApiError::from_status(422, body) {
      ApiError::Validation { errors } => {
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "cost");
      }
      other => panic!("expected validation error, got {:?}", other),
    }
  }

  #[test]
  fn test_status_ranges() {
    assert!(matches!(
      ApiError::from_status(500, ""),
      ApiError::Server { status: 500 }
    ));
    assert!(matches!(
      ApiError::from_status(403, "{}"),
      ApiError::Client { status: 403, .. }
    ));
  }
}
