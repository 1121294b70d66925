//! Error types for ocorrencias-server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type for ocorrencias-server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ocorrencias-server
#[derive(Error, Debug)]
pub enum Error {
  /// Pipeline error
  #[error(transparent)]
  Pipeline(#[from] ocorrencias::error::Error),

  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// IO error
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// Malformed request
  #[error("Bad request: {0}")]
  BadRequest(String),

  /// Server error
  #[error("Server error: {0}")]
  Server(String),
}

impl Error {
  /// Create a bad request error
  pub fn bad_request<S: Into<String>>(msg: S) -> Self {
    Self::BadRequest(msg.into())
  }

  /// Create a server error
  pub fn server<S: Into<String>>(msg: S) -> Self {
    Self::Server(msg.into())
  }

  pub fn status_code(&self) -> StatusCode {
    use ocorrencias::error::Error as Pipeline;
    match self {
      Error::Pipeline(Pipeline::ScheduleNotFound { .. } | Pipeline::JobNotFound { .. }) => {
        StatusCode::NOT_FOUND
      }
      Error::Pipeline(
        Pipeline::UnknownJobType { .. } | Pipeline::InvalidPayload(_) | Pipeline::InvalidCron { .. },
      )
      | Error::Serialization(_)
      | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status_code();
    if status.is_server_error() {
      tracing::error!(error = %self, "Request failed");
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_codes() {
    let not_found: Error = ocorrencias::error::Error::ScheduleNotFound { id: 42 }.into();
    assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(
      Error::bad_request("body is not JSON").status_code(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      Error::server("boom").status_code(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }
}
