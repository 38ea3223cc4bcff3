use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use log::*;
use rusqlite::ErrorCode;
use thiserror::Error;

use crate::batch::{BatchFailure, ErrorKind};

#[derive(Debug, Error)]
pub enum AdminError {
  #[error("SQLite error: {0}")]
  Sqlite(#[from] tablegate_sqlite::Error),
  #[error("Schema error: {0}")]
  Schema(#[from] crate::schema_metadata::SchemaError),
  #[error("Value error: {0}")]
  Value(#[from] crate::value::ValueError),
  #[error("Bad request: {0}")]
  BadRequest(Box<dyn std::error::Error + Send + Sync>),
  #[error("Table not found: {0}")]
  TableNotFound(String),
  #[error("Already exists: {0}")]
  AlreadyExists(String),
  #[error("Batch failed: {0}")]
  Batch(BatchFailure),
}

impl From<JsonRejection> for AdminError {
  fn from(rejection: JsonRejection) -> Self {
    return Self::BadRequest(rejection.body_text().into());
  }
}

impl From<BatchFailure> for AdminError {
  fn from(failure: BatchFailure) -> Self {
    return Self::Batch(failure);
  }
}

impl From<crate::batch::BatchError> for AdminError {
  fn from(err: crate::batch::BatchError) -> Self {
    return Self::Batch(err.into());
  }
}

fn batch_status(kind: ErrorKind) -> StatusCode {
  return match kind {
    ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
    ErrorKind::RowNotFound => StatusCode::NOT_FOUND,
    ErrorKind::ConstraintViolation => StatusCode::CONFLICT,
    ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
  };
}

fn sqlite_status(err: &tablegate_sqlite::Error) -> StatusCode {
  return match err {
    tablegate_sqlite::Error::ConnectionClosed | tablegate_sqlite::Error::AcquireTimeout(_) => {
      StatusCode::SERVICE_UNAVAILABLE
    }
    tablegate_sqlite::Error::Rusqlite(err) => match err.sqlite_error_code() {
      Some(ErrorCode::ConstraintViolation) => StatusCode::CONFLICT,
      Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StatusCode::SERVICE_UNAVAILABLE,
      Some(ErrorCode::OperationInterrupted) => StatusCode::GATEWAY_TIMEOUT,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    },
    _ => StatusCode::INTERNAL_SERVER_ERROR,
  };
}

impl IntoResponse for AdminError {
  fn into_response(self) -> Response {
    let (status, msg) = match self {
      // Batch failures carry structure callers can act on, e.g. the failing row.
      Self::Batch(failure) => {
        return (batch_status(failure.kind), Json(failure)).into_response();
      }
      Self::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string()),
      Self::Value(ref _err) => (StatusCode::BAD_REQUEST, self.to_string()),
      Self::Schema(crate::schema_metadata::SchemaError::InvalidName(ref _name)) => {
        (StatusCode::BAD_REQUEST, self.to_string())
      }
      Self::TableNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
      Self::AlreadyExists(_) => (StatusCode::CONFLICT, self.to_string()),
      Self::Sqlite(ref err) => (sqlite_status(err), self.to_string()),
      // NOTE: We can leak internal errors, there is no sensitive state behind these APIs.
      ref _err => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
    };

    if status.is_server_error() {
      error!("{status}: {msg}");
    }

    return (status, [(CONTENT_TYPE, "text/plain")], msg).into_response();
  }
}
