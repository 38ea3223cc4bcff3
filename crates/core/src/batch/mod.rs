//! All-or-nothing updates of many rows of one table.
//!
//! A batch is validated against the schema and turned into fully bound UPDATE statements before
//! any transaction is opened. Statements then run in input order within a single transaction and
//! the first row that fails, including rows that match nothing, rolls back the whole batch.

mod request;
mod statement;
mod updater;

pub use request::{RowUpdate, UpdateRequest};
pub use updater::BatchRowUpdater;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
  InvalidRequest,
  RowNotFound,
  ConstraintViolation,
  StoreUnavailable,
  Timeout,
}

#[derive(Debug, Error)]
pub enum BatchError {
  #[error("Invalid request: {0}")]
  InvalidRequest(String),
  #[error("No row matches the keys of row {row_index}")]
  RowNotFound { row_index: usize },
  #[error("Constraint violation: {reason}")]
  ConstraintViolation {
    row_index: Option<usize>,
    reason: String,
  },
  #[error("Store unavailable: {reason}")]
  StoreUnavailable {
    row_index: Option<usize>,
    reason: String,
  },
  #[error("Timeout: {reason}")]
  Timeout {
    row_index: Option<usize>,
    reason: String,
  },
}

impl BatchError {
  pub fn kind(&self) -> ErrorKind {
    return match self {
      Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
      Self::RowNotFound { .. } => ErrorKind::RowNotFound,
      Self::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
      Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
      Self::Timeout { .. } => ErrorKind::Timeout,
    };
  }

  pub fn row_index(&self) -> Option<usize> {
    return match self {
      Self::InvalidRequest(_) => None,
      Self::RowNotFound { row_index } => Some(*row_index),
      Self::ConstraintViolation { row_index, .. }
      | Self::StoreUnavailable { row_index, .. }
      | Self::Timeout { row_index, .. } => *row_index,
    };
  }

  pub(crate) fn at_row(err: StoreError, row_index: usize) -> Self {
    let row_index = Some(row_index);
    return match err {
      StoreError::Constraint(reason) => Self::ConstraintViolation { row_index, reason },
      StoreError::Timeout(reason) => Self::Timeout { row_index, reason },
      StoreError::Unavailable(reason) => Self::StoreUnavailable { row_index, reason },
    };
  }
}

/// Failures outside of any particular row, e.g. acquiring the transaction or committing it.
impl From<StoreError> for BatchError {
  fn from(err: StoreError) -> Self {
    return match err {
      StoreError::Constraint(reason) => Self::ConstraintViolation {
        row_index: None,
        reason,
      },
      StoreError::Timeout(reason) => Self::Timeout {
        row_index: None,
        reason,
      },
      StoreError::Unavailable(reason) => Self::StoreUnavailable {
        row_index: None,
        reason,
      },
    };
  }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchFailure {
  pub kind: ErrorKind,
  pub reason: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub row_index: Option<usize>,
}

impl std::fmt::Display for BatchFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}: {}", self.kind, self.reason)
  }
}

impl From<BatchError> for BatchFailure {
  fn from(err: BatchError) -> Self {
    return Self {
      kind: err.kind(),
      row_index: err.row_index(),
      reason: err.to_string(),
    };
  }
}

/// Outcome of [BatchRowUpdater::apply].
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyResult {
  /// All rows were updated. `rows_affected` counts every row touched by the batch.
  Committed { rows_affected: usize },
  /// Nothing was changed.
  Failed(BatchFailure),
}

impl ApplyResult {
  pub fn is_committed(&self) -> bool {
    return matches!(self, Self::Committed { .. });
  }
}
