use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, Path, State};
use serde::{Deserialize, Serialize};

use crate::admin::AdminError as Error;
use crate::app_state::AppState;
use crate::batch::{ApplyResult, BatchError, RowUpdate, UpdateRequest};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdateRowsRequest {
  /// Flat row objects. Columns named in `key_columns` select the row, all others are updated.
  pub updates: Vec<serde_json::Map<String, serde_json::Value>>,
  /// Defaults to the table's primary key columns.
  pub key_columns: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdateRowsResponse {
  pub rows_affected: usize,
}

/// Updates many rows of one table atomically.
pub async fn update_rows_handler(
  State(state): State<AppState>,
  Path(table_name): Path<String>,
  request: Result<Json<UpdateRowsRequest>, JsonRejection>,
) -> Result<Json<UpdateRowsResponse>, Error> {
  let Json(request) = request?;

  let rows_affected = update_rows(&state, &table_name, request).await?;

  return Ok(Json(UpdateRowsResponse { rows_affected }));
}

pub(crate) async fn update_rows(
  state: &AppState,
  table_name: &str,
  request: UpdateRowsRequest,
) -> Result<usize, Error> {
  let Some(table) = state.schema_metadata().get_table(table_name) else {
    return Err(Error::TableNotFound(table_name.to_string()));
  };

  let key_columns: Vec<String> = match request.key_columns {
    Some(key_columns) => key_columns,
    None => {
      let pk: Vec<String> = table
        .primary_key_columns()
        .into_iter()
        .map(|c| c.name.as_str().to_string())
        .collect();
      if pk.is_empty() {
        return Err(
          BatchError::InvalidRequest(format!(
            "'{table_name}' has no primary key, key_columns required"
          ))
          .into(),
        );
      }
      pk
    }
  };

  let request = UpdateRequest {
    table: table_name.to_string(),
    rows: request
      .updates
      .into_iter()
      .map(|row| RowUpdate::from_json_object(row, &key_columns))
      .collect::<Result<Vec<_>, _>>()?,
  };

  return match state.batch_updater().apply_request(request).await {
    ApplyResult::Committed { rows_affected } => Ok(rows_affected),
    ApplyResult::Failed(failure) => Err(failure.into()),
  };
}
