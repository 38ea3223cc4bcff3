use axum::extract::{Json, Path, State};
use serde::Serialize;

use crate::admin::AdminError as Error;
use crate::app_state::AppState;
use crate::value::value_to_json;

#[derive(Debug, Serialize)]
pub struct ListRowsResponse {
  pub columns: Vec<String>,
  pub rows: Vec<Vec<serde_json::Value>>,
}

/// Reads all rows of a table.
pub async fn list_rows_handler(
  State(state): State<AppState>,
  Path(table_name): Path<String>,
) -> Result<Json<ListRowsResponse>, Error> {
  return Ok(Json(list_rows(&state, &table_name).await?));
}

pub(crate) async fn list_rows(state: &AppState, table_name: &str) -> Result<ListRowsResponse, Error> {
  let Some(table) = state.schema_metadata().get_table(table_name) else {
    return Err(Error::TableNotFound(table_name.to_string()));
  };

  let columns: Vec<String> = table
    .columns()
    .iter()
    .map(|c| c.name.as_str().to_string())
    .collect();

  let query = format!(
    "SELECT {} FROM {}",
    table
      .columns()
      .iter()
      .map(|c| c.name.escaped())
      .collect::<Vec<_>>()
      .join(", "),
    table.name().escaped()
  );

  let rows = state.conn().read_query_rows(query, ()).await?;

  return Ok(ListRowsResponse {
    columns,
    rows: rows
      .into_iter()
      .map(|row| {
        row
          .into_values()
          .into_iter()
          .map(value_to_json)
          .collect::<Result<Vec<_>, _>>()
      })
      .collect::<Result<Vec<_>, _>>()?,
  });
}
