use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use log::*;

use crate::admin::AdminError as Error;
use crate::app_state::AppState;

pub async fn drop_table_handler(
  State(state): State<AppState>,
  Path(table_name): Path<String>,
) -> Result<Response, Error> {
  drop_table(&state, &table_name).await?;

  return Ok((StatusCode::OK, "").into_response());
}

pub(crate) async fn drop_table(state: &AppState, table_name: &str) -> Result<(), Error> {
  let table = match state.schema_metadata().get_table(table_name) {
    Some(table) => table,
    None => {
      // May have been created after the cache was last built.
      state.refresh_schema_cache().await?;
      state
        .schema_metadata()
        .get_table(table_name)
        .ok_or_else(|| Error::TableNotFound(table_name.to_string()))?
    }
  };

  let query = format!("DROP TABLE {}", table.name().escaped());
  info!("dropping table: {query}");

  if let Err(err) = state.conn().execute_batch(query).await {
    state.refresh_schema_cache().await?;
    if state.schema_metadata().get_table(table_name).is_none() {
      return Err(Error::TableNotFound(table_name.to_string()));
    }
    return Err(err.into());
  }
  state.refresh_schema_cache().await?;

  return Ok(());
}
