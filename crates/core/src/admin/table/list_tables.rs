use axum::{Json, extract::State};

use crate::admin::AdminError as Error;
use crate::app_state::AppState;

/// Lists the names of all user tables, sorted.
pub async fn list_tables_handler(State(state): State<AppState>) -> Result<Json<Vec<String>>, Error> {
  return Ok(Json(state.schema_metadata().table_names()));
}
