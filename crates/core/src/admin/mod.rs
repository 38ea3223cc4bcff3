mod error;
mod rows;
mod table;

pub use error::AdminError;

use crate::app_state::AppState;
use axum::{
  Router,
  routing::{delete, get, post},
};

pub fn router() -> Router<AppState> {
  Router::new()
    // Row actions.
    .route(
      "/table/{table_name}/rows",
      get(rows::list_rows_handler).put(rows::update_rows_handler),
    )
    // Table actions.
    .route("/table", post(table::create_table_handler))
    .route("/table/{table_name}", delete(table::drop_table_handler))
    .route("/tables", get(table::list_tables_handler))
}
