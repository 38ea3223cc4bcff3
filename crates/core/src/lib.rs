#![forbid(unsafe_code, clippy::unwrap_used)]
#![allow(clippy::needless_return)]
#![warn(clippy::await_holding_lock, clippy::inefficient_to_string)]

pub mod app_state;
pub mod batch;
pub mod constants;
pub mod logging;
pub mod store;
pub mod value;

mod admin;
mod schema_metadata;
mod server;

pub use app_state::AppState;
pub use server::{InitError, Server, ServerOptions};

pub mod api {
  pub use crate::admin::AdminError;
  pub use crate::schema_metadata::{
    ColumnMetadata, Identifier, SchemaError, SchemaMetadataCache, TableMetadata,
  };
  pub use crate::server::{init_app_state, init_main_db};
}
