use log::*;
use std::path::PathBuf;
use thiserror::Error;

use crate::app_state::{AppState, AppStateArgs};
use crate::schema_metadata::SchemaMetadataCache;
use crate::server::ServerOptions;

#[derive(Debug, Error)]
pub enum InitError {
  #[error("SQLite error: {0}")]
  Sqlite(#[from] tablegate_sqlite::Error),
  #[error("Rusqlite error: {0}")]
  Rusqlite(#[from] rusqlite::Error),
  #[error("IO error: {0}")]
  IO(#[from] std::io::Error),
  #[error("Schema error: {0}")]
  Schema(#[from] crate::schema_metadata::SchemaError),
}

/// Opens the main database, creating the file and its parent directories on first start. `None`
/// opens a private in-memory database.
pub async fn init_main_db(
  path: Option<PathBuf>,
  opts: tablegate_sqlite::Options,
) -> Result<tablegate_sqlite::Connection, InitError> {
  if let Some(parent) = path.as_ref().and_then(|p| p.parent())
    && !parent.as_os_str().is_empty()
  {
    tokio::fs::create_dir_all(parent).await?;
  }

  let conn = tablegate_sqlite::Connection::new(
    move || tablegate_sqlite::connect_sqlite(path.clone()),
    Some(opts),
  )?;

  return Ok(conn);
}

pub async fn init_app_state(opts: &ServerOptions) -> Result<AppState, InitError> {
  let conn = init_main_db(
    opts.db_path.clone(),
    tablegate_sqlite::Options {
      // Bounds waiting on locks held by other processes. Adds to the wait for the writer.
      busy_timeout: opts.acquire_timeout,
      n_read_threads: opts.read_threads,
    },
  )
  .await?;

  let schema_metadata = SchemaMetadataCache::new(conn.clone()).await?;
  debug!("Found tables: {:?}", schema_metadata.table_names());

  return Ok(AppState::new(AppStateArgs {
    conn,
    schema_metadata,
    acquire_timeout: opts.acquire_timeout,
    transaction_timeout: opts.transaction_timeout,
  }));
}
