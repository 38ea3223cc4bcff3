use std::sync::Arc;
use std::time::Duration;

use crate::batch::BatchRowUpdater;
use crate::schema_metadata::{SchemaError, SchemaMetadataCache};
use crate::store::SqliteStore;

/// The app's internal state. AppState needs to be clonable which puts unnecessary constraints on
/// the internals. Thus rather arc once than many times.
struct InternalState {
  conn: tablegate_sqlite::Connection,
  schema_metadata: SchemaMetadataCache,
  batch_updater: BatchRowUpdater<SqliteStore>,
}

pub(crate) struct AppStateArgs {
  pub conn: tablegate_sqlite::Connection,
  pub schema_metadata: SchemaMetadataCache,
  pub acquire_timeout: Duration,
  pub transaction_timeout: Duration,
}

#[derive(Clone)]
pub struct AppState {
  state: Arc<InternalState>,
}

impl AppState {
  pub(crate) fn new(args: AppStateArgs) -> Self {
    let store = SqliteStore::new(args.conn.clone())
      .with_timeouts(args.acquire_timeout, args.transaction_timeout);

    return AppState {
      state: Arc::new(InternalState {
        conn: args.conn,
        batch_updater: BatchRowUpdater::new(store, args.schema_metadata.clone()),
        schema_metadata: args.schema_metadata,
      }),
    };
  }

  pub fn conn(&self) -> &tablegate_sqlite::Connection {
    return &self.state.conn;
  }

  pub fn schema_metadata(&self) -> &SchemaMetadataCache {
    return &self.state.schema_metadata;
  }

  pub fn batch_updater(&self) -> &BatchRowUpdater<SqliteStore> {
    return &self.state.batch_updater;
  }

  pub async fn refresh_schema_cache(&self) -> Result<(), SchemaError> {
    return self.state.schema_metadata.rebuild().await;
  }
}

impl std::fmt::Debug for AppState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AppState")
      .field("schema_metadata", &self.state.schema_metadata)
      .finish()
  }
}

#[cfg(test)]
pub(crate) async fn test_state() -> AppState {
  let conn = tablegate_sqlite::Connection::open_in_memory().unwrap();
  let schema_metadata = SchemaMetadataCache::new(conn.clone()).await.unwrap();

  return AppState::new(AppStateArgs {
    conn,
    schema_metadata,
    acquire_timeout: crate::constants::DEFAULT_ACQUIRE_TIMEOUT,
    transaction_timeout: crate::constants::DEFAULT_TRANSACTION_TIMEOUT,
  });
}
