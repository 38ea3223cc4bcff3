use log::*;

use crate::batch::statement::{UpdateStatement, build_update_statements};
use crate::batch::{ApplyResult, BatchError, RowUpdate, UpdateRequest};
use crate::schema_metadata::SchemaMetadataCache;
use crate::store::TransactionalStore;

/// Applies batches of row updates atomically: either every row is updated or none is.
///
/// A row whose keys match no existing row fails the entire batch. Rows are never retried.
#[derive(Clone, Debug)]
pub struct BatchRowUpdater<S> {
  store: S,
  schema_metadata: SchemaMetadataCache,
}

impl<S: TransactionalStore> BatchRowUpdater<S> {
  pub fn new(store: S, schema_metadata: SchemaMetadataCache) -> Self {
    return Self {
      store,
      schema_metadata,
    };
  }

  pub fn schema_metadata(&self) -> &SchemaMetadataCache {
    return &self.schema_metadata;
  }

  pub async fn apply(&self, table_name: &str, rows: Vec<RowUpdate>) -> ApplyResult {
    let num_rows = rows.len();
    return match self.try_apply(table_name, rows).await {
      Ok(rows_affected) => {
        debug!("Batch of {num_rows} rows on '{table_name}' committed: {rows_affected} affected");
        ApplyResult::Committed { rows_affected }
      }
      Err(err) => {
        if let BatchError::InvalidRequest(_) = err {
          debug!("Rejected batch on '{table_name}': {err}");
        } else {
          warn!("Rolled back batch of {num_rows} rows on '{table_name}': {err}");
        }
        ApplyResult::Failed(err.into())
      }
    };
  }

  pub async fn apply_request(&self, request: UpdateRequest) -> ApplyResult {
    return self.apply(&request.table, request.rows).await;
  }

  async fn try_apply(&self, table_name: &str, rows: Vec<RowUpdate>) -> Result<usize, BatchError> {
    if table_name.is_empty() {
      return Err(BatchError::InvalidRequest("missing table".to_string()));
    }
    let Some(table) = self.schema_metadata.get_table(table_name) else {
      return Err(BatchError::InvalidRequest(format!(
        "unknown table '{table_name}'"
      )));
    };

    // Everything is bound before the transaction starts.
    let statements = build_update_statements(&table, rows)?;

    return self
      .store
      .transaction(move |tx| -> Result<usize, BatchError> {
        let mut rows_affected: usize = 0;
        for (row_index, UpdateStatement { sql, params }) in statements.iter().enumerate() {
          let n = tx
            .execute(sql, params)
            .map_err(|err| BatchError::at_row(err, row_index))?;

          if n == 0 {
            return Err(BatchError::RowNotFound { row_index });
          }
          rows_affected += n;
        }
        return Ok(rows_affected);
      })
      .await;
  }
}
