use rusqlite::types::Value;

use crate::batch::{BatchError, RowUpdate};
use crate::schema_metadata::{Identifier, TableMetadata};

/// A fully bound UPDATE for a single row.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct UpdateStatement {
  pub sql: String,
  pub params: Vec<Value>,
}

/// Validates every row against `table` and builds one statement per row, in input order.
///
/// Key values are bound as submitted, thus a row's WHERE clause never depends on what earlier
/// rows of the same batch wrote.
pub(crate) fn build_update_statements(
  table: &TableMetadata,
  rows: Vec<RowUpdate>,
) -> Result<Vec<UpdateStatement>, BatchError> {
  if rows.is_empty() {
    return Err(BatchError::InvalidRequest("empty batch".to_string()));
  }

  return rows
    .into_iter()
    .enumerate()
    .map(|(row_index, row)| build_update_statement(table, row_index, row))
    .collect();
}

fn build_update_statement(
  table: &TableMetadata,
  row_index: usize,
  row: RowUpdate,
) -> Result<UpdateStatement, BatchError> {
  let invalid = |msg: String| BatchError::InvalidRequest(format!("row {row_index}: {msg}"));

  if row.keys.is_empty() {
    return Err(invalid("no key columns".to_string()));
  }
  if row.fields.is_empty() {
    return Err(invalid("no columns to update".to_string()));
  }

  let column = |name: &str| -> Result<&Identifier, BatchError> {
    return table
      .column_by_name(name)
      .map(|c| &c.name)
      .ok_or_else(|| invalid(format!("unknown column '{name}' in '{}'", table.name())));
  };

  let mut params = Vec::<Value>::with_capacity(row.fields.len() + row.keys.len());

  let mut assignments = Vec::<String>::with_capacity(row.fields.len());
  for (name, value) in row.fields {
    if row.keys.contains_key(&name) {
      return Err(invalid(format!("'{name}' is both key and field")));
    }

    params.push(value);
    assignments.push(format!("{} = ?{}", column(&name)?.escaped(), params.len()));
  }

  let mut conditions = Vec::<String>::with_capacity(row.keys.len());
  for (name, value) in row.keys {
    if value == Value::Null {
      // NULL never compares equal, the row could never match.
      return Err(invalid(format!("key '{name}' is null")));
    }

    params.push(value);
    conditions.push(format!("{} = ?{}", column(&name)?.escaped(), params.len()));
  }

  return Ok(UpdateStatement {
    sql: format!(
      "UPDATE {} SET {} WHERE {}",
      table.name().escaped(),
      assignments.join(", "),
      conditions.join(" AND ")
    ),
    params,
  });
}
