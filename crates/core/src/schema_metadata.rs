use lazy_static::lazy_static;
use log::*;
use parking_lot::RwLock;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tablegate_sqlite::params;
use thiserror::Error;

use crate::constants::{MAX_IDENTIFIER_LENGTH, SQLITE_SCHEMA_TABLE};

#[derive(Debug, Error)]
pub enum SchemaError {
  #[error("SQLite error: {0}")]
  Sql(#[from] tablegate_sqlite::Error),
  #[error("Invalid name: {0}")]
  InvalidName(String),
}

/// A table or column name that is safe to render into SQL.
///
/// Names of existing tables and columns are only handed out by the [SchemaMetadataCache], new
/// names have to pass [Identifier::new_name].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
  /// Validates a name for a yet to be created table or column.
  pub fn new_name(name: &str) -> Result<Self, SchemaError> {
    lazy_static! {
      static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static");
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
      return Err(SchemaError::InvalidName(format!(
        "'{name}' exceeds {MAX_IDENTIFIER_LENGTH} characters"
      )));
    }
    if !NAME_RE.is_match(name) {
      return Err(SchemaError::InvalidName(format!(
        "'{name}' must be alphanumeric and must not start with a digit"
      )));
    }
    if name.starts_with('_') || name.to_ascii_lowercase().starts_with("sqlite_") {
      return Err(SchemaError::InvalidName(format!(
        "'{name}' uses a reserved prefix"
      )));
    }

    return Ok(Self(name.to_string()));
  }

  pub fn as_str(&self) -> &str {
    return &self.0;
  }

  /// Double-quoted SQL identifier with embedded quotes doubled.
  pub fn escaped(&self) -> String {
    return format!("\"{}\"", self.0.replace('"', "\"\""));
  }
}

impl std::fmt::Display for Identifier {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Clone, Debug)]
pub struct ColumnMetadata {
  pub name: Identifier,
  pub decl_type: String,
  pub not_null: bool,
  /// 1-based position within the primary key, 0 if not part of it.
  pub pk: i64,
}

#[derive(Clone, Debug)]
pub struct TableMetadata {
  name: Identifier,
  columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
  pub fn name(&self) -> &Identifier {
    return &self.name;
  }

  pub fn columns(&self) -> &[ColumnMetadata] {
    return &self.columns;
  }

  pub fn column_by_name(&self, name: &str) -> Option<&ColumnMetadata> {
    return self.columns.iter().find(|c| c.name.as_str() == name);
  }

  /// Declared primary key columns in key order.
  pub fn primary_key_columns(&self) -> Vec<&ColumnMetadata> {
    let mut pk: Vec<_> = self.columns.iter().filter(|c| c.pk > 0).collect();
    pk.sort_by_key(|c| c.pk);
    return pk;
  }
}

struct SchemaMetadataCacheState {
  conn: tablegate_sqlite::Connection,
  tables: RwLock<HashMap<String, Arc<TableMetadata>>>,
}

/// Snapshot of user tables and their columns. Serves as the allow-list for every table or column
/// name received from a caller. Needs to be rebuilt after schema changes.
#[derive(Clone)]
pub struct SchemaMetadataCache {
  state: Arc<SchemaMetadataCacheState>,
}

impl SchemaMetadataCache {
  pub async fn new(conn: tablegate_sqlite::Connection) -> Result<Self, SchemaError> {
    let tables = lookup_tables(&conn).await?;

    return Ok(SchemaMetadataCache {
      state: Arc::new(SchemaMetadataCacheState {
        conn,
        tables: RwLock::new(tables),
      }),
    });
  }

  pub fn get_table(&self, table_name: &str) -> Option<Arc<TableMetadata>> {
    return self.state.tables.read().get(table_name).cloned();
  }

  /// Sorted names of all known tables.
  pub fn table_names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.state.tables.read().keys().cloned().collect();
    names.sort();
    return names;
  }

  pub async fn rebuild(&self) -> Result<(), SchemaError> {
    debug!("Rebuilding SchemaMetadataCache");
    let tables = lookup_tables(&self.state.conn).await?;
    *self.state.tables.write() = tables;
    return Ok(());
  }
}

impl std::fmt::Debug for SchemaMetadataCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SchemaMetadataCache")
      .field("tables", &self.state.tables.read().keys())
      .finish()
  }
}

async fn lookup_tables(
  conn: &tablegate_sqlite::Connection,
) -> Result<HashMap<String, Arc<TableMetadata>>, SchemaError> {
  #[derive(Debug, Deserialize)]
  struct SchemaEntry {
    name: String,
  }

  #[derive(Debug, Deserialize)]
  struct PragmaColumn {
    name: String,
    r#type: String,
    notnull: i64,
    pk: i64,
  }

  // Skip SQLite internal tables, e.g. sqlite_sequence, and service internal ones.
  let entries: Vec<SchemaEntry> = conn
    .read_query_values(
      format!(
        r#"SELECT name FROM {SQLITE_SCHEMA_TABLE}
           WHERE type = 'table' AND name NOT LIKE 'sqlite\_%' ESCAPE '\' AND name NOT LIKE '\_%' ESCAPE '\'"#
      ),
      (),
    )
    .await?;

  let mut tables = HashMap::<String, Arc<TableMetadata>>::with_capacity(entries.len());
  for entry in entries {
    let columns: Vec<PragmaColumn> = conn
      .read_query_values(
        "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1)",
        params!(entry.name.clone()),
      )
      .await?;

    if columns.is_empty() {
      // Dropped concurrently.
      continue;
    }

    let metadata = TableMetadata {
      name: Identifier(entry.name.clone()),
      columns: columns
        .into_iter()
        .map(|c| ColumnMetadata {
          name: Identifier(c.name),
          decl_type: c.r#type,
          not_null: c.notnull != 0,
          pk: c.pk,
        })
        .collect(),
    };

    tables.insert(entry.name, Arc::new(metadata));
  }

  return Ok(tables);
}
