use axum::extract::rejection::JsonRejection;
use axum::{
  Json,
  extract::State,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use log::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::admin::AdminError as Error;
use crate::app_state::AppState;
use crate::schema_metadata::Identifier;

/// Every table gets this auto-incrementing primary key.
const ID_COLUMN: &str = "id";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ColumnSpec {
  pub name: String,
  #[serde(rename = "type")]
  pub data_type: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateTableRequest {
  pub table_name: String,
  #[serde(default)]
  pub columns: Vec<ColumnSpec>,
  pub dry_run: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateTableResponse {
  pub sql: String,
}

pub async fn create_table_handler(
  State(state): State<AppState>,
  request: Result<Json<CreateTableRequest>, JsonRejection>,
) -> Result<Response, Error> {
  let Json(request) = request?;
  let dry_run = request.dry_run.unwrap_or(false);

  let response = create_table(&state, request).await?;

  let status = if dry_run {
    StatusCode::OK
  } else {
    StatusCode::CREATED
  };
  return Ok((status, Json(response)).into_response());
}

pub(crate) async fn create_table(
  state: &AppState,
  request: CreateTableRequest,
) -> Result<CreateTableResponse, Error> {
  let table_name = Identifier::new_name(&request.table_name)?;

  if table_exists(state, &table_name) {
    return Err(Error::AlreadyExists(format!("table '{table_name}'")));
  }

  let mut column_defs = vec![format!(
    "{} INTEGER PRIMARY KEY AUTOINCREMENT",
    Identifier::new_name(ID_COLUMN)?.escaped()
  )];
  let mut seen: Vec<String> = vec![ID_COLUMN.to_string()];

  for column in &request.columns {
    let name = Identifier::new_name(&column.name)?;

    let lowercase = name.as_str().to_ascii_lowercase();
    if seen.contains(&lowercase) {
      return Err(Error::BadRequest(
        format!("duplicate or reserved column '{name}'").into(),
      ));
    }
    seen.push(lowercase);

    let Some(data_type) = normalize_column_type(&column.data_type) else {
      return Err(Error::BadRequest(
        format!("unsupported type '{}' for column '{name}'", column.data_type).into(),
      ));
    };

    column_defs.push(format!("{} {data_type}", name.escaped()));
  }

  let sql = format!(
    "CREATE TABLE {} ({})",
    table_name.escaped(),
    column_defs.join(", ")
  );

  if request.dry_run.unwrap_or(false) {
    return Ok(CreateTableResponse { sql });
  }

  info!("creating table: {sql}");
  if let Err(err) = state.conn().execute_batch(sql.clone()).await {
    // The cache may be stale, e.g. the table was created by someone else in the meantime.
    state.refresh_schema_cache().await?;
    if table_exists(state, &table_name) {
      return Err(Error::AlreadyExists(format!("table '{table_name}'")));
    }
    return Err(err.into());
  }
  state.refresh_schema_cache().await?;

  return Ok(CreateTableResponse { sql });
}

/// SQLite identifiers are case-insensitive.
fn table_exists(state: &AppState, table_name: &Identifier) -> bool {
  return state
    .schema_metadata()
    .table_names()
    .iter()
    .any(|name| name.eq_ignore_ascii_case(table_name.as_str()));
}

/// Maps user supplied column types, including common aliases and length suffixes like
/// `VARCHAR(255)`, onto SQLite's type affinities.
fn normalize_column_type(data_type: &str) -> Option<&'static str> {
  lazy_static! {
    static ref TYPE_RE: Regex =
      Regex::new(r"^\s*([A-Za-z]+)\s*(?:\(\s*\d+\s*(?:,\s*\d+\s*)?\))?\s*$").expect("static");
  }

  let base = TYPE_RE.captures(data_type)?.get(1)?.as_str();
  return match base.to_ascii_uppercase().as_str() {
    "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" | "BOOL" => Some("INTEGER"),
    "REAL" | "FLOAT" | "DOUBLE" => Some("REAL"),
    "TEXT" | "VARCHAR" | "CHAR" | "STRING" => Some("TEXT"),
    "BLOB" => Some("BLOB"),
    "NUMERIC" | "DECIMAL" => Some("NUMERIC"),
    _ => None,
  };
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::app_state::test_state;

  fn column(name: &str, data_type: &str) -> ColumnSpec {
    return ColumnSpec {
      name: name.to_string(),
      data_type: data_type.to_string(),
    };
  }

  #[test]
  fn test_normalize_column_type() {
    assert_eq!(normalize_column_type("integer"), Some("INTEGER"));
    assert_eq!(normalize_column_type("INT"), Some("INTEGER"));
    assert_eq!(normalize_column_type("VARCHAR(255)"), Some("TEXT"));
    assert_eq!(normalize_column_type("decimal(10, 2)"), Some("NUMERIC"));
    assert_eq!(normalize_column_type("Boolean"), Some("INTEGER"));
    assert_eq!(normalize_column_type("double"), Some("REAL"));

    assert_eq!(normalize_column_type(""), None);
    assert_eq!(normalize_column_type("DATETIME"), None);
    assert_eq!(normalize_column_type("TEXT); DROP TABLE x; --"), None);
  }

  #[tokio::test]
  async fn test_create_table() {
    let state = test_state().await;

    let response = create_table(
      &state,
      CreateTableRequest {
        table_name: "person".to_string(),
        columns: vec![column("name", "VARCHAR(100)"), column("age", "int")],
        dry_run: Some(true),
      },
    )
    .await
    .unwrap();
    assert_eq!(
      response.sql,
      r#"CREATE TABLE "person" ("id" INTEGER PRIMARY KEY AUTOINCREMENT, "name" TEXT, "age" INTEGER)"#
    );
    assert!(state.schema_metadata().get_table("person").is_none());

    create_table(
      &state,
      CreateTableRequest {
        table_name: "person".to_string(),
        columns: vec![column("name", "VARCHAR(100)"), column("age", "int")],
        dry_run: None,
      },
    )
    .await
    .unwrap();

    let table = state.schema_metadata().get_table("person").unwrap();
    let pk: Vec<_> = table
      .primary_key_columns()
      .into_iter()
      .map(|c| c.name.as_str())
      .collect();
    assert_eq!(pk, vec!["id"]);
    assert_eq!(table.columns().len(), 3);

    assert!(matches!(
      create_table(
        &state,
        CreateTableRequest {
          table_name: "PERSON".to_string(),
          columns: vec![],
          dry_run: None,
        },
      )
      .await,
      Err(Error::AlreadyExists(_))
    ));
  }

  #[tokio::test]
  async fn test_create_table_with_stale_cache() {
    let state = test_state().await;

    // Not known to the schema cache yet.
    state
      .conn()
      .execute_batch("CREATE TABLE person (id INTEGER PRIMARY KEY)")
      .await
      .unwrap();
    assert!(state.schema_metadata().get_table("person").is_none());

    let result = create_table(
      &state,
      CreateTableRequest {
        table_name: "person".to_string(),
        columns: vec![column("name", "TEXT")],
        dry_run: None,
      },
    )
    .await;
    assert!(matches!(result, Err(Error::AlreadyExists(_))), "{result:?}");
    assert!(state.schema_metadata().get_table("person").is_some());
  }

  #[tokio::test]
  async fn test_create_table_rejects_invalid_input() {
    let state = test_state().await;

    let invalid = vec![
      ("_hidden", vec![column("a", "TEXT")]),
      ("sqlite_x", vec![column("a", "TEXT")]),
      ("bad name", vec![column("a", "TEXT")]),
      ("t", vec![column("id", "TEXT")]),
      ("t", vec![column("a", "TEXT"), column("A", "INTEGER")]),
      ("t", vec![column("a", "DATETIME")]),
      ("t", vec![column("a\"", "TEXT")]),
    ];

    for (table_name, columns) in invalid {
      let result = create_table(
        &state,
        CreateTableRequest {
          table_name: table_name.to_string(),
          columns,
          dry_run: None,
        },
      )
      .await;
      assert!(
        matches!(result, Err(Error::BadRequest(_)) | Err(Error::Schema(_))),
        "{table_name}: {result:?}"
      );
    }

    assert!(state.schema_metadata().table_names().is_empty());
  }
}
