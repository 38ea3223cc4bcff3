use indexmap::IndexMap;
use rusqlite::types::Value;

use crate::batch::BatchError;
use crate::value::json_to_value;

/// One row of a batch: `keys` select the row, `fields` are the new values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowUpdate {
  pub keys: IndexMap<String, Value>,
  pub fields: IndexMap<String, Value>,
}

impl RowUpdate {
  pub fn new(
    keys: impl IntoIterator<Item = (String, Value)>,
    fields: impl IntoIterator<Item = (String, Value)>,
  ) -> Self {
    return Self {
      keys: keys.into_iter().collect(),
      fields: fields.into_iter().collect(),
    };
  }

  /// Splits a flat JSON row object into keys and fields. Entries named in `key_columns` identify
  /// the row, everything else gets updated.
  pub fn from_json_object(
    row: serde_json::Map<String, serde_json::Value>,
    key_columns: &[String],
  ) -> Result<Self, BatchError> {
    let mut update = RowUpdate::default();
    for (column, value) in row {
      let value = json_to_value(value)
        .map_err(|err| BatchError::InvalidRequest(format!("column '{column}': {err}")))?;

      if key_columns.contains(&column) {
        update.keys.insert(column, value);
      } else {
        update.fields.insert(column, value);
      }
    }
    return Ok(update);
  }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateRequest {
  pub table: String,
  pub rows: Vec<RowUpdate>,
}
