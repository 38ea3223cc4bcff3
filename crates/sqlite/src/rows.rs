use rusqlite::{Statement, types};

/// Owned result set of a query, detached from the connection it was read on.
#[derive(Debug)]
pub struct Rows(pub(crate) Vec<Row>, pub(crate) Vec<String>);

pub(crate) fn column_names(stmt: &Statement<'_>) -> Vec<String> {
  return stmt
    .column_names()
    .into_iter()
    .map(|name| name.to_string())
    .collect();
}

impl Rows {
  pub fn from_rows(mut rows: rusqlite::Rows) -> rusqlite::Result<Self> {
    let names = rows.as_ref().map_or(vec![], column_names);

    let mut result = vec![];
    while let Some(row) = rows.next()? {
      result.push(Row::from_row(row, names.len())?);
    }

    return Ok(Self(result, names));
  }

  pub fn len(&self) -> usize {
    return self.0.len();
  }

  pub fn is_empty(&self) -> bool {
    return self.0.is_empty();
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Row> {
    return self.0.iter();
  }

  pub fn column_names(&self) -> &[String] {
    return &self.1;
  }
}

impl IntoIterator for Rows {
  type Item = Row;
  type IntoIter = std::vec::IntoIter<Row>;

  fn into_iter(self) -> Self::IntoIter {
    return self.0.into_iter();
  }
}

#[derive(Debug)]
pub struct Row(Vec<types::Value>);

impl Row {
  pub(crate) fn from_row(row: &rusqlite::Row, column_count: usize) -> rusqlite::Result<Self> {
    let mut values = Vec::<types::Value>::with_capacity(column_count);
    for idx in 0..column_count {
      values.push(row.get_ref(idx)?.into());
    }

    return Ok(Self(values));
  }

  pub fn get<T>(&self, idx: usize) -> types::FromSqlResult<T>
  where
    T: types::FromSql,
  {
    let Some(value) = self.0.get(idx) else {
      return Err(types::FromSqlError::Other("Index out of bounds".into()));
    };
    return T::column_result(value.into());
  }

  pub fn into_values(self) -> Vec<types::Value> {
    return self.0;
  }
}
