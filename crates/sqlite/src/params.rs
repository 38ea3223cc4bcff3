use rusqlite::types::ToSqlOutput;
use rusqlite::{Result, Statement, types};

/// Owned value bound by the [crate::params] macro.
#[derive(Debug)]
pub struct ToSqlType(types::Value);

impl rusqlite::ToSql for ToSqlType {
  #[inline]
  fn to_sql(&self) -> Result<ToSqlOutput<'_>> {
    return Ok(ToSqlOutput::Borrowed(types::ValueRef::from(&self.0)));
  }
}

impl From<String> for ToSqlType {
  #[inline]
  fn from(s: String) -> Self {
    return ToSqlType(types::Value::Text(s));
  }
}

/// Binds a set of values to a prepared statement. Params bind positionally to `?1`, `?2`, ...
pub trait Params {
  fn bind(self, stmt: &mut Statement<'_>) -> rusqlite::Result<()>;
}

impl Params for () {
  fn bind(self, _stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    return Ok(());
  }
}

impl Params for &[types::Value] {
  fn bind(self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    for (idx, p) in self.iter().enumerate() {
      stmt.raw_bind_parameter(idx + 1, p)?;
    }
    return Ok(());
  }
}

impl<const N: usize> Params for [ToSqlType; N] {
  fn bind(self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    for (idx, p) in self.into_iter().enumerate() {
      stmt.raw_bind_parameter(idx + 1, p)?;
    }
    return Ok(());
  }
}
