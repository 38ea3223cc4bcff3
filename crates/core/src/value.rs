use base64::prelude::*;
use log::*;
use rusqlite::types::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValueError {
  #[error("SerdeJson error: {0}")]
  SerdeJson(#[from] serde_json::Error),
  #[error("Not a valid number: {0}")]
  NotANumber(String),
  #[error("Float not finite")]
  Finite,
}

/// Converts a caller supplied JSON value into a SQLite value.
///
/// Booleans become 0/1 and nested arrays or objects are stored as their JSON text, which matches
/// how SQLite itself treats JSON.
pub fn json_to_value(value: serde_json::Value) -> Result<Value, ValueError> {
  return Ok(match value {
    serde_json::Value::Null => Value::Null,
    serde_json::Value::Bool(b) => Value::Integer(b as i64),
    serde_json::Value::String(s) => Value::Text(s),
    serde_json::Value::Number(number) => {
      if let Some(n) = number.as_i64() {
        Value::Integer(n)
      } else if number.is_u64() {
        // Doesn't fit into SQLite's 64bit signed integer.
        return Err(ValueError::NotANumber(number.to_string()));
      } else if let Some(n) = number.as_f64() {
        Value::Real(n)
      } else {
        warn!("Not a valid number: {number:?}");
        return Err(ValueError::NotANumber(number.to_string()));
      }
    }
    v @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
      Value::Text(serde_json::to_string(&v)?)
    }
  });
}

/// Converts a SQLite value into JSON. Blobs are rendered as url-safe base64.
pub fn value_to_json(value: Value) -> Result<serde_json::Value, ValueError> {
  return Ok(match value {
    Value::Null => serde_json::Value::Null,
    Value::Real(real) => {
      let Some(number) = serde_json::Number::from_f64(real) else {
        return Err(ValueError::Finite);
      };
      serde_json::Value::Number(number)
    }
    Value::Integer(integer) => serde_json::Value::Number(serde_json::Number::from(integer)),
    Value::Blob(blob) => serde_json::Value::String(BASE64_URL_SAFE.encode(blob)),
    Value::Text(text) => serde_json::Value::String(text),
  });
}
