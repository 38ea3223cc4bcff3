#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("Connection closed error")]
  ConnectionClosed,

  /// The writer did not pick up the call within the given duration. The call was discarded and
  /// never touched the database.
  #[error("Acquire timeout after {0:?}")]
  AcquireTimeout(std::time::Duration),

  /// An error occured while closing the SQLite connection.
  #[error("Close error: {0}")]
  Close(rusqlite::Error),

  #[error("Rusqlite error: {0}")]
  Rusqlite(#[from] rusqlite::Error),

  #[error("SerdeRusqlite error: {0}")]
  SerdeRusqlite(#[from] serde_rusqlite::Error),

  #[error("Other error: {0}")]
  Other(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}
