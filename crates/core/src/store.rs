use async_trait::async_trait;
use log::*;
use rusqlite::types::Value;
use rusqlite::{ErrorCode, TransactionBehavior};
use std::time::{Duration, Instant};
use tablegate_sqlite::Params;
use thiserror::Error;

use crate::constants::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_TRANSACTION_TIMEOUT};

/// Number of SQLite VM instructions between deadline checks.
const PROGRESS_HANDLER_OPS: i32 = 1000;

/// Store failures, already classified by what the caller can do about them.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("Constraint violation: {0}")]
  Constraint(String),
  #[error("Timeout: {0}")]
  Timeout(String),
  #[error("Unavailable: {0}")]
  Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
  fn from(err: rusqlite::Error) -> Self {
    return match err {
      rusqlite::Error::SqliteFailure(ref e, _) => match e.code {
        ErrorCode::ConstraintViolation
        | ErrorCode::TypeMismatch
        | ErrorCode::ParameterOutOfRange
        | ErrorCode::TooBig => Self::Constraint(err.to_string()),
        ErrorCode::OperationInterrupted => Self::Timeout(err.to_string()),
        _ => Self::Unavailable(err.to_string()),
      },
      rusqlite::Error::ToSqlConversionFailure(_) | rusqlite::Error::IntegralValueOutOfRange(..) => {
        Self::Constraint(err.to_string())
      }
      _ => Self::Unavailable(err.to_string()),
    };
  }
}

impl From<tablegate_sqlite::Error> for StoreError {
  fn from(err: tablegate_sqlite::Error) -> Self {
    return match err {
      tablegate_sqlite::Error::Rusqlite(err) => err.into(),
      err => Self::Unavailable(err.to_string()),
    };
  }
}

/// A single open transaction.
pub trait StoreTransaction {
  /// Executes one statement with positional parameters bound to `?1`, `?2`, ... and returns the
  /// number of affected rows.
  fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize, StoreError>;
}

/// A store able to run a closure within a single transaction. The transaction commits if `f`
/// returns `Ok` and rolls back otherwise.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
  async fn transaction<F, R, E>(&self, f: F) -> Result<R, E>
  where
    F: FnOnce(&mut dyn StoreTransaction) -> Result<R, E> + Send + 'static,
    R: Send + 'static,
    E: From<StoreError> + Send + 'static;
}

struct SqliteTransaction<'a> {
  tx: &'a rusqlite::Transaction<'a>,
}

impl StoreTransaction for SqliteTransaction<'_> {
  fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize, StoreError> {
    debug!("executing: {sql}");

    let mut stmt = self.tx.prepare_cached(sql)?;
    params.bind(&mut stmt)?;
    return Ok(stmt.raw_execute()?);
  }
}

/// [TransactionalStore] backed by the writer of a [tablegate_sqlite::Connection].
#[derive(Clone, Debug)]
pub struct SqliteStore {
  conn: tablegate_sqlite::Connection,
  acquire_timeout: Duration,
  transaction_timeout: Duration,
}

impl SqliteStore {
  pub fn new(conn: tablegate_sqlite::Connection) -> Self {
    return Self {
      conn,
      acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
      transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
    };
  }

  pub fn with_timeouts(mut self, acquire_timeout: Duration, transaction_timeout: Duration) -> Self {
    self.acquire_timeout = acquire_timeout;
    self.transaction_timeout = transaction_timeout;
    return self;
  }

  pub fn conn(&self) -> &tablegate_sqlite::Connection {
    return &self.conn;
  }
}

#[async_trait]
impl TransactionalStore for SqliteStore {
  async fn transaction<F, R, E>(&self, f: F) -> Result<R, E>
  where
    F: FnOnce(&mut dyn StoreTransaction) -> Result<R, E> + Send + 'static,
    R: Send + 'static,
    E: From<StoreError> + Send + 'static,
  {
    let transaction_timeout = self.transaction_timeout;

    let result = self
      .conn
      .call_with_acquire_timeout(self.acquire_timeout, move |conn| {
        let deadline = Instant::now() + transaction_timeout;

        // Take the write lock upfront rather than failing on the first write.
        let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
          Ok(tx) => tx,
          Err(err) => return Ok(Err(E::from(StoreError::from(err)))),
        };

        tx.progress_handler(
          PROGRESS_HANDLER_OPS,
          Some(move || Instant::now() >= deadline),
        );
        let result = f(&mut SqliteTransaction { tx: &tx });
        // Commit and rollback must never be interrupted.
        tx.progress_handler(0, None::<fn() -> bool>);

        let result = match result {
          Ok(_) if Instant::now() >= deadline => Err(E::from(StoreError::Timeout(format!(
            "transaction exceeded {transaction_timeout:?}"
          )))),
          result => result,
        };

        return Ok(match result {
          Ok(value) => match tx.commit() {
            Ok(()) => Ok(value),
            Err(err) => {
              error!("Commit failed: {err}");
              Err(E::from(StoreError::from(err)))
            }
          },
          Err(err) => {
            // Rolls back unless SQLite already did, e.g. after an interrupt.
            if let Err(rollback_err) = tx.finish() {
              warn!("Rollback failed: {rollback_err}");
            }
            Err(err)
          }
        });
      })
      .await;

    return match result {
      Ok(result) => result,
      Err(err) => {
        error!("Store unavailable: {err}");
        Err(E::from(StoreError::from(err)))
      }
    };
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn setup() -> SqliteStore {
    let conn = tablegate_sqlite::Connection::open_in_memory().unwrap();
    conn
      .execute_batch(
        r#"
          CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE);
          INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b');
        "#,
      )
      .await
      .unwrap();
    return SqliteStore::new(conn);
  }

  async fn names(store: &SqliteStore) -> Vec<String> {
    return store
      .conn()
      .read_query_row_f("SELECT group_concat(name) FROM t ORDER BY id", (), |row| {
        row.get::<_, String>(0)
      })
      .await
      .unwrap()
      .unwrap()
      .split(',')
      .map(|s| s.to_string())
      .collect();
  }

  #[tokio::test]
  async fn test_commit_and_rollback() {
    let store = setup().await;

    let n: usize = store
      .transaction(|tx| -> Result<usize, StoreError> {
        let n = tx.execute(
          "UPDATE t SET name = ?1 WHERE id = ?2",
          &[Value::Text("x".to_string()), Value::Integer(1)],
        )?;
        return Ok(n);
      })
      .await
      .unwrap();
    assert_eq!(n, 1);
    assert_eq!(names(&store).await, vec!["x", "b"]);

    let result: Result<(), StoreError> = store
      .transaction(|tx| {
        tx.execute(
          "UPDATE t SET name = ?1 WHERE id = ?2",
          &[Value::Text("y".to_string()), Value::Integer(1)],
        )?;
        return Err(StoreError::Unavailable("abort".to_string()));
      })
      .await;
    assert!(result.is_err());
    assert_eq!(names(&store).await, vec!["x", "b"]);
  }

  #[tokio::test]
  async fn test_error_classification() {
    let store = setup().await;

    let result: Result<usize, StoreError> = store
      .transaction(|tx| {
        tx.execute(
          "UPDATE t SET name = ?1 WHERE id = ?2",
          &[Value::Text("b".to_string()), Value::Integer(1)],
        )
      })
      .await;
    assert!(matches!(result, Err(StoreError::Constraint(_))), "{result:?}");

    let result: Result<usize, StoreError> = store
      .transaction(|tx| {
        tx.execute(
          "UPDATE t SET name = ?1 WHERE id = ?2",
          &[Value::Null, Value::Integer(1)],
        )
      })
      .await;
    assert!(matches!(result, Err(StoreError::Constraint(_))), "{result:?}");

    store.conn().clone().close().await.unwrap();
    let result: Result<usize, StoreError> = store
      .transaction(|tx| tx.execute("SELECT 1", &[]))
      .await;
    assert!(matches!(result, Err(StoreError::Unavailable(_))), "{result:?}");
  }

  #[tokio::test]
  async fn test_database_locked_elsewhere() {
    let temp_dir = temp_dir::TempDir::new().unwrap();
    let path = temp_dir.child("main.db");
    let open = |busy_timeout: Duration| {
      let path = path.clone();
      tablegate_sqlite::Connection::new(
        move || tablegate_sqlite::connect_sqlite(Some(path.clone())),
        Some(tablegate_sqlite::Options {
          busy_timeout,
          n_read_threads: 0,
        }),
      )
      .unwrap()
    };

    let other = open(Duration::from_secs(5));
    other
      .execute_batch(
        r#"
          CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);
          INSERT INTO t (id, name) VALUES (1, 'a');
        "#,
      )
      .await
      .unwrap();
    other.execute("BEGIN IMMEDIATE", ()).await.unwrap();

    let acquire_timeout = Duration::from_millis(100);
    let store = SqliteStore::new(open(acquire_timeout))
      .with_timeouts(acquire_timeout, Duration::from_secs(30));

    let start = Instant::now();
    let result: Result<usize, StoreError> = store
      .transaction(|tx| {
        tx.execute(
          "UPDATE t SET name = ?1 WHERE id = ?2",
          &[Value::Text("b".to_string()), Value::Integer(1)],
        )
      })
      .await;
    assert!(matches!(result, Err(StoreError::Unavailable(_))), "{result:?}");
    // Queue wait plus busy wait.
    assert!(start.elapsed() < 2 * acquire_timeout + Duration::from_secs(1));

    other.execute("ROLLBACK", ()).await.unwrap();
  }

  #[tokio::test]
  async fn test_transaction_timeout() {
    let store = setup()
      .await
      .with_timeouts(Duration::from_secs(5), Duration::from_millis(100));

    let result: Result<usize, StoreError> = store
      .transaction(|tx| {
        tx.execute(
          "UPDATE t SET name = ?1 WHERE id = ?2",
          &[Value::Text("z".to_string()), Value::Integer(1)],
        )?;
        // Never terminates on its own.
        return tx.execute(
          r#"
            UPDATE t SET name = (
              WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
              SELECT COUNT(*) FROM c
            ) WHERE id = 2
          "#,
          &[],
        );
      })
      .await;
    assert!(matches!(result, Err(StoreError::Timeout(_))), "{result:?}");

    assert_eq!(names(&store).await, vec!["a", "b"]);

    // The connection remains usable and the deadline no longer applies.
    let n: usize = store
      .transaction(|tx| -> Result<usize, StoreError> {
        tx.execute(
          "UPDATE t SET name = ?1 WHERE id = ?2",
          &[Value::Text("c".to_string()), Value::Integer(2)],
        )
      })
      .await
      .unwrap();
    assert_eq!(n, 1);
  }
}
