use kanal::{Receiver, Sender};
use log::*;
use parking_lot::RwLock;
use rusqlite::fallible_iterator::FallibleIterator;
use std::path::PathBuf;
use std::{
  fmt::{self, Debug},
  sync::Arc,
  time::Duration,
};
use tokio::sync::oneshot;

use crate::error::Error;
pub use crate::params::Params;
use crate::rows::{Row, Rows, column_names};

#[macro_export]
macro_rules! params {
    () => {
        [] as [$crate::params::ToSqlType]
    };
    ($($param:expr),+ $(,)?) => {
        [$(Into::<$crate::params::ToSqlType>::into($param)),+]
    };
}

#[derive(Default)]
struct ConnectionVec(Vec<rusqlite::Connection>);

// NOTE: We must never access the same connection concurrently even as immutable &Connection, due
// to intrinsic statement cache. We can ensure this by uniquely assigning one connection to each
// thread.
unsafe impl Sync for ConnectionVec {}

/// The result returned on method calls in this crate.
pub type Result<T> = std::result::Result<T, Error>;

enum Message {
  RunMut(Box<dyn FnOnce(&mut rusqlite::Connection) + Send + 'static>),
  RunConst(Box<dyn FnOnce(&rusqlite::Connection) + Send + 'static>),
  Terminate,
}

#[derive(Clone, Debug)]
pub struct Options {
  pub busy_timeout: Duration,
  pub n_read_threads: usize,
}

impl Default for Options {
  fn default() -> Self {
    return Self {
      busy_timeout: Duration::from_secs(5),
      n_read_threads: 0,
    };
  }
}

/// Opens a new SQLite connection at `path` or in memory and applies our default pragmas.
pub fn connect_sqlite(path: Option<PathBuf>) -> rusqlite::Result<rusqlite::Connection> {
  let conn = match path {
    Some(ref path) => rusqlite::Connection::open(path)?,
    None => rusqlite::Connection::open_in_memory()?,
  };

  conn.pragma_update(None, "foreign_keys", "ON")?;
  if path.is_some() {
    // WAL isn't supported for in-memory databases.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
  }

  return Ok(conn);
}

/// A handle to call functions in background thread.
///
/// All writes go through a single writer thread owning the primary connection. This bounds the
/// number of concurrently open write transactions to one. Reads may be spread over additional
/// reader threads.
#[derive(Clone)]
pub struct Connection {
  reader: Sender<Message>,
  writer: Sender<Message>,
  conns: Arc<RwLock<ConnectionVec>>,
}

impl Connection {
  pub fn new<E>(
    builder: impl Fn() -> std::result::Result<rusqlite::Connection, E>,
    opt: Option<Options>,
  ) -> std::result::Result<Self, E>
  where
    E: From<rusqlite::Error>,
  {
    let new_conn = || -> std::result::Result<rusqlite::Connection, E> {
      let conn = builder()?;
      if let Some(timeout) = opt.as_ref().map(|o| o.busy_timeout) {
        conn.busy_timeout(timeout)?;
      }
      return Ok(conn);
    };

    let write_conn = new_conn()?;
    let in_memory = write_conn.path().is_none_or(|s| {
      // Returns empty string for in-memory databases.
      return s.is_empty();
    });

    let n_read_threads: i64 = match (in_memory, opt.as_ref().map_or(0, |o| o.n_read_threads)) {
      (true, _) => {
        // We cannot share an in-memory database across threads, they're all independent.
        0
      }
      (false, 1) => {
        warn!("A single reader thread won't improve performance, falling back to 0.");
        0
      }
      (false, n) => {
        if let Ok(max) = std::thread::available_parallelism()
          && n > max.get()
        {
          warn!(
            "Num read threads '{n}' exceeds hardware parallelism: {}",
            max.get()
          );
        }
        n as i64
      }
    };

    let conns = Arc::new(RwLock::new(ConnectionVec({
      let mut conns = vec![write_conn];
      for _ in 0..(n_read_threads - 1).max(0) {
        conns.push(new_conn()?);
      }
      conns
    })));

    // Spawn writer.
    let (shared_write_sender, shared_write_receiver) = kanal::unbounded::<Message>();
    {
      let conns = conns.clone();
      spawn_event_loop("tg-sqlite-writer".to_string(), move || {
        event_loop(0, conns, shared_write_receiver)
      });
    }

    // Spawn readers.
    let shared_read_sender = if n_read_threads > 0 {
      let (shared_read_sender, shared_read_receiver) = kanal::unbounded::<Message>();
      for i in 0..n_read_threads {
        // NOTE: read and writer threads are sharing the first conn, given they're mutually
        // exclusive.
        let index = i as usize;
        let shared_read_receiver = shared_read_receiver.clone();
        let conns = conns.clone();

        spawn_event_loop(format!("tg-sqlite-reader-{index}"), move || {
          event_loop(index, conns, shared_read_receiver)
        });
      }
      shared_read_sender
    } else {
      shared_write_sender.clone()
    };

    debug!(
      "Opened SQLite DB '{}' with {n_read_threads} reader threads",
      conns
        .read()
        .0
        .first()
        .and_then(|c| c.path())
        .unwrap_or("<in-memory>")
    );

    return Ok(Self {
      reader: shared_read_sender,
      writer: shared_write_sender,
      conns,
    });
  }

  /// Open a new connection to an in-memory SQLite database.
  ///
  /// # Failure
  ///
  /// Will return `Err` if the underlying SQLite open call fails.
  pub fn open_in_memory() -> Result<Self> {
    return Self::new(|| Ok(connect_sqlite(None)?), None);
  }

  /// Call a function in background thread and get the result
  /// asynchronously.
  ///
  /// # Failure
  ///
  /// Will return `Err` if the database connection has been closed.
  #[inline]
  pub async fn call<F, R>(&self, function: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let (sender, receiver) = oneshot::channel::<Result<R>>();

    self
      .writer
      .send(Message::RunMut(Box::new(move |conn| {
        if !sender.is_closed() {
          let _ = sender.send(function(conn));
        }
      })))
      .map_err(|_| Error::ConnectionClosed)?;

    receiver.await.map_err(|_| Error::ConnectionClosed)?
  }

  /// Like [`Connection::call`] but gives up if the writer thread hasn't picked up `function`
  /// within `timeout`, e.g. because it is busy with other writes.
  ///
  /// A call that timed out is guaranteed to never run. Once `function` started, it runs to
  /// completion even if the returned future is dropped.
  pub async fn call_with_acquire_timeout<F, R>(&self, timeout: Duration, function: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let (started_sender, mut started_receiver) = oneshot::channel::<()>();
    let (sender, receiver) = oneshot::channel::<Result<R>>();

    self
      .writer
      .send(Message::RunMut(Box::new(move |conn| {
        if started_sender.send(()).is_err() {
          // Caller gave up waiting.
          return;
        }
        let _ = sender.send(function(conn));
      })))
      .map_err(|_| Error::ConnectionClosed)?;

    if tokio::time::timeout(timeout, &mut started_receiver)
      .await
      .is_err()
    {
      // Close first so the writer cannot start after we checked.
      started_receiver.close();
      if started_receiver.try_recv().is_err() {
        debug!("Writer not available within {timeout:?}");
        return Err(Error::AcquireTimeout(timeout));
      }
    }

    receiver.await.map_err(|_| Error::ConnectionClosed)?
  }

  #[inline]
  pub async fn call_reader<F, R>(&self, function: F) -> Result<R>
  where
    F: FnOnce(&rusqlite::Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let (sender, receiver) = oneshot::channel::<Result<R>>();

    self
      .reader
      .send(Message::RunConst(Box::new(move |conn| {
        if !sender.is_closed() {
          let _ = sender.send(function(conn));
        }
      })))
      .map_err(|_| Error::ConnectionClosed)?;

    receiver.await.map_err(|_| Error::ConnectionClosed)?
  }

  /// Query SQL statement.
  pub async fn read_query_rows(
    &self,
    sql: impl AsRef<str> + Send + 'static,
    params: impl Params + Send + 'static,
  ) -> Result<Rows> {
    return self
      .call_reader(move |conn: &rusqlite::Connection| {
        let mut stmt = conn.prepare_cached(sql.as_ref())?;
        if !stmt.readonly() {
          return Err(Error::Other("not a read-only statement".into()));
        }

        params.bind(&mut stmt)?;
        let rows = stmt.raw_query();
        Ok(Rows::from_rows(rows)?)
      })
      .await;
  }

  #[inline]
  pub async fn read_query_row_f<T, E>(
    &self,
    sql: impl AsRef<str> + Send + 'static,
    params: impl Params + Send + 'static,
    f: impl (FnOnce(&rusqlite::Row<'_>) -> std::result::Result<T, E>) + Send + 'static,
  ) -> Result<Option<T>>
  where
    T: Send + 'static,
    crate::error::Error: From<E>,
  {
    return self
      .call_reader(move |conn: &rusqlite::Connection| {
        let mut stmt = conn.prepare_cached(sql.as_ref())?;
        params.bind(&mut stmt)?;

        let mut rows = stmt.raw_query();

        if let Some(row) = rows.next()? {
          return Ok(Some(f(row)?));
        }
        Ok(None)
      })
      .await;
  }

  pub async fn read_query_value<T: serde::de::DeserializeOwned + Send + 'static>(
    &self,
    sql: impl AsRef<str> + Send + 'static,
    params: impl Params + Send + 'static,
  ) -> Result<Option<T>> {
    return self
      .read_query_row_f(sql, params, serde_rusqlite::from_row)
      .await;
  }

  pub async fn read_query_values<T: serde::de::DeserializeOwned + Send + 'static>(
    &self,
    sql: impl AsRef<str> + Send + 'static,
    params: impl Params + Send + 'static,
  ) -> Result<Vec<T>> {
    return self
      .call_reader(move |conn: &rusqlite::Connection| {
        let mut stmt = conn.prepare_cached(sql.as_ref())?;
        params.bind(&mut stmt)?;
        let mut rows = stmt.raw_query();

        let mut values = vec![];
        while let Some(row) = rows.next()? {
          values.push(serde_rusqlite::from_row(row)?);
        }
        return Ok(values);
      })
      .await;
  }

  /// Execute SQL statement.
  pub async fn execute(
    &self,
    sql: impl AsRef<str> + Send + 'static,
    params: impl Params + Send + 'static,
  ) -> Result<usize> {
    return self
      .call(move |conn: &mut rusqlite::Connection| {
        let mut stmt = conn.prepare_cached(sql.as_ref())?;
        params.bind(&mut stmt)?;

        let n = stmt.raw_execute()?;

        return Ok(n);
      })
      .await;
  }

  /// Batch execute SQL statements and return rows of last statement.
  pub async fn execute_batch(&self, sql: impl AsRef<str> + Send + 'static) -> Result<Option<Rows>> {
    return self
      .call(move |conn: &mut rusqlite::Connection| {
        let batch = rusqlite::Batch::new(conn, sql.as_ref());

        let mut p = batch.peekable();
        while let Some(mut stmt) = p.next()? {
          let mut rows = stmt.raw_query();
          let row = rows.next()?;

          match p.peek()? {
            Some(_) => {}
            None => {
              if let Some(row) = row {
                let names = column_names(row.as_ref());

                let mut result = vec![Row::from_row(row, names.len())?];
                while let Some(row) = rows.next()? {
                  result.push(Row::from_row(row, names.len())?);
                }
                return Ok(Some(Rows(result, names)));
              }

              return Ok(None);
            }
          }
        }

        return Ok(None);
      })
      .await;
  }

  /// Close the database connection.
  ///
  /// This is functionally equivalent to the `Drop` implementation for `Connection`.
  ///
  /// If successful, any following `close` operations performed on `Connection` copies will succeed
  /// immediately.
  ///
  /// # Failure
  ///
  /// Will return `Err` if the underlying SQLite close call fails.
  pub async fn close(self) -> Result<()> {
    let _ = self.writer.send(Message::Terminate);
    while self.reader.send(Message::Terminate).is_ok() {
      // Continue to close readers while the channel is alive.
    }

    let mut errors = vec![];
    let conns: ConnectionVec = std::mem::take(&mut self.conns.write());
    for conn in conns.0 {
      if let Err((_, err)) = conn.close() {
        errors.push(err);
      };
    }

    if !errors.is_empty() {
      debug!("Closing connection: {errors:?}");
      return Err(Error::Close(errors.swap_remove(0)));
    }

    return Ok(());
  }
}

impl Debug for Connection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Connection").finish()
  }
}

fn spawn_event_loop(name: String, f: impl FnOnce() + Send + 'static) {
  if let Err(err) = std::thread::Builder::new().name(name.clone()).spawn(f) {
    // Dropping the receiver closes the channel, all calls will fail with ConnectionClosed.
    error!("Failed to spawn '{name}': {err}");
  }
}

fn event_loop(id: usize, conns: Arc<RwLock<ConnectionVec>>, receiver: Receiver<Message>) {
  while let Ok(message) = receiver.recv() {
    match message {
      Message::RunConst(f) => {
        let lock = conns.read();
        let Some(conn) = lock.0.get(id) else {
          return;
        };
        f(conn)
      }
      Message::RunMut(f) => {
        let mut lock = conns.write();
        let Some(conn) = lock.0.get_mut(0) else {
          return;
        };
        f(conn)
      }
      Message::Terminate => {
        return;
      }
    };
  }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
