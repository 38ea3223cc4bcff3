use rusqlite::ErrorCode;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::{Connection, Error, Options, connect_sqlite, params};

#[tokio::test]
async fn open_in_memory_test() {
  let conn = Connection::open_in_memory();
  assert!(conn.is_ok());
}

#[tokio::test]
async fn call_success_test() {
  let conn = Connection::open_in_memory().unwrap();

  let result = conn
    .call(|conn| {
      conn
        .execute(
          "CREATE TABLE person(id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);",
          [],
        )
        .map_err(|e| e.into())
    })
    .await;

  assert_eq!(0, result.unwrap());
}

#[tokio::test]
async fn call_failure_test() {
  let conn = Connection::open_in_memory().unwrap();

  let result = conn
    .call(|conn| conn.execute("Invalid sql", []).map_err(|e| e.into()))
    .await;

  let Err(Error::Rusqlite(err)) = result else {
    panic!("expected rusqlite error: {result:?}");
  };
  assert!(err.to_string().contains("syntax error"), "{err}");
}

#[tokio::test]
async fn close_success_test() {
  let conn = Connection::open_in_memory().unwrap();

  assert!(conn.close().await.is_ok());
}

#[tokio::test]
async fn double_close_test() {
  let conn = Connection::open_in_memory().unwrap();

  let conn2 = conn.clone();

  assert!(conn.close().await.is_ok());
  assert!(conn2.close().await.is_ok());
}

#[tokio::test]
async fn close_call_test() {
  let conn = Connection::open_in_memory().unwrap();

  let conn2 = conn.clone();

  assert!(conn.close().await.is_ok());

  let result = conn2
    .call(|conn| conn.execute("SELECT 1;", []).map_err(|e| e.into()))
    .await;

  assert!(matches!(result.unwrap_err(), Error::ConnectionClosed));
}

#[tokio::test]
async fn read_and_write_query_test() {
  let conn = Connection::open_in_memory().unwrap();

  conn
    .execute_batch(
      r#"
        CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL);
        INSERT INTO person (id, name, score) VALUES (1, 'Alice', 1.5), (2, 'Bob', NULL);
      "#,
    )
    .await
    .unwrap();

  let n = conn
    .execute(
      "UPDATE person SET name = ?1 WHERE name = ?2",
      params!("Carol".to_string(), "Bob".to_string()),
    )
    .await
    .unwrap();
  assert_eq!(n, 1);

  let rows = conn
    .read_query_rows("SELECT * FROM person ORDER BY id", ())
    .await
    .unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(rows.column_names(), ["id", "name", "score"]);
  let carol = rows.iter().nth(1).unwrap();
  assert_eq!(carol.get::<String>(1).unwrap(), "Carol");
  assert_eq!(carol.get::<Option<f64>>(2).unwrap(), None);

  #[derive(Debug, Deserialize, PartialEq)]
  struct Person {
    id: i64,
    name: String,
  }

  let people: Vec<Person> = conn
    .read_query_values("SELECT id, name FROM person ORDER BY id", ())
    .await
    .unwrap();
  assert_eq!(
    people,
    vec![
      Person {
        id: 1,
        name: "Alice".to_string()
      },
      Person {
        id: 2,
        name: "Carol".to_string()
      },
    ]
  );

  let person: Option<Person> = conn
    .read_query_value(
      "SELECT id, name FROM person WHERE name = ?1",
      params!("Dave".to_string()),
    )
    .await
    .unwrap();
  assert_eq!(person, None);
}

#[tokio::test]
async fn read_query_rejects_writes_test() {
  let conn = Connection::open_in_memory().unwrap();
  conn
    .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);")
    .await
    .unwrap();

  let result = conn
    .read_query_rows("INSERT INTO t (id) VALUES (1) RETURNING id", ())
    .await;
  assert!(matches!(result, Err(Error::Other(_))));
}

#[tokio::test]
async fn acquire_timeout_test() {
  let conn = Connection::open_in_memory().unwrap();

  // Occupy the writer thread.
  let (started_sender, started_receiver) = tokio::sync::oneshot::channel::<()>();
  let (release_sender, release_receiver) = std::sync::mpsc::channel::<()>();
  let blocker = {
    let conn = conn.clone();
    tokio::spawn(async move {
      conn
        .call(move |_conn| {
          let _ = started_sender.send(());
          let _ = release_receiver.recv();
          Ok(())
        })
        .await
    })
  };
  started_receiver.await.unwrap();

  let ran = Arc::new(AtomicBool::new(false));
  let result = {
    let ran = ran.clone();
    conn
      .call_with_acquire_timeout(Duration::from_millis(50), move |_conn| {
        ran.store(true, Ordering::SeqCst);
        Ok(())
      })
      .await
  };
  assert!(matches!(result, Err(Error::AcquireTimeout(_))), "{result:?}");

  release_sender.send(()).unwrap();
  blocker.await.unwrap().unwrap();

  // Make sure the writer drained the queue before checking that the timed out call never ran.
  conn.call(|_conn| Ok(())).await.unwrap();
  assert!(!ran.load(Ordering::SeqCst));

  let value = conn
    .call_with_acquire_timeout(Duration::from_secs(5), |conn| {
      Ok(conn.query_row("SELECT 5", [], |row| row.get::<_, i64>(0))?)
    })
    .await
    .unwrap();
  assert_eq!(value, 5);
}

#[tokio::test]
async fn busy_timeout_across_connections_test() {
  let temp_dir = temp_dir::TempDir::new().unwrap();
  let path = temp_dir.child("busy.db");

  let opts = Options {
    busy_timeout: Duration::from_millis(50),
    n_read_threads: 0,
  };
  let builder = {
    let path = path.clone();
    move || connect_sqlite(Some(path.clone()))
  };

  let conn0 = Connection::new(builder.clone(), Some(opts.clone())).unwrap();
  let conn1 = Connection::new(builder, Some(opts)).unwrap();

  conn0
    .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);")
    .await
    .unwrap();

  // Hold a write lock on conn0 while conn1 tries to write.
  conn0.execute("BEGIN IMMEDIATE", ()).await.unwrap();

  let result = conn1.execute("INSERT INTO t (id) VALUES (1)", ()).await;
  let Err(Error::Rusqlite(err)) = result else {
    panic!("expected busy error: {result:?}");
  };
  assert_eq!(err.sqlite_error_code(), Some(ErrorCode::DatabaseBusy));

  conn0.execute("ROLLBACK", ()).await.unwrap();
  assert_eq!(
    conn1
      .execute("INSERT INTO t (id) VALUES (1)", ())
      .await
      .unwrap(),
    1
  );
}

#[tokio::test]
async fn read_threads_test() {
  let temp_dir = temp_dir::TempDir::new().unwrap();
  let path = temp_dir.child("readers.db");

  let conn = Connection::new(
    move || connect_sqlite(Some(path.clone())),
    Some(Options {
      n_read_threads: 2,
      ..Default::default()
    }),
  )
  .unwrap();

  conn
    .execute_batch(
      "CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t (id) VALUES (1), (2), (3);",
    )
    .await
    .unwrap();

  let count: i64 = conn
    .read_query_row_f("SELECT COUNT(*) FROM t", (), |row| row.get(0))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(count, 3);

  conn.close().await.unwrap();
}
