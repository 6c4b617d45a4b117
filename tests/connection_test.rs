//! Integration tests for query operations on a SQLite backend.

use db_backends::{Backend, BackendOptions, Connection, DbError, QueryParam, Statement};
use futures_util::TryStreamExt;
use serde_json::json;
use tempfile::{NamedTempFile, TempPath};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Connected backend with a `notes` table, plus an acquired connection.
async fn setup() -> (Backend, Connection, TempPath) {
    init_tracing();
    let path = NamedTempFile::new().unwrap().into_temp_path();
    let url = format!("sqlite:///{}", path.display());
    let backend = Backend::new(&url, BackendOptions::new()).unwrap();
    backend.connect().await.unwrap();

    let mut conn = backend.acquire().await.unwrap();
    conn.execute(
        "CREATE TABLE notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            text TEXT NOT NULL,
            score REAL,
            data BLOB
        )",
    )
    .await
    .unwrap();
    (backend, conn, path)
}

async fn count_notes(conn: &mut Connection) -> i64 {
    let row = conn
        .fetch_one("SELECT COUNT(*) AS n FROM notes")
        .await
        .unwrap()
        .unwrap();
    row.get("n").and_then(|v| v.as_i64()).unwrap()
}

#[tokio::test]
async fn test_fetch_all_empty_is_empty_vec() {
    let (backend, mut conn, _path) = setup().await;

    let rows = conn.fetch_all("SELECT id, text FROM notes").await.unwrap();
    assert!(rows.is_empty());

    conn.release().await.unwrap();
    backend.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_fetch_one_distinguishes_no_row_from_null_row() {
    let (backend, mut conn, _path) = setup().await;

    let none = conn
        .fetch_one("SELECT text FROM notes WHERE id = 999")
        .await
        .unwrap();
    assert!(none.is_none());

    let nulls = conn
        .fetch_one("SELECT NULL AS a, NULL AS b")
        .await
        .unwrap()
        .expect("a row of nulls is still a row");
    assert_eq!(nulls.len(), 2);
    assert!(nulls.values().iter().all(|v| v.is_null()));

    conn.release().await.unwrap();
    backend.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_execute_reports_id_and_rows_separately() {
    let (backend, mut conn, _path) = setup().await;

    let first = conn
        .execute("INSERT INTO notes (text) VALUES ('first')")
        .await
        .unwrap();
    assert_eq!(first.rows_affected, 1);
    assert_eq!(first.last_insert_id, Some(1));

    let second = conn
        .execute(
            &Statement::new("INSERT INTO notes (text, score) VALUES (?, ?)")
                .bind("second")
                .bind(2.5),
        )
        .await
        .unwrap();
    assert_eq!(second.rows_affected, 1);
    assert_eq!(second.last_insert_id, Some(2));

    let updated = conn
        .execute("UPDATE notes SET score = 1.0")
        .await
        .unwrap();
    assert_eq!(updated.rows_affected, 2);
    assert_eq!(updated.last_insert_id, None);

    let deleted = conn
        .execute("DELETE FROM notes WHERE text = 'first'")
        .await
        .unwrap();
    assert_eq!(deleted.rows_affected, 1);
    assert_eq!(deleted.last_insert_id, None);

    // An insert that matches nothing reports no id either
    let none = conn
        .execute("INSERT INTO notes (text) SELECT text FROM notes WHERE 0")
        .await
        .unwrap();
    assert_eq!(none.rows_affected, 0);
    assert_eq!(none.last_insert_id, None);

    let third = conn
        .execute("INSERT INTO notes (text) VALUES ('third')")
        .await
        .unwrap();
    assert_eq!(third.last_insert_id, Some(3));

    conn.release().await.unwrap();
    backend.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_execute_many_has_no_implicit_atomicity() {
    let (backend, mut conn, _path) = setup().await;

    let err = conn
        .execute_many([
            "INSERT INTO notes (text) VALUES ('one')",
            "INSERT INTO notes (text) VALUES ('two')",
            "INSERT INTO missing_table (text) VALUES ('three')",
            "INSERT INTO notes (text) VALUES ('four')",
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Driver(_)));

    // Statements before the failure stay applied, later ones never ran
    assert_eq!(count_notes(&mut conn).await, 2);

    conn.release().await.unwrap();
    backend.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_execute_many_with_bound_statements() {
    let (backend, mut conn, _path) = setup().await;

    let statements: Vec<Statement> = ["a", "b", "c"]
        .into_iter()
        .map(|text| {
            Statement::new("INSERT INTO notes (text) VALUES (:text)").bind_named("text", text)
        })
        .collect();
    conn.execute_many(&statements).await.unwrap();
    assert_eq!(count_notes(&mut conn).await, 3);

    conn.release().await.unwrap();
    backend.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_iterate_streams_rows_in_order() {
    let (backend, mut conn, _path) = setup().await;
    for text in ["a", "b", "c", "d"] {
        conn.execute(&Statement::new("INSERT INTO notes (text) VALUES (?)").bind(text))
            .await
            .unwrap();
    }

    let query = conn.compile("SELECT id, text FROM notes ORDER BY id").unwrap();
    let texts: Vec<String> = conn
        .iterate(&query)
        .await
        .unwrap()
        .map_ok(|row| row.get("text").and_then(|v| v.as_str()).unwrap().to_string())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(texts, vec!["a", "b", "c", "d"]);

    // Stopping early ends the statement and leaves the connection usable
    {
        let mut rows = conn.iterate(&query).await.unwrap();
        let first = rows.try_next().await.unwrap().unwrap();
        assert_eq!(first.get("text"), Some(&json!("a")));
    }
    assert_eq!(count_notes(&mut conn).await, 4);

    // Not restartable: a fresh call re-executes
    let again: Vec<_> = conn
        .iterate(&query)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(again.len(), 4);

    conn.release().await.unwrap();
    backend.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_iterate_compiles_text_and_statements() {
    let (backend, mut conn, _path) = setup().await;
    for text in ["a", "b", "c"] {
        conn.execute(&Statement::new("INSERT INTO notes (text) VALUES (?)").bind(text))
            .await
            .unwrap();
    }

    let rows: Vec<_> = conn
        .iterate("SELECT text FROM notes ORDER BY id")
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);

    let statement = Statement::new("SELECT text FROM notes WHERE text > :after ORDER BY id")
        .bind_named("after", "a");
    let texts: Vec<_> = conn
        .iterate(&statement)
        .await
        .unwrap()
        .map_ok(|row| row.get("text").cloned())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(texts, vec![Some(json!("b")), Some(json!("c"))]);

    conn.release().await.unwrap();
    backend.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_iterate_requires_acquired_connection() {
    let (backend, mut conn, _path) = setup().await;
    let query = conn.compile("SELECT 1").unwrap();
    conn.release().await.unwrap();

    assert!(matches!(conn.iterate(&query).await, Err(DbError::NotAcquired)));
    assert!(matches!(
        conn.iterate("SELECT 1").await,
        Err(DbError::NotAcquired)
    ));
    backend.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_decoded_values() {
    let (backend, mut conn, _path) = setup().await;
    conn.execute(
        &Statement::new("INSERT INTO notes (text, score, data) VALUES (:text, :score, :data)")
            .bind_named("text", "bytes")
            .bind_named("score", QueryParam::Null)
            .bind_named("data", vec![0xFFu8, 0xFE, 0x00, 0x01]),
    )
    .await
    .unwrap();

    let row = conn
        .fetch_one("SELECT id, text, score, data FROM notes")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("id"), Some(&json!(1)));
    assert_eq!(row.get("text"), Some(&json!("bytes")));
    assert_eq!(row.get("score"), Some(&json!(null)));
    assert_eq!(row.get("data"), Some(&json!("//4AAQ==")));

    let names: Vec<&str> = row.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "text", "score", "data"]);
    assert_eq!(
        serde_json::Value::Object(row.to_json_map())["text"],
        json!("bytes")
    );

    conn.release().await.unwrap();
    backend.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_rows_share_column_metadata() {
    let (backend, mut conn, _path) = setup().await;
    conn.execute_many([
        "INSERT INTO notes (text) VALUES ('x')",
        "INSERT INTO notes (text) VALUES ('y')",
    ])
    .await
    .unwrap();

    let rows = conn.fetch_all("SELECT id, text FROM notes").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(std::ptr::eq(rows[0].columns(), rows[1].columns()));

    conn.release().await.unwrap();
    backend.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_driver_errors_pass_through() {
    let (backend, mut conn, _path) = setup().await;

    let err = conn.fetch_all("SELEC nonsense").await.unwrap_err();
    assert!(matches!(err, DbError::Driver(sqlx::Error::Database(_))));
    assert!(!err.is_precondition());

    // Constraint violations come back as driver errors with the engine code
    let err = conn
        .execute("INSERT INTO notes (text) VALUES (NULL)")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Driver(_)));
    assert!(err.sql_state().is_some());

    // A named marker without a value is rejected before reaching the driver
    let err = conn
        .execute(
            &Statement::new("INSERT INTO notes (text) VALUES (:text)").bind_named("other", 1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));

    conn.release().await.unwrap();
    backend.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_raw_connection_access() {
    let (backend, mut conn, _path) = setup().await;

    let raw = conn.raw_connection().unwrap();
    assert_eq!(raw.db_type(), backend.database_type());

    conn.release().await.unwrap();
    assert!(matches!(conn.raw_connection(), Err(DbError::NotAcquired)));
    backend.disconnect().await.unwrap();
}
