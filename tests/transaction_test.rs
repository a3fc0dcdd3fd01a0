mod common;

use common::TestProject;
use convostore::transaction::{BatchOperation, TransactionOptions};
use rusqlite::Connection;

fn count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM items", [], |r| r.get(0))
}

#[test]
fn test_batch_is_atomic() {
    let project = TestProject::new();
    let manager = project.manager();
    manager
        .execute_transaction(TransactionOptions::default(), |conn| {
            conn.execute_batch(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE);",
            )
        })
        .unwrap();

    let before = manager.execute_read_only_transaction(count).unwrap();

    let operations: Vec<BatchOperation<'_, usize, rusqlite::Error>> = vec![
        Box::new(|conn: &Connection| conn.execute("INSERT INTO items (name) VALUES ('a')", [])),
        Box::new(|conn: &Connection| conn.execute("INSERT INTO items (name) VALUES ('b')", [])),
        Box::new(|conn: &Connection| conn.execute("INSERT INTO items (name) VALUES ('a')", [])),
    ];
    let err = manager
        .execute_batch_transaction(operations, TransactionOptions::immediate())
        .unwrap_err();
    assert!(err.to_string().contains("UNIQUE"));

    let after = manager.execute_read_only_transaction(count).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_committed_work_survives_reopen() {
    let project = TestProject::new();
    let manager = project.manager();
    manager
        .execute_exclusive_transaction(|conn| {
            conn.execute_batch(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
                 INSERT INTO items (name) VALUES ('kept');",
            )
        })
        .unwrap();
    manager.close();
    assert!(!manager.is_open());

    let n = manager.execute_read_only_transaction(count).unwrap();
    assert_eq!(n, 1);
    assert!(manager.is_open());
}

#[test]
fn test_caller_error_type_is_preserved() {
    #[derive(Debug, PartialEq)]
    enum AppError {
        Rejected(&'static str),
        Tx(String),
    }

    impl From<convostore::TransactionError> for AppError {
        fn from(err: convostore::TransactionError) -> Self {
            AppError::Tx(err.to_string())
        }
    }

    let project = TestProject::new();
    let manager = project.manager();
    let result: Result<(), AppError> = manager.execute_immediate_transaction(|conn| {
        conn.execute_batch("CREATE TABLE items (id INTEGER);")
            .map_err(|e| AppError::Tx(e.to_string()))?;
        Err(AppError::Rejected("nope"))
    });
    assert_eq!(result, Err(AppError::Rejected("nope")));
    assert!(!project.table_exists(&manager, "items"));
}
