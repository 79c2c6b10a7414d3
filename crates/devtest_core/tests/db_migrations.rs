use devtest_core::db::migrations::latest_version;
use devtest_core::db::{open_db, open_db_in_memory, open_db_shared_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "dev_tests");
    assert!(column_names(&conn, "dev_tests").contains(&"row_version".to_string()));
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devtest.db");

    let conn_first = open_db(&path).unwrap();
    conn_first
        .execute("INSERT INTO dev_tests (campaign_name) VALUES ('kept')", [])
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let count: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM dev_tests", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn shared_memory_connections_see_the_same_rows() {
    let uri = "file:devtest-migrations-shared?mode=memory&cache=shared";
    let anchor = open_db_shared_memory(uri).unwrap();
    anchor
        .execute("INSERT INTO dev_tests (campaign_name) VALUES ('shared')", [])
        .unwrap();

    let other = open_db_shared_memory(uri).unwrap();
    assert_eq!(schema_version(&other), latest_version());
    let count: i64 = other
        .query_row("SELECT COUNT(*) FROM dev_tests", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn metric_and_name_columns_are_nullable() {
    let conn = open_db_in_memory().unwrap();
    conn.execute("INSERT INTO dev_tests DEFAULT VALUES", [])
        .unwrap();

    let (name, clicks, version): (Option<String>, Option<i64>, i64) = conn
        .query_row(
            "SELECT campaign_name, clicks, row_version FROM dev_tests",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(name, None);
    assert_eq!(clicks, None);
    assert_eq!(version, 1);
}

#[test]
fn overlong_campaign_name_is_rejected_by_the_store() {
    let conn = open_db_in_memory().unwrap();
    let result = conn.execute(
        "INSERT INTO dev_tests (campaign_name) VALUES (?1)",
        ["x".repeat(256)],
    );
    assert!(result.is_err());
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn column_names(conn: &Connection, table_name: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table_name});"))
        .unwrap();
    stmt.query_map([], |row| row.get::<_, String>(1))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
