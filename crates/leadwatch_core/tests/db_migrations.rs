use leadwatch_core::db::migrations::latest_version;
use leadwatch_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "leads");
    assert_column_exists(&conn, "leads", "in_stage_one");
    assert_column_exists(&conn, "leads", "moved_at");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leads.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "leads");
}

#[test]
fn upgrading_version_one_schema_marks_existing_leads_as_stage_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE leads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            notified INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX idx_leads_email ON leads(email);
        INSERT INTO leads (name, email, phone, created_at, notified)
        VALUES ('Old', 'old@x.com', '1', 1000, 1);
        PRAGMA user_version = 1;",
    )
    .unwrap();
    drop(conn);

    let conn = open_db(&path).unwrap();
    let (in_stage_one, moved_at): (i64, Option<i64>) = conn
        .query_row(
            "SELECT in_stage_one, moved_at FROM leads WHERE email = 'old@x.com';",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(in_stage_one, 1);
    assert_eq!(moved_at, None);
}

#[test]
fn failing_stage_tracking_step_rolls_back_and_names_the_step() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("half-upgraded.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE leads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            notified INTEGER NOT NULL DEFAULT 0,
            in_stage_one INTEGER NOT NULL DEFAULT 1
        );
        PRAGMA user_version = 1;",
    )
    .unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::MigrationFailed { version, name, .. } => {
            assert_eq!(version, 2);
            assert_eq!(name, "stage_tracking");
        }
        other => panic!("unexpected error: {other}"),
    }

    let conn = Connection::open(&path).unwrap();
    assert_eq!(schema_version(&conn), 1);
}

#[test]
fn duplicate_email_is_rejected_by_schema() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO leads (name, email, phone, created_at) VALUES ('A', 'a@x.com', '1', 0);",
        [],
    )
    .unwrap();
    let duplicate = conn.execute(
        "INSERT INTO leads (name, email, phone, created_at) VALUES ('B', 'a@x.com', '2', 0);",
        [],
    );
    assert!(duplicate.is_err());
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

fn assert_column_exists(conn: &Connection, table_name: &str, column: &str) {
    let exists: i64 = conn
        .query_row(
            &format!(
                "SELECT EXISTS(
                    SELECT 1
                    FROM pragma_table_info('{table_name}')
                    WHERE name = ?1
                );"
            ),
            [column],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "column {table_name}.{column} does not exist");
}
