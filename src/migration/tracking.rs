use super::MigrationFile;
use rusqlite::{Connection, params};
use std::collections::BTreeMap;

pub const TRACKING_TABLE: &str = "convostore_migrations";

/// A row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
    pub filename: String,
    pub checksum: String,
    pub applied_at: String,
}

pub fn ensure_tracking_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS convostore_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            filename TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL,
            execution_time_ms INTEGER NOT NULL
        );
        "#,
    )
}

pub fn tracking_table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![TRACKING_TABLE],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Highest applied version, 0 for a database nothing has been applied to.
pub fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
    if !tracking_table_exists(conn)? {
        return Ok(0);
    }

    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM convostore_migrations", [], |row| {
        row.get::<_, u32>(0)
    })
}

pub fn applied_migrations(conn: &Connection) -> rusqlite::Result<BTreeMap<u32, AppliedMigration>> {
    let mut applied = BTreeMap::new();
    if !tracking_table_exists(conn)? {
        return Ok(applied);
    }

    let mut stmt = conn.prepare(
        "SELECT version, name, filename, checksum, applied_at
         FROM convostore_migrations
         ORDER BY version",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(AppliedMigration {
            version: row.get(0)?,
            name: row.get(1)?,
            filename: row.get(2)?,
            checksum: row.get(3)?,
            applied_at: row.get(4)?,
        })
    })?;

    for row in rows {
        let migration = row?;
        applied.insert(migration.version, migration);
    }

    Ok(applied)
}

/// Mark `migration` as applied. Called inside the migration's own transaction.
pub fn record_applied(
    conn: &Connection,
    migration: &MigrationFile,
    execution_time_ms: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO convostore_migrations
         (version, name, filename, checksum, applied_at, execution_time_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            migration.order,
            migration.name,
            migration.filename,
            migration.checksum(),
            chrono::Utc::now().to_rfc3339(),
            execution_time_ms
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_of_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
        assert!(applied_migrations(&conn).unwrap().is_empty());

        ensure_tracking_table(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_record_applied_advances_version() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_tracking_table(&conn).unwrap();

        let first = MigrationFile::from_parts("001_init.sql", "SELECT 1;".to_string()).unwrap();
        let third = MigrationFile::from_parts("003_more.sql", "SELECT 3;".to_string()).unwrap();
        record_applied(&conn, &first, 3).unwrap();
        record_applied(&conn, &third, 5).unwrap();

        assert_eq!(current_version(&conn).unwrap(), 3);

        let applied = applied_migrations(&conn).unwrap();
        assert_eq!(applied.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(applied[&1].checksum, first.checksum());
        assert_eq!(applied[&3].filename, "003_more.sql");
    }

    #[test]
    fn test_record_applied_twice_fails() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_tracking_table(&conn).unwrap();

        let first = MigrationFile::from_parts("001_init.sql", "SELECT 1;".to_string()).unwrap();
        record_applied(&conn, &first, 0).unwrap();
        assert!(record_applied(&conn, &first, 0).is_err());
    }
}
