use crate::error::TransactionError;
use rusqlite::{Connection, OpenFlags};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    InMemory,
}

impl fmt::Display for DatabaseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseLocation::File(path) => write!(f, "{}", path.display()),
            DatabaseLocation::InMemory => write!(f, ":memory:"),
        }
    }
}

/// Everything needed to open the single handle the subsystem works through.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub location: DatabaseLocation,
    pub journal_mode: String,
    pub synchronous: String,
    pub busy_timeout: Duration,
}

impl ConnectionOptions {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DatabaseLocation::File(path.into()),
            ..Self::in_memory()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: DatabaseLocation::InMemory,
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Open a handle and apply the connection-level settings.
    pub fn open(&self) -> Result<Connection, TransactionError> {
        debug!("Opening database at {}", self.location);

        let conn = match &self.location {
            DatabaseLocation::File(path) => {
                let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
                    | OpenFlags::SQLITE_OPEN_URI;
                Connection::open_with_flags(path, flags)
            }
            DatabaseLocation::InMemory => Connection::open_in_memory(),
        }
        .map_err(|source| TransactionError::Open {
            location: self.location.to_string(),
            source,
        })?;

        self.configure(&conn)?;
        Ok(conn)
    }

    fn configure(&self, conn: &Connection) -> Result<(), TransactionError> {
        conn.busy_timeout(self.busy_timeout)?;

        // Journal mode is meaningless for in-memory databases.
        if matches!(self.location, DatabaseLocation::File(_)) {
            let mode: String =
                conn.query_row(&format!("PRAGMA journal_mode = {}", self.journal_mode), [], |row| {
                    row.get(0)
                })?;
            debug!("Journal mode set to {}", mode);
        }

        let pragma_sql = format!(
            "PRAGMA synchronous = {};
             PRAGMA foreign_keys = ON;",
            self.synchronous
        );
        conn.execute_batch(&pragma_sql)?;

        Ok(())
    }
}

/// Whether the engine is enforcing foreign keys on this handle.
pub fn foreign_keys_enabled(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
        .map(|v| v == 1)
}
