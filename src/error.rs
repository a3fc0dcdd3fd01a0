use std::path::PathBuf;
use thiserror::Error;

/// Failure of the transaction machinery itself (opening the handle, BEGIN,
/// COMMIT, SAVEPOINT). Errors raised by a caller's operation never end up
/// here; they are handed back to the caller untouched.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Failed to open database at {location}: {source}")]
    Open {
        location: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database handle has been closed")]
    Closed,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<TransactionError> for rusqlite::Error {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Open { source, .. } => source,
            TransactionError::Closed => rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_MISUSE),
                Some("Database handle has been closed".to_string()),
            ),
            TransactionError::Sqlite(e) => e,
        }
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    /// Copying the canonical migrations into the writable directory failed.
    /// Distinct from "nothing to stage", which is not an error.
    #[error("Failed to stage migrations into {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read staged migrations from {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<TransactionError> for MigrationError {
    fn from(err: TransactionError) -> Self {
        MigrationError::Database(err.into())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        StoreError::Database(err.into())
    }
}

/// Startup failures of the binary.
#[derive(Error, Debug)]
pub enum ConvoStoreError {
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ConvoStoreError>;

impl MigrationError {
    /// Staging failures abort startup; everything else is reported per run.
    pub fn is_staging(&self) -> bool {
        matches!(self, MigrationError::Staging { .. })
    }
}
