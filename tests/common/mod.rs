use convostore::connection::ConnectionOptions;
use convostore::migration::{DeploymentContext, MigrationRunner};
use convostore::transaction::TransactionManager;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A project layout on disk: `<root>/migrations` is the canonical directory,
/// `<root>/data` the writable one and `<root>/data/app.db` the database.
pub struct TestProject {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn canonical_dir(&self) -> PathBuf {
        self.root().join("migrations")
    }

    pub fn staged_dir(&self) -> PathBuf {
        self.root().join("data").join("migrations")
    }

    pub fn db_path(&self) -> PathBuf {
        self.root().join("data").join("app.db")
    }

    pub fn add_migration(&self, filename: &str, sql: &str) {
        fs::create_dir_all(self.canonical_dir()).unwrap();
        fs::write(self.canonical_dir().join(filename), sql).unwrap();
    }

    pub fn manager(&self) -> Arc<TransactionManager> {
        fs::create_dir_all(self.root().join("data")).unwrap();
        Arc::new(TransactionManager::new(ConnectionOptions::file(self.db_path())))
    }

    pub fn runner(&self, manager: Arc<TransactionManager>) -> MigrationRunner {
        let context = DeploymentContext::Development {
            source_root: self.root().to_path_buf(),
        };
        MigrationRunner::new(manager, context, self.staged_dir())
    }

    pub fn table_exists(&self, manager: &TransactionManager, table: &str) -> bool {
        manager
            .execute_read_only_transaction(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get::<_, i64>(0),
                )
            })
            .unwrap()
            > 0
    }
}
