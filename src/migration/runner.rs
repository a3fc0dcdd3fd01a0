use super::fs::{FileSystem, StdFileSystem};
use super::{DeploymentContext, MigrationFile, tracking};
use crate::error::MigrationError;
use crate::transaction::TransactionManager;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What the staging step did with the canonical migration directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub source_missing: bool,
    pub copied: Vec<String>,
    pub unchanged: Vec<String>,
    /// Entries of the source directory that are not migrations.
    pub skipped: Vec<String>,
}

impl StageReport {
    pub fn staged_count(&self) -> usize {
        self.copied.len() + self.unchanged.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFailure {
    pub order: u32,
    pub filename: String,
    pub error: String,
}

/// Outcome of one `run_migrations` call. Built fresh for every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRunResult {
    pub success: bool,
    pub migrations_run: usize,
    pub current_version: u32,
    pub errors: Vec<MigrationFailure>,
    /// Already-applied migrations whose staged content no longer matches
    /// what was recorded. They are reported, never re-applied.
    pub modified: Vec<String>,
}

impl MigrationRunResult {
    fn new(current_version: u32) -> Self {
        Self {
            success: true,
            migrations_run: 0,
            current_version,
            errors: Vec::new(),
            modified: Vec::new(),
        }
    }

    fn fail(&mut self, failure: MigrationFailure) {
        self.success = false;
        self.errors.push(failure);
    }
}

pub struct MigrationRunner {
    manager: Arc<TransactionManager>,
    fs: Box<dyn FileSystem>,
    context: DeploymentContext,
    staged_dir: PathBuf,
    current_version: u32,
}

impl MigrationRunner {
    pub fn new(
        manager: Arc<TransactionManager>,
        context: DeploymentContext,
        staged_dir: impl Into<PathBuf>,
    ) -> Self {
        Self::with_file_system(manager, context, staged_dir, Box::new(StdFileSystem))
    }

    pub fn with_file_system(
        manager: Arc<TransactionManager>,
        context: DeploymentContext,
        staged_dir: impl Into<PathBuf>,
        fs: Box<dyn FileSystem>,
    ) -> Self {
        Self {
            manager,
            fs,
            context,
            staged_dir: staged_dir.into(),
            current_version: 0,
        }
    }

    pub fn context(&self) -> &DeploymentContext {
        &self.context
    }

    pub fn source_dir(&self) -> PathBuf {
        self.context.canonical_migrations_dir()
    }

    pub fn staged_dir(&self) -> &Path {
        &self.staged_dir
    }

    /// Version as of the last time this runner looked at the database.
    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Stage, then apply every outstanding migration in order.
    ///
    /// Only a staging failure is returned as `Err`; a migration that fails to
    /// apply is reported in the result and stops the run. Migrations applied
    /// before the failure stay applied.
    pub fn run_migrations(&mut self) -> Result<MigrationRunResult, MigrationError> {
        let stage = self.stage()?;
        debug!(
            "Staged {} migrations ({} copied) from {}",
            stage.staged_count(),
            stage.copied.len(),
            stage.source_dir.display()
        );

        let files = self.discover()?;
        self.refresh_version()?;

        let mut result = MigrationRunResult::new(self.current_version);

        let duplicates = duplicate_orders(&files);
        if !duplicates.is_empty() {
            for file in duplicates {
                error!(
                    "Migration order {:03} is used by more than one file: {}",
                    file.order, file.filename
                );
                result.fail(MigrationFailure {
                    order: file.order,
                    filename: file.filename.clone(),
                    error: format!("duplicate migration order {:03}", file.order),
                });
            }
            return Ok(result);
        }

        result.modified = self.check_applied(&files)?;

        let pending: Vec<&MigrationFile> = files
            .iter()
            .filter(|f| f.order > self.current_version)
            .collect();
        if pending.is_empty() {
            info!("Schema is up to date (version {})", self.current_version);
            return Ok(result);
        }

        for migration in pending {
            match self.apply(migration) {
                Ok(elapsed) => {
                    self.current_version = migration.order;
                    result.current_version = migration.order;
                    result.migrations_run += 1;
                    info!("Migration {} completed in {}ms", migration.filename, elapsed);
                }
                Err(e) => {
                    error!("Migration {} failed: {}", migration.filename, e);
                    result.fail(MigrationFailure {
                        order: migration.order,
                        filename: migration.filename.clone(),
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }

        Ok(result)
    }

    /// Copy matching files from the canonical directory into the staged one.
    ///
    /// A missing or empty canonical directory is not an error: nothing gets
    /// staged and a warning is logged. The canonical directory is only read.
    pub fn stage(&self) -> Result<StageReport, MigrationError> {
        let source_dir = self.source_dir();
        let mut report = StageReport {
            source_dir: source_dir.clone(),
            target_dir: self.staged_dir.clone(),
            ..StageReport::default()
        };

        let stats = self.fs.directory_stats(&source_dir).map_err(|source| MigrationError::Staging {
            path: source_dir.clone(),
            source,
        })?;
        if !stats.exists || !stats.is_directory {
            warn!(
                path = %source_dir.display(),
                deployment = self.context.label(),
                "Migrations directory not found, nothing to stage"
            );
            report.source_missing = true;
            return Ok(report);
        }

        let mut names = self.fs.read_dir(&source_dir).map_err(|source| MigrationError::Staging {
            path: source_dir.clone(),
            source,
        })?;
        names.sort();

        let (migrations, skipped): (Vec<String>, Vec<String>) =
            names.into_iter().partition(|name| MigrationFile::is_migration_filename(name));
        report.skipped = skipped;

        if migrations.is_empty() {
            warn!(path = %source_dir.display(), "No migration files found, nothing to stage");
            return Ok(report);
        }

        self.fs
            .ensure_directory_exists(&self.staged_dir)
            .map_err(|source| MigrationError::Staging {
                path: self.staged_dir.clone(),
                source,
            })?;

        for name in migrations {
            let from = source_dir.join(&name);
            let to = self.staged_dir.join(&name);

            let content = self.fs.read_file(&from).map_err(|source| MigrationError::Staging {
                path: from.clone(),
                source,
            })?;

            // Same bytes already staged: leave the file alone.
            if let Ok(existing) = self.fs.read_file(&to) {
                if existing == content {
                    report.unchanged.push(name);
                    continue;
                }
            }

            self.fs
                .write_file(&to, &content)
                .map_err(|source| MigrationError::Staging { path: to.clone(), source })?;
            report.copied.push(name);
        }

        info!(
            "Staged {} migration files into {} ({} copied, {} unchanged)",
            report.staged_count(),
            self.staged_dir.display(),
            report.copied.len(),
            report.unchanged.len()
        );

        Ok(report)
    }

    /// Read the staged migrations, sorted by order.
    pub fn discover(&self) -> Result<Vec<MigrationFile>, MigrationError> {
        let discovery_error = |source| MigrationError::Discovery {
            path: self.staged_dir.clone(),
            source,
        };

        let stats = self.fs.directory_stats(&self.staged_dir).map_err(discovery_error)?;
        if !stats.exists || !stats.is_directory {
            debug!("No staged migrations directory at {}", self.staged_dir.display());
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for name in self.fs.read_dir(&self.staged_dir).map_err(discovery_error)? {
            if !MigrationFile::is_migration_filename(&name) {
                continue;
            }

            let path = self.staged_dir.join(&name);
            let content = self.fs.read_file(&path).map_err(|source| MigrationError::Discovery {
                path: path.clone(),
                source,
            })?;
            if let Some(file) = MigrationFile::from_parts(&name, content) {
                files.push(file);
            }
        }

        files.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.filename.cmp(&b.filename)));
        Ok(files)
    }

    /// Staged migrations that the next run would apply.
    pub fn pending_migrations(&mut self) -> Result<Vec<MigrationFile>, MigrationError> {
        let current = self
            .manager
            .execute_read_only_transaction(tracking::current_version)?;
        self.current_version = current;
        Ok(self.discover()?.into_iter().filter(|f| f.order > current).collect())
    }

    fn refresh_version(&mut self) -> Result<u32, MigrationError> {
        let version = self.manager.execute_immediate_transaction(|conn| {
            tracking::ensure_tracking_table(conn)?;
            tracking::current_version(conn)
        })?;
        self.current_version = version;
        Ok(version)
    }

    /// Compare staged content of applied migrations with recorded checksums.
    fn check_applied(&self, files: &[MigrationFile]) -> Result<Vec<String>, MigrationError> {
        let applied = self.manager.execute_read_only_transaction(tracking::applied_migrations)?;

        let mut modified = Vec::new();
        for file in files {
            match applied.get(&file.order) {
                Some(record) if record.checksum != file.checksum() => {
                    warn!(
                        "Migration {} was modified after it was applied on {}; it will not be re-applied",
                        file.filename, record.applied_at
                    );
                    modified.push(file.filename.clone());
                }
                None if file.order <= self.current_version => {
                    warn!(
                        "Migration {} is older than schema version {} and will never be applied",
                        file.filename, self.current_version
                    );
                }
                _ => {}
            }
        }

        if let Some(latest) = files.last() {
            if self.current_version > latest.order {
                warn!(
                    "Database schema version {} is newer than the newest staged migration {:03}",
                    self.current_version, latest.order
                );
            }
        }

        Ok(modified)
    }

    /// Apply one migration and record it, atomically.
    fn apply(&self, migration: &MigrationFile) -> Result<i64, rusqlite::Error> {
        info!("Applying migration {:03}: {}", migration.order, migration.name);
        let start = Instant::now();

        self.manager.execute_exclusive_transaction(|conn| {
            conn.execute_batch(&migration.content)?;
            let elapsed = start.elapsed().as_millis() as i64;
            tracking::record_applied(conn, migration, elapsed)?;
            Ok(elapsed)
        })
    }
}

/// Files whose order is shared with another file.
fn duplicate_orders(files: &[MigrationFile]) -> Vec<&MigrationFile> {
    let mut by_order: BTreeMap<u32, Vec<&MigrationFile>> = BTreeMap::new();
    for file in files {
        by_order.entry(file.order).or_default().push(file);
    }
    by_order.into_values().filter(|group| group.len() > 1).flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionOptions;
    use crate::migration::fs::DirectoryStats;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io;

    /// In-memory file system; paths listed in `fail_writes` reject writes.
    #[derive(Default)]
    struct MemoryFileSystem {
        files: Mutex<HashMap<PathBuf, String>>,
        dirs: Mutex<Vec<PathBuf>>,
        fail_writes: Vec<PathBuf>,
    }

    impl MemoryFileSystem {
        fn with_dir(dir: &Path, files: &[(&str, &str)]) -> Self {
            let fs = MemoryFileSystem::default();
            fs.dirs.lock().push(dir.to_path_buf());
            for (name, content) in files {
                fs.files.lock().insert(dir.join(name), content.to_string());
            }
            fs
        }
    }

    impl FileSystem for MemoryFileSystem {
        fn directory_stats(&self, path: &Path) -> io::Result<DirectoryStats> {
            if self.dirs.lock().iter().any(|d| d == path) {
                return Ok(DirectoryStats { exists: true, is_directory: true });
            }
            if self.files.lock().contains_key(path) {
                return Ok(DirectoryStats { exists: true, is_directory: false });
            }
            Ok(DirectoryStats::default())
        }

        fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
            Ok(self
                .files
                .lock()
                .keys()
                .filter(|p| p.parent() == Some(path))
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .collect())
        }

        fn read_file(&self, path: &Path) -> io::Result<String> {
            self.files
                .lock()
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
        }

        fn write_file(&self, path: &Path, contents: &str) -> io::Result<()> {
            if self.fail_writes.iter().any(|p| p == path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"));
            }
            self.files.lock().insert(path.to_path_buf(), contents.to_string());
            Ok(())
        }

        fn ensure_directory_exists(&self, path: &Path) -> io::Result<()> {
            let mut dirs = self.dirs.lock();
            if !dirs.iter().any(|d| d == path) {
                dirs.push(path.to_path_buf());
            }
            Ok(())
        }
    }

    fn new_runner(fs: MemoryFileSystem) -> MigrationRunner {
        let manager = Arc::new(TransactionManager::new(ConnectionOptions::in_memory()));
        MigrationRunner::with_file_system(
            manager,
            DeploymentContext::Development {
                source_root: PathBuf::from("/app"),
            },
            "/data/migrations",
            Box::new(fs),
        )
    }

    #[test]
    fn test_missing_source_is_not_an_error() {
        let mut runner = new_runner(MemoryFileSystem::default());
        let stage = runner.stage().unwrap();
        assert!(stage.source_missing);
        assert_eq!(stage.staged_count(), 0);

        let result = runner.run_migrations().unwrap();
        assert!(result.success);
        assert_eq!(result.migrations_run, 0);
        assert_eq!(result.current_version, 0);
    }

    #[test]
    fn test_stage_skips_non_migrations_and_unchanged_files() {
        let fs = MemoryFileSystem::with_dir(
            Path::new("/app/migrations"),
            &[
                ("001_init.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);"),
                ("readme.txt", "docs"),
                ("1_bad.sql", "CREATE TABLE bad (id INTEGER);"),
            ],
        );
        let runner = new_runner(fs);

        let first = runner.stage().unwrap();
        assert_eq!(first.copied, vec!["001_init.sql".to_string()]);
        assert_eq!(first.skipped, vec!["1_bad.sql".to_string(), "readme.txt".to_string()]);

        let second = runner.stage().unwrap();
        assert!(second.copied.is_empty());
        assert_eq!(second.unchanged, vec!["001_init.sql".to_string()]);
    }

    #[test]
    fn test_staging_write_failure_is_distinct_error() {
        let mut fs = MemoryFileSystem::with_dir(
            Path::new("/app/migrations"),
            &[("001_init.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);")],
        );
        fs.fail_writes.push(PathBuf::from("/data/migrations/001_init.sql"));
        let mut runner = new_runner(fs);

        let err = runner.run_migrations().unwrap_err();
        assert!(err.is_staging());
        assert!(matches!(
            err,
            MigrationError::Staging { ref path, .. } if path == Path::new("/data/migrations/001_init.sql")
        ));
    }

    #[test]
    fn test_duplicate_orders_apply_nothing() {
        let fs = MemoryFileSystem::with_dir(
            Path::new("/app/migrations"),
            &[
                ("001_a.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);"),
                ("001_b.sql", "CREATE TABLE b (id INTEGER PRIMARY KEY);"),
                ("002_c.sql", "CREATE TABLE c (id INTEGER PRIMARY KEY);"),
            ],
        );
        let mut runner = new_runner(fs);

        let result = runner.run_migrations().unwrap();
        assert!(!result.success);
        assert_eq!(result.migrations_run, 0);
        assert_eq!(result.current_version, 0);
        let names: Vec<&str> = result.errors.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["001_a.sql", "001_b.sql"]);
    }

    #[test]
    fn test_runner_owns_its_version() {
        let fs = MemoryFileSystem::with_dir(
            Path::new("/app/migrations"),
            &[
                ("001_a.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);"),
                ("002_b.sql", "CREATE TABLE b (id INTEGER PRIMARY KEY);"),
            ],
        );
        let mut runner = new_runner(fs);
        assert_eq!(runner.current_version(), 0);

        runner.stage().unwrap();
        let pending: Vec<u32> = runner
            .pending_migrations()
            .unwrap()
            .iter()
            .map(|m| m.order)
            .collect();
        assert_eq!(pending, vec![1, 2]);

        runner.run_migrations().unwrap();
        assert_eq!(runner.current_version(), 2);
        assert!(runner.pending_migrations().unwrap().is_empty());

        // A second runner over a separate database starts from scratch.
        let other = new_runner(MemoryFileSystem::default());
        assert_eq!(other.current_version(), 0);
    }
}
