//! File-based schema migrations.
//!
//! Migrations are `NNN_description.sql` files. On every startup they are
//! staged from the canonical directory for the current deployment into a
//! writable directory, then every staged migration newer than the recorded
//! schema version is applied in order, each in its own transaction.

pub mod context;
pub mod file;
pub mod fs;
pub mod runner;
pub mod tracking;

pub use context::DeploymentContext;
pub use file::MigrationFile;
pub use fs::{DirectoryStats, FileSystem, StdFileSystem};
pub use runner::{MigrationFailure, MigrationRunResult, MigrationRunner, StageReport};
