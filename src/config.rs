use crate::connection::{ConnectionOptions, DatabaseLocation};
use crate::error::{ConvoStoreError, Result};
use crate::migration::DeploymentContext;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    Packaged,
    Development,
    AutomatedTest,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "convostore")]
#[command(about = "convostore - local conversation store: migrations, transactions and schema checks on SQLite", long_about = None)]
pub struct Config {
    // Database location
    #[arg(short, long, default_value = "convostore.db", env = "CONVOSTORE_DATABASE")]
    pub database: String,

    #[arg(long, env = "CONVOSTORE_IN_MEMORY", help = "Use in-memory SQLite database (for testing only)")]
    pub in_memory: bool,

    #[arg(long, default_value = ".convostore", env = "CONVOSTORE_DATA_DIR", help = "Writable directory; migrations are staged into <data-dir>/migrations")]
    pub data_dir: PathBuf,

    // Migration source resolution
    #[arg(long, value_enum, default_value = "development", env = "CONVOSTORE_DEPLOYMENT", help = "Where the canonical migrations live")]
    pub deployment: DeploymentMode,

    #[arg(long, env = "CONVOSTORE_RESOURCES_DIR", help = "Packaged resource root (required with --deployment packaged)")]
    pub resources_dir: Option<PathBuf>,

    #[arg(long, default_value = ".", env = "CONVOSTORE_SOURCE_ROOT", help = "Project root for development and automated-test runs")]
    pub source_root: PathBuf,

    #[arg(long, default_value = "info", env = "CONVOSTORE_LOG_LEVEL")]
    pub log_level: String,

    // SQLite PRAGMA settings
    #[arg(long, default_value = "WAL", env = "CONVOSTORE_JOURNAL_MODE", help = "SQLite journal mode (WAL, DELETE, TRUNCATE, etc.)")]
    pub journal_mode: String,

    #[arg(long, default_value = "NORMAL", env = "CONVOSTORE_SYNCHRONOUS", help = "SQLite synchronous mode (NORMAL, FULL, OFF)")]
    pub synchronous: String,

    #[arg(long, default_value = "5000", env = "CONVOSTORE_BUSY_TIMEOUT_MS", help = "How long SQLite waits on a locked database, in milliseconds")]
    pub busy_timeout_ms: u64,

    // Startup behaviour
    #[arg(long, env = "CONVOSTORE_SKIP_VALIDATION", help = "Skip the schema validation step after migrating")]
    pub skip_validation: bool,

    #[arg(long, value_enum, default_value = "text", env = "CONVOSTORE_REPORT")]
    pub report: ReportFormat,
}

impl Config {
    /// Get a configuration instance with all values resolved from CLI args and environment variables
    pub fn load() -> Self {
        Config::parse()
    }

    pub fn busy_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        let location = if self.in_memory {
            DatabaseLocation::InMemory
        } else {
            DatabaseLocation::File(PathBuf::from(&self.database))
        };

        ConnectionOptions {
            location,
            journal_mode: self.journal_mode.clone(),
            synchronous: self.synchronous.clone(),
            busy_timeout: self.busy_timeout_duration(),
        }
    }

    /// Resolve the deployment mode flags into the context the migration runner is built with.
    pub fn deployment_context(&self) -> Result<DeploymentContext> {
        match self.deployment {
            DeploymentMode::Packaged => {
                let resources_dir = self.resources_dir.clone().ok_or_else(|| {
                    ConvoStoreError::InvalidConfig(
                        "--resources-dir is required when --deployment is packaged".to_string(),
                    )
                })?;
                Ok(DeploymentContext::Packaged { resources_dir })
            }
            DeploymentMode::Development => Ok(DeploymentContext::Development {
                source_root: self.source_root.clone(),
            }),
            DeploymentMode::AutomatedTest => Ok(DeploymentContext::AutomatedTest {
                source_root: self.source_root.clone(),
            }),
        }
    }

    pub fn staged_migrations_dir(&self) -> PathBuf {
        self.data_dir.join("migrations")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["convostore"]);
        assert_eq!(config.database, "convostore.db");
        assert_eq!(config.deployment, DeploymentMode::Development);
        assert_eq!(config.report, ReportFormat::Text);
        assert_eq!(config.busy_timeout_duration(), Duration::from_secs(5));
        assert_eq!(config.staged_migrations_dir(), PathBuf::from(".convostore/migrations"));
    }

    #[test]
    fn test_in_memory_location() {
        let config = Config::parse_from(["convostore", "--in-memory"]);
        assert_eq!(config.connection_options().location, DatabaseLocation::InMemory);
    }

    #[test]
    fn test_packaged_requires_resources_dir() {
        let config = Config::parse_from(["convostore", "--deployment", "packaged"]);
        assert!(matches!(
            config.deployment_context(),
            Err(ConvoStoreError::InvalidConfig(_))
        ));

        let config = Config::parse_from([
            "convostore",
            "--deployment",
            "packaged",
            "--resources-dir",
            "/opt/app/resources",
        ]);
        assert_eq!(
            config.deployment_context().unwrap(),
            DeploymentContext::Packaged {
                resources_dir: PathBuf::from("/opt/app/resources")
            }
        );
    }

    #[test]
    fn test_automated_test_mode() {
        let config = Config::parse_from([
            "convostore",
            "--deployment",
            "automated-test",
            "--source-root",
            "/work/app/e2e",
        ]);
        assert_eq!(
            config.deployment_context().unwrap(),
            DeploymentContext::AutomatedTest {
                source_root: PathBuf::from("/work/app/e2e")
            }
        );
    }
}
