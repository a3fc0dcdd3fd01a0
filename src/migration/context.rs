use std::path::PathBuf;

const MIGRATIONS_DIR: &str = "migrations";

/// Where the application is running from, which decides where the canonical
/// (read-only) migration files live. Resolved once at startup and injected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentContext {
    /// Installed build; migrations ship as bundled resources.
    Packaged { resources_dir: PathBuf },
    /// Running from a source checkout.
    Development { source_root: PathBuf },
    /// End-to-end harness, which runs one directory below the project root.
    AutomatedTest { source_root: PathBuf },
}

impl DeploymentContext {
    pub fn canonical_migrations_dir(&self) -> PathBuf {
        match self {
            DeploymentContext::Packaged { resources_dir } => resources_dir.join(MIGRATIONS_DIR),
            DeploymentContext::Development { source_root } => source_root.join(MIGRATIONS_DIR),
            DeploymentContext::AutomatedTest { source_root } => {
                // A relative root such as "." has no usable parent until it is absolute.
                let root = std::path::absolute(source_root).unwrap_or_else(|_| source_root.clone());
                root.parent().unwrap_or(root.as_path()).join(MIGRATIONS_DIR)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeploymentContext::Packaged { .. } => "packaged",
            DeploymentContext::Development { .. } => "development",
            DeploymentContext::AutomatedTest { .. } => "automated-test",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_dirs() {
        let packaged = DeploymentContext::Packaged {
            resources_dir: PathBuf::from("/opt/app/resources"),
        };
        assert_eq!(
            packaged.canonical_migrations_dir(),
            PathBuf::from("/opt/app/resources/migrations")
        );

        let dev = DeploymentContext::Development {
            source_root: PathBuf::from("/src/app"),
        };
        assert_eq!(dev.canonical_migrations_dir(), PathBuf::from("/src/app/migrations"));

        let test = DeploymentContext::AutomatedTest {
            source_root: PathBuf::from("/src/app/e2e"),
        };
        assert_eq!(test.canonical_migrations_dir(), PathBuf::from("/src/app/migrations"));
    }

    #[test]
    fn test_automated_test_at_filesystem_root() {
        let test = DeploymentContext::AutomatedTest {
            source_root: PathBuf::from("/"),
        };
        assert_eq!(test.canonical_migrations_dir(), PathBuf::from("/migrations"));
    }

    #[test]
    fn test_automated_test_with_relative_root() {
        let cwd = std::env::current_dir().unwrap();

        let dot = DeploymentContext::AutomatedTest {
            source_root: PathBuf::from("."),
        };
        let expected = cwd.parent().unwrap_or(&cwd).join("migrations");
        assert_eq!(dot.canonical_migrations_dir(), expected);
        assert_ne!(
            dot.canonical_migrations_dir(),
            DeploymentContext::Development {
                source_root: PathBuf::from(".")
            }
            .canonical_migrations_dir()
        );

        let nested = DeploymentContext::AutomatedTest {
            source_root: PathBuf::from("e2e"),
        };
        assert_eq!(nested.canonical_migrations_dir(), cwd.join("migrations"));
    }
}
