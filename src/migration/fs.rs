use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    pub exists: bool,
    pub is_directory: bool,
}

/// The file operations the migration runner is allowed to perform. Staging and
/// discovery go through this and nothing else, so tests can substitute it.
pub trait FileSystem: Send + Sync {
    fn directory_stats(&self, path: &Path) -> io::Result<DirectoryStats>;

    /// File names (not paths) of the entries directly inside `path`.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    fn read_file(&self, path: &Path) -> io::Result<String>;

    fn write_file(&self, path: &Path, contents: &str) -> io::Result<()>;

    fn ensure_directory_exists(&self, path: &Path) -> io::Result<()>;
}

/// `FileSystem` backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn directory_stats(&self, path: &Path) -> io::Result<DirectoryStats> {
        match fs::metadata(path) {
            Ok(meta) => Ok(DirectoryStats {
                exists: true,
                is_directory: meta.is_dir(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DirectoryStats::default()),
            Err(e) => Err(e),
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn read_file(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write_file(&self, path: &Path, contents: &str) -> io::Result<()> {
        fs::write(path, contents)
    }

    fn ensure_directory_exists(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_stats() {
        let temp_dir = TempDir::new().unwrap();
        let fs = StdFileSystem;

        let stats = fs.directory_stats(temp_dir.path()).unwrap();
        assert_eq!(stats, DirectoryStats { exists: true, is_directory: true });

        let file = temp_dir.path().join("001_init.sql");
        fs.write_file(&file, "SELECT 1;").unwrap();
        let stats = fs.directory_stats(&file).unwrap();
        assert_eq!(stats, DirectoryStats { exists: true, is_directory: false });

        let stats = fs.directory_stats(&temp_dir.path().join("missing")).unwrap();
        assert_eq!(stats, DirectoryStats::default());
    }

    #[test]
    fn test_ensure_directory_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let fs = StdFileSystem;
        let nested = temp_dir.path().join("a").join("b");

        fs.ensure_directory_exists(&nested).unwrap();
        fs.ensure_directory_exists(&nested).unwrap();
        fs.write_file(&nested.join("x.sql"), "x").unwrap();

        assert_eq!(fs.read_dir(&nested).unwrap(), vec!["x.sql".to_string()]);
        assert_eq!(fs.read_file(&nested.join("x.sql")).unwrap(), "x");
    }
}
