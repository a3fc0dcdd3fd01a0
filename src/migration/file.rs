use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

lazy_static! {
    /// `NNN_description.sql`: exactly three digits, an underscore, a name.
    static ref MIGRATION_FILENAME: Regex = Regex::new(r"^(\d{3})_([A-Za-z0-9][A-Za-z0-9_\-]*)\.sql$").unwrap();
}

/// One migration as staged on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub order: u32,
    pub name: String,
    pub filename: String,
    pub content: String,
}

impl MigrationFile {
    /// Split a filename into `(order, name)`, or `None` if it is not a migration.
    pub fn parse_filename(filename: &str) -> Option<(u32, String)> {
        let caps = MIGRATION_FILENAME.captures(filename)?;
        let order = caps.get(1)?.as_str().parse::<u32>().ok()?;
        let name = caps.get(2)?.as_str().to_string();
        Some((order, name))
    }

    pub fn is_migration_filename(filename: &str) -> bool {
        MIGRATION_FILENAME.is_match(filename)
    }

    pub fn from_parts(filename: &str, content: String) -> Option<Self> {
        let (order, name) = Self::parse_filename(filename)?;
        Some(Self {
            order,
            name,
            filename: filename.to_string(),
            content,
        })
    }

    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.order.to_string());
        hasher.update(&self.name);
        hasher.update(&self.content);
        format!("{:x}", hasher.finalize())
    }
}
