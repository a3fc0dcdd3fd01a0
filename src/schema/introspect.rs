use rusqlite::{Connection, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    pub column_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveForeignKey {
    pub id: i64,
    pub from_column: String,
    pub target_table: String,
    /// `None` when the constraint references the parent's primary key implicitly.
    pub target_column: Option<String>,
    pub on_delete: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveIndex {
    pub name: String,
    pub unique: bool,
    /// `c` for CREATE INDEX, `u` for UNIQUE constraints, `pk` for primary keys.
    pub origin: String,
    pub columns: Vec<String>,
}

impl LiveIndex {
    /// Indexes SQLite creates on its own for PRIMARY KEY / UNIQUE constraints.
    pub fn is_automatic(&self) -> bool {
        self.name.starts_with("sqlite_autoindex_")
    }
}

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<LiveColumn>> {
    let mut stmt = conn.prepare(
        r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?1) ORDER BY cid"#,
    )?;
    let rows = stmt.query_map(params![table], |row| {
        Ok(LiveColumn {
            name: row.get(0)?,
            column_type: row.get(1)?,
            not_null: row.get::<_, i64>(2)? != 0,
            primary_key: row.get::<_, i64>(3)? > 0,
        })
    })?;
    rows.collect()
}

pub fn foreign_keys(conn: &Connection, table: &str) -> rusqlite::Result<Vec<LiveForeignKey>> {
    let mut stmt = conn.prepare(
        r#"SELECT id, "table", "from", "to", on_delete
           FROM pragma_foreign_key_list(?1)
           ORDER BY id, seq"#,
    )?;
    let rows = stmt.query_map(params![table], |row| {
        Ok(LiveForeignKey {
            id: row.get(0)?,
            target_table: row.get(1)?,
            from_column: row.get(2)?,
            target_column: row.get(3)?,
            on_delete: row.get(4)?,
        })
    })?;
    rows.collect()
}

pub fn indexes(conn: &Connection, table: &str) -> rusqlite::Result<Vec<LiveIndex>> {
    let mut list = conn.prepare(
        r#"SELECT name, "unique", origin FROM pragma_index_list(?1) ORDER BY name"#,
    )?;
    let entries = list
        .query_map(params![table], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0, row.get::<_, String>(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    let mut indexes = Vec::with_capacity(entries.len());
    for (name, unique, origin) in entries {
        // Expression columns have no name.
        let columns = info
            .query_map(params![name], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|c| c.unwrap_or_else(|| "<expression>".to_string()))
            .collect();

        indexes.push(LiveIndex {
            name,
            unique,
            origin,
            columns,
        });
    }

    Ok(indexes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE parents (id TEXT PRIMARY KEY NOT NULL);
             CREATE TABLE children (
                 id INTEGER PRIMARY KEY,
                 parent_id TEXT NOT NULL REFERENCES parents(id) ON DELETE CASCADE,
                 label TEXT UNIQUE,
                 rank REAL
             );
             CREATE INDEX idx_children_parent_rank ON children(parent_id, rank);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_columns() {
        let conn = setup();
        let cols = columns(&conn, "children").unwrap();
        assert_eq!(cols.len(), 4);
        assert_eq!(
            cols[0],
            LiveColumn {
                name: "id".to_string(),
                column_type: "INTEGER".to_string(),
                not_null: false,
                primary_key: true,
            }
        );
        assert!(cols[1].not_null);
        assert_eq!(cols[3].column_type, "REAL");
    }

    #[test]
    fn test_missing_table() {
        let conn = setup();
        assert!(!table_exists(&conn, "nope").unwrap());
        assert!(columns(&conn, "nope").unwrap().is_empty());
        assert!(table_exists(&conn, "children").unwrap());
    }

    #[test]
    fn test_foreign_keys() {
        let conn = setup();
        let fks = foreign_keys(&conn, "children").unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].from_column, "parent_id");
        assert_eq!(fks[0].target_table, "parents");
        assert_eq!(fks[0].target_column.as_deref(), Some("id"));
        assert_eq!(fks[0].on_delete, "CASCADE");
    }

    #[test]
    fn test_indexes() {
        let conn = setup();
        let idx = indexes(&conn, "children").unwrap();

        let explicit = idx.iter().find(|i| i.name == "idx_children_parent_rank").unwrap();
        assert_eq!(explicit.columns, vec!["parent_id".to_string(), "rank".to_string()]);
        assert!(!explicit.unique);
        assert_eq!(explicit.origin, "c");

        let auto = idx.iter().find(|i| i.is_automatic()).unwrap();
        assert!(auto.unique);
        assert_eq!(auto.columns, vec!["label".to_string()]);
    }
}
