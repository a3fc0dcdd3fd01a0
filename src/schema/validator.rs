use super::definitions::{ExpectedForeignKey, ExpectedIndex, TableSchema};
use super::introspect::{self, LiveColumn, LiveForeignKey, LiveIndex};
use crate::connection::foreign_keys_enabled;
use crate::transaction::TransactionManager;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// An attribute of a column or constraint that differs from the expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub name: String,
    pub expected: String,
    pub actual: String,
}

impl Mismatch {
    fn new(name: &str, expected: impl ToString, actual: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableStructureReport {
    pub is_valid: bool,
    pub missing_columns: Vec<String>,
    pub type_mismatches: Vec<Mismatch>,
    pub nullability_mismatches: Vec<Mismatch>,
    pub primary_key_mismatches: Vec<Mismatch>,
    pub extra_columns: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConstraintReport {
    pub is_valid: bool,
    pub missing_foreign_keys: Vec<String>,
    pub mismatched_foreign_keys: Vec<Mismatch>,
    pub extra_foreign_keys: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub is_valid: bool,
    pub missing_indexes: Vec<String>,
    pub mismatched_indexes: Vec<Mismatch>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverallResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaValidationReport {
    pub table: String,
    /// Migration version the expected definition describes.
    pub expected_version: u32,
    pub table_structure: TableStructureReport,
    pub constraints: ConstraintReport,
    pub indexes: IndexReport,
    pub overall: OverallResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintEnforcementResult {
    pub is_valid: bool,
    pub foreign_keys_enabled: bool,
    /// Rows currently violating a foreign key of the table.
    pub violations: usize,
    pub errors: Vec<String>,
}

/// Reports built from a failed introspection query: invalid, one error line.
trait IntrospectionFailure: Default {
    fn failed(message: String) -> Self;
}

macro_rules! introspection_failure {
    ($($report:ty),*) => {
        $(impl IntrospectionFailure for $report {
            fn failed(message: String) -> Self {
                Self {
                    is_valid: false,
                    errors: vec![message],
                    ..Self::default()
                }
            }
        })*
    };
}

introspection_failure!(TableStructureReport, ConstraintReport, IndexReport);

/// Compares one table of the live database with its expected definition.
/// Never mutates anything; every problem ends up in the returned report.
pub struct SchemaValidator<'a> {
    manager: &'a TransactionManager,
    schema: &'a TableSchema,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(manager: &'a TransactionManager, schema: &'a TableSchema) -> Self {
        Self { manager, schema }
    }

    /// Run `read` in a read-only transaction after checking the table exists.
    /// Any failure is folded into an invalid report.
    fn introspect<T, R>(
        &self,
        what: &str,
        read: impl FnOnce(&rusqlite::Connection, &str) -> rusqlite::Result<T>,
    ) -> Result<T, R>
    where
        R: IntrospectionFailure,
    {
        let table = self.schema.table;
        let outcome = self.manager.execute_read_only_transaction(|conn| {
            if !introspect::table_exists(conn, table)? {
                return Ok(None);
            }
            read(conn, table).map(Some)
        });

        match outcome {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(R::failed(format!("Table '{}' does not exist", table))),
            Err(e) => {
                warn!("Failed to introspect {} of '{}': {}", what, table, e);
                Err(R::failed(format!("Failed to introspect {} of '{}': {}", what, table, e)))
            }
        }
    }

    pub fn validate_table_structure(&self) -> TableStructureReport {
        match self.introspect("columns", introspect::columns) {
            Ok(live) => compare_columns(self.schema, &live),
            Err(report) => report,
        }
    }

    pub fn validate_constraints(&self) -> ConstraintReport {
        match self.introspect("foreign keys", introspect::foreign_keys) {
            Ok(live) => compare_foreign_keys(self.schema, &live),
            Err(report) => report,
        }
    }

    pub fn validate_indexes(&self) -> IndexReport {
        match self.introspect("indexes", introspect::indexes) {
            Ok(live) => compare_indexes(self.schema, &live),
            Err(report) => report,
        }
    }

    pub fn validate_schema(&self) -> SchemaValidationReport {
        let table_structure = self.validate_table_structure();
        let constraints = self.validate_constraints();
        let indexes = self.validate_indexes();

        let is_valid = table_structure.is_valid && constraints.is_valid && indexes.is_valid;
        let errors = table_structure
            .errors
            .iter()
            .chain(&constraints.errors)
            .chain(&indexes.errors)
            .cloned()
            .collect();

        debug!("Schema validation of '{}': valid={}", self.schema.table, is_valid);

        SchemaValidationReport {
            table: self.schema.table.to_string(),
            expected_version: self.schema.version,
            table_structure,
            constraints,
            indexes,
            overall: OverallResult { is_valid, errors },
        }
    }

    /// Check that the engine actually enforces foreign keys on this handle and
    /// that no stored row of the table currently violates one.
    pub fn test_constraint_enforcement(&self) -> ConstraintEnforcementResult {
        let table = self.schema.table;
        let outcome = self.manager.execute_read_only_transaction(|conn| {
            let enabled = foreign_keys_enabled(conn)?;
            let violations = if introspect::table_exists(conn, table)? {
                let mut stmt = conn.prepare("SELECT COUNT(*) FROM pragma_foreign_key_check(?1)")?;
                stmt.query_row([table], |row| row.get::<_, i64>(0))? as usize
            } else {
                0
            };
            Ok::<_, rusqlite::Error>((enabled, violations))
        });

        match outcome {
            Ok((enabled, violations)) => {
                let mut errors = Vec::new();
                if !enabled {
                    errors.push(
                        "Foreign key enforcement is disabled (PRAGMA foreign_keys = OFF)".to_string(),
                    );
                }
                if violations > 0 {
                    errors.push(format!(
                        "{} row(s) in '{}' violate a foreign key",
                        violations, table
                    ));
                }
                ConstraintEnforcementResult {
                    is_valid: errors.is_empty(),
                    foreign_keys_enabled: enabled,
                    violations,
                    errors,
                }
            }
            Err(e) => ConstraintEnforcementResult {
                is_valid: false,
                foreign_keys_enabled: false,
                violations: 0,
                errors: vec![format!("Failed to check foreign key enforcement: {}", e)],
            },
        }
    }
}

fn compare_columns(schema: &TableSchema, live: &[LiveColumn]) -> TableStructureReport {
    let mut report = TableStructureReport::default();

    for expected in schema.columns {
        let Some(actual) = live.iter().find(|c| c.name == expected.name) else {
            report.missing_columns.push(expected.name.to_string());
            report.errors.push(format!("Missing column: {}.{}", schema.table, expected.name));
            continue;
        };

        if actual.column_type != expected.column_type {
            report
                .type_mismatches
                .push(Mismatch::new(expected.name, expected.column_type, &actual.column_type));
            report.errors.push(format!(
                "Column {}.{} has type '{}', expected '{}'",
                schema.table, expected.name, actual.column_type, expected.column_type
            ));
        }

        if actual.not_null != expected.not_null {
            report.nullability_mismatches.push(Mismatch::new(
                expected.name,
                nullability(expected.not_null),
                nullability(actual.not_null),
            ));
            report.errors.push(format!(
                "Column {}.{} is {}, expected {}",
                schema.table,
                expected.name,
                nullability(actual.not_null),
                nullability(expected.not_null)
            ));
        }

        if actual.primary_key != expected.primary_key {
            report
                .primary_key_mismatches
                .push(Mismatch::new(expected.name, expected.primary_key, actual.primary_key));
            report.errors.push(format!(
                "Column {}.{} primary key membership is {}, expected {}",
                schema.table, expected.name, actual.primary_key, expected.primary_key
            ));
        }
    }

    for actual in live {
        if schema.column(&actual.name).is_none() {
            report.extra_columns.push(actual.name.clone());
            report
                .errors
                .push(format!("Unexpected column: {}.{}", schema.table, actual.name));
        }
    }

    report.is_valid = report.errors.is_empty();
    report
}

fn nullability(not_null: bool) -> &'static str {
    if not_null { "NOT NULL" } else { "NULL" }
}

fn describe_foreign_key(from: &str, table: &str, column: &str, on_delete: &str) -> String {
    format!("{} -> {}({}) ON DELETE {}", from, table, column, on_delete)
}

fn foreign_key_matches(expected: &ExpectedForeignKey, actual: &LiveForeignKey) -> bool {
    actual.target_table.eq_ignore_ascii_case(expected.target_table)
        && actual.target_column.as_deref() == Some(expected.target_column)
        && actual.on_delete.eq_ignore_ascii_case(expected.on_delete)
}

fn compare_foreign_keys(schema: &TableSchema, live: &[LiveForeignKey]) -> ConstraintReport {
    let mut report = ConstraintReport::default();
    // Live constraint ids accounted for by an expected foreign key, matched or not.
    let mut claimed: BTreeSet<i64> = BTreeSet::new();

    for expected in schema.foreign_keys {
        let expected_desc = describe_foreign_key(
            expected.from_column,
            expected.target_table,
            expected.target_column,
            expected.on_delete,
        );
        let candidates: Vec<&LiveForeignKey> = live
            .iter()
            .filter(|fk| fk.from_column == expected.from_column && !claimed.contains(&fk.id))
            .collect();

        if let Some(matched) = candidates.iter().find(|fk| foreign_key_matches(expected, fk)) {
            claimed.insert(matched.id);
            continue;
        }

        let Some(actual) = candidates.first() else {
            report.missing_foreign_keys.push(expected_desc.clone());
            report
                .errors
                .push(format!("Missing foreign key on {}: {}", schema.table, expected_desc));
            continue;
        };

        claimed.insert(actual.id);
        let actual_desc = describe_live_foreign_key(actual);
        report
            .mismatched_foreign_keys
            .push(Mismatch::new(expected.from_column, &expected_desc, &actual_desc));
        report.errors.push(format!(
            "Foreign key on {}.{} is '{}', expected '{}'",
            schema.table, expected.from_column, actual_desc, expected_desc
        ));
    }

    for actual in live {
        // Composite constraints list one row per column under the same id.
        if !claimed.insert(actual.id) {
            continue;
        }
        let desc = describe_live_foreign_key(actual);
        report
            .errors
            .push(format!("Unexpected foreign key on {}: {}", schema.table, desc));
        report.extra_foreign_keys.push(desc);
    }

    report.is_valid = report.errors.is_empty();
    report
}

fn describe_live_foreign_key(fk: &LiveForeignKey) -> String {
    describe_foreign_key(
        &fk.from_column,
        &fk.target_table,
        fk.target_column.as_deref().unwrap_or("<primary key>"),
        &fk.on_delete,
    )
}

fn describe_index(columns: impl IntoIterator<Item = impl AsRef<str>>, unique: bool) -> String {
    let cols: Vec<String> = columns.into_iter().map(|c| c.as_ref().to_string()).collect();
    format!("{}({})", if unique { "UNIQUE " } else { "" }, cols.join(", "))
}

fn compare_indexes(schema: &TableSchema, live: &[LiveIndex]) -> IndexReport {
    let mut report = IndexReport::default();

    for expected in schema.indexes {
        let Some(actual) = live
            .iter()
            .filter(|i| !i.is_automatic())
            .find(|i| i.name == expected.name)
        else {
            report.missing_indexes.push(expected.name.to_string());
            report.errors.push(format!("Missing index: {} on {}", expected.name, schema.table));
            continue;
        };

        if !index_matches(expected, actual) {
            let expected_desc = describe_index(expected.columns.iter(), expected.unique);
            let actual_desc = describe_index(actual.columns.iter(), actual.unique);
            report
                .mismatched_indexes
                .push(Mismatch::new(expected.name, &expected_desc, &actual_desc));
            report.errors.push(format!(
                "Index {} covers {}, expected {}",
                expected.name, actual_desc, expected_desc
            ));
        }
    }

    report.is_valid = report.errors.is_empty();
    report
}

/// Column membership is compared as a set; order does not matter.
fn index_matches(expected: &ExpectedIndex, actual: &LiveIndex) -> bool {
    let expected_cols: BTreeSet<&str> = expected.columns.iter().copied().collect();
    let actual_cols: BTreeSet<&str> = actual.columns.iter().map(String::as_str).collect();
    expected_cols == actual_cols && expected.unique == actual.unique
}

impl SchemaValidationReport {
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        if self.overall.is_valid {
            report.push_str(&format!("Table '{}': OK\n", self.table));
            return report;
        }

        report.push_str(&format!(
            "\nTable '{}' does not match its expected schema (version {}):\n",
            self.table, self.expected_version
        ));

        let structure = &self.table_structure;
        if !structure.missing_columns.is_empty() {
            report.push_str("  Missing columns:\n");
            for col in &structure.missing_columns {
                report.push_str(&format!("    - {}\n", col));
            }
        }

        if !structure.extra_columns.is_empty() {
            report.push_str("  Unexpected columns:\n");
            for col in &structure.extra_columns {
                report.push_str(&format!("    - {}\n", col));
            }
        }

        for (label, mismatches) in [
            ("Type mismatches", &structure.type_mismatches),
            ("Nullability mismatches", &structure.nullability_mismatches),
            ("Primary key mismatches", &structure.primary_key_mismatches),
            ("Foreign key mismatches", &self.constraints.mismatched_foreign_keys),
            ("Index mismatches", &self.indexes.mismatched_indexes),
        ] {
            if !mismatches.is_empty() {
                report.push_str(&format!("  {}:\n", label));
                for m in mismatches {
                    report.push_str(&format!(
                        "    - {} expected '{}' but found '{}'\n",
                        m.name, m.expected, m.actual
                    ));
                }
            }
        }

        for (label, items) in [
            ("Missing foreign keys", &self.constraints.missing_foreign_keys),
            ("Unexpected foreign keys", &self.constraints.extra_foreign_keys),
            ("Missing indexes", &self.indexes.missing_indexes),
        ] {
            if !items.is_empty() {
                report.push_str(&format!("  {}:\n", label));
                for item in items {
                    report.push_str(&format!("    - {}\n", item));
                }
            }
        }

        // Introspection failures carry no itemised lists, only errors.
        let itemised = !structure.missing_columns.is_empty()
            || !structure.extra_columns.is_empty()
            || !structure.type_mismatches.is_empty()
            || !structure.nullability_mismatches.is_empty()
            || !structure.primary_key_mismatches.is_empty()
            || !self.constraints.missing_foreign_keys.is_empty()
            || !self.constraints.mismatched_foreign_keys.is_empty()
            || !self.constraints.extra_foreign_keys.is_empty()
            || !self.indexes.missing_indexes.is_empty()
            || !self.indexes.mismatched_indexes.is_empty();
        if !itemised {
            for error in &self.overall.errors {
                report.push_str(&format!("  {}\n", error));
            }
        }

        report
    }
}
