pub mod definitions;
pub mod introspect;
pub mod validator;

pub use definitions::{TableSchema, application_schemas};
pub use validator::{
    ConstraintEnforcementResult, ConstraintReport, IndexReport, Mismatch, OverallResult,
    SchemaValidationReport, SchemaValidator, TableStructureReport,
};

use crate::transaction::TransactionManager;
use serde::Serialize;

/// Validation of a set of tables plus the handle's foreign-key enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationSchemaReport {
    pub is_valid: bool,
    pub tables: Vec<SchemaValidationReport>,
    pub enforcement: ConstraintEnforcementResult,
}

impl ApplicationSchemaReport {
    pub fn format_report(&self) -> String {
        let mut report: String = self.tables.iter().map(|t| t.format_report()).collect();
        for error in &self.enforcement.errors {
            report.push_str(&format!("Constraint enforcement: {}\n", error));
        }
        report
    }
}

pub fn validate_tables(
    manager: &TransactionManager,
    schemas: &[TableSchema],
) -> ApplicationSchemaReport {
    let tables: Vec<SchemaValidationReport> = schemas
        .iter()
        .map(|schema| SchemaValidator::new(manager, schema).validate_schema())
        .collect();

    let mut enforcement = ConstraintEnforcementResult {
        is_valid: true,
        foreign_keys_enabled: true,
        violations: 0,
        errors: Vec::new(),
    };
    for schema in schemas {
        let result = SchemaValidator::new(manager, schema).test_constraint_enforcement();
        enforcement.foreign_keys_enabled &= result.foreign_keys_enabled;
        enforcement.violations += result.violations;
        for error in result.errors {
            if !enforcement.errors.contains(&error) {
                enforcement.errors.push(error);
            }
        }
    }
    enforcement.is_valid = enforcement.errors.is_empty();

    ApplicationSchemaReport {
        is_valid: tables.iter().all(|t| t.overall.is_valid) && enforcement.is_valid,
        tables,
        enforcement,
    }
}

/// Validate every table the application expects.
pub fn validate_application_schema(manager: &TransactionManager) -> ApplicationSchemaReport {
    validate_tables(manager, application_schemas())
}
