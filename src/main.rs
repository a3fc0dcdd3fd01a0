use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use convostore::config::{Config, ReportFormat};
use convostore::error::ConvoStoreError;
use convostore::migration::{MigrationRunResult, MigrationRunner};
use convostore::schema::{ApplicationSchemaReport, validate_application_schema};
use convostore::transaction::TransactionManager;

const EXIT_MIGRATION_FAILED: i32 = 1;
const EXIT_STAGING_FAILED: i32 = 2;
const EXIT_SCHEMA_INVALID: i32 = 3;

#[derive(Serialize)]
struct StartupReport<'a> {
    database: String,
    deployment: &'static str,
    migrations: &'a MigrationRunResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a ApplicationSchemaReport>,
}

fn main() -> Result<()> {
    let config = Config::load();
    convostore::logging::init(&config);

    info!("convostore v{}", env!("CARGO_PKG_VERSION"));

    let context = config.deployment_context()?;
    let manager = Arc::new(TransactionManager::new(config.connection_options()));
    let database = manager
        .location()
        .map(ToString::to_string)
        .unwrap_or_default();
    info!("Database: {}, deployment: {}", database, context.label());

    let mut runner = MigrationRunner::new(manager.clone(), context, config.staged_migrations_dir());

    let migrations = match runner.run_migrations() {
        Ok(result) => result,
        Err(e) if e.is_staging() => {
            error!("Could not prepare migrations: {}", e);
            std::process::exit(EXIT_STAGING_FAILED);
        }
        Err(e) => return Err(ConvoStoreError::from(e).into()),
    };

    for failure in &migrations.errors {
        error!("Migration {} ({}) failed: {}", failure.order, failure.filename, failure.error);
    }

    let schema = if config.skip_validation || !migrations.success {
        None
    } else {
        Some(validate_application_schema(&manager))
    };

    let report = StartupReport {
        database,
        deployment: runner.context().label(),
        migrations: &migrations,
        schema: schema.as_ref(),
    };
    print_report(&report, config.report)?;

    manager.close();

    if !migrations.success {
        std::process::exit(EXIT_MIGRATION_FAILED);
    }
    if let Some(schema) = &schema {
        if !schema.is_valid {
            warn!("Schema validation failed");
            std::process::exit(EXIT_SCHEMA_INVALID);
        }
    }

    Ok(())
}

fn print_report(report: &StartupReport<'_>, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        ReportFormat::Text => {
            let m = report.migrations;
            println!("database:         {}", report.database);
            println!("deployment:       {}", report.deployment);
            println!("success:          {}", m.success);
            println!("migrations run:   {}", m.migrations_run);
            println!("current version:  {}", m.current_version);
            for failure in &m.errors {
                println!(
                    "error:            {:03} {}: {}",
                    failure.order, failure.filename, failure.error
                );
            }
            for filename in &m.modified {
                println!("modified:         {}", filename);
            }
            match report.schema {
                Some(schema) if schema.is_valid => println!("schema:           valid"),
                Some(schema) => {
                    println!("schema:           INVALID");
                    print!("{}", schema.format_report());
                }
                None => println!("schema:           not checked"),
            }
        }
    }
    Ok(())
}
