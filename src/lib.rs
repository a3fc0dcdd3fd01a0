pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod migration;
pub mod schema;
pub mod store;
pub mod transaction;

pub use connection::{ConnectionOptions, DatabaseLocation};
pub use error::{ConvoStoreError, MigrationError, Result, StoreError, TransactionError};
pub use migration::{DeploymentContext, MigrationRunResult, MigrationRunner};
pub use schema::{ApplicationSchemaReport, SchemaValidator, validate_application_schema};
pub use store::ConversationStore;
pub use transaction::{TransactionManager, TransactionOptions};
