pub mod connection;
pub mod ledger;
pub mod migrations;
pub mod runner;
pub mod schema;

pub use rusqlite::Connection;

pub use ledger::{MigrationLedger, MigrationRecord};
pub use migrations::{Catalog, Migration, MigrationBody};
pub use runner::{MigrationRunner, MigrationState, MigrationStatus, RunReport, RunnerOptions};
