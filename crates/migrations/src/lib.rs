//! # elif-migrations: Schema Migrations for elif.rs
//!
//! Ordered, reversible schema transformations applied one at a time and
//! tracked in a ledger table inside the target database, so each one runs at
//! most once and the recorded state always matches the schema.
//!
//! Definitions live in a directory as `<version>_<name>.yaml` or
//! `<version>_<name>.sql` files. A [`Migrator`] discovers them, reads the
//! ledger, plans the steps for a command and executes them, one transaction
//! per unit.

pub mod backends;
pub mod config;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod migrator;
pub mod planner;
pub mod schema;
pub mod unit;
pub mod version;

// Re-export the public surface
pub use backends::{MemoryBackend, SqlBackend, SqlDialect};
pub use config::{ConfigError, MigrationConfig};
pub use discovery::{DefinitionFormat, Discoverer};
pub use driver::{LedgerStore, MigrationBackend, MigrationTransaction, SchemaDriver};
pub use error::{DriverError, DriverResult, MigrationError, MigrationResult};
pub use executor::{ExecutionReport, Executor, StepOutcome};
pub use ledger::{Ledger, LedgerEntry};
pub use migrator::{MigrationStatus, Migrator, PlannedChange, StatusReport, UnitStatus};
pub use planner::{MigrationCommand, Plan, PlannedStep, Planner};
pub use schema::{ColumnDef, ColumnType, SchemaOperation};
pub use unit::{ChangeUnit, Direction, UnitBody};
pub use version::{ConventionScheme, SequenceScheme, TimestampScheme, Version, VersionScheme};
