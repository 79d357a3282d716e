//! Error types for the migration engine
//!
//! Discovery, planning, ledger and execution failures all surface as
//! [`MigrationError`]. Drivers report through the narrower [`DriverError`],
//! which the executor wraps with the identity of the failing unit.

use std::path::PathBuf;
use thiserror::Error;

use crate::unit::Direction;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Result type alias for schema driver and ledger store calls
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors raised by the migration engine
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A definition file has no parseable version prefix
    #[error("Malformed migration name '{file}': expected <version>_<name>.<ext>")]
    MalformedUnitName { file: String },

    /// Two definition files resolve to the same version
    #[error("Duplicate migration version {version}: {} and {}", .first.display(), .second.display())]
    DuplicateVersion {
        version: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// A definition file could not be parsed
    #[error("Invalid migration definition {}: {message}", .file.display())]
    InvalidDefinition { file: PathBuf, message: String },

    /// A change-style unit uses an operation without a structural inverse
    #[error("Migration {version} ({name}) cannot be reversed automatically: {operation}")]
    IrreversibleChange {
        version: String,
        name: String,
        operation: String,
    },

    /// The database rejected a schema command
    #[error("Migration {version} ({name}) failed while running {direction}: {message}")]
    DriverFailure {
        version: String,
        name: String,
        direction: Direction,
        message: String,
    },

    /// The ledger already holds an entry for this version
    #[error("Ledger already records version {0} as applied")]
    DuplicateEntry(String),

    /// The ledger holds no entry for this version
    #[error("Ledger has no entry for version {0}")]
    MissingEntry(String),

    /// A ledger row carries a version that cannot be parsed
    #[error("Ledger entry '{0}' is not a valid migration version")]
    MalformedLedgerEntry(String),

    /// An applied version has no definition on disk to revert it with
    #[error("Version {0} is recorded as applied but no migration definition was found")]
    MissingDefinition(String),

    /// The run was cancelled or timed out while a unit was in flight
    #[error("Migration {version} ({name}) aborted: {reason}")]
    ExecutionAborted {
        version: String,
        name: String,
        reason: String,
    },

    /// A requested target is not a valid version token
    #[error("Invalid migration version '{0}'")]
    InvalidVersion(String),

    /// Reading or writing the ledger failed
    #[error("Ledger error: {0}")]
    Ledger(#[source] DriverError),

    /// The database could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] crate::config::ConfigError),
}

impl MigrationError {
    /// True for errors detected before any database access
    pub fn is_discovery_error(&self) -> bool {
        matches!(
            self,
            MigrationError::MalformedUnitName { .. }
                | MigrationError::DuplicateVersion { .. }
                | MigrationError::InvalidDefinition { .. }
                | MigrationError::IrreversibleChange { .. }
        )
    }
}

/// Errors reported by schema drivers and ledger stores
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The database rejected the command
    #[error("{0}")]
    Rejected(String),

    /// The driver gave up waiting on the database
    #[error("timed out: {0}")]
    TimedOut(String),

    /// The host cancelled the in-flight command
    #[error("cancelled")]
    Cancelled,
}

impl DriverError {
    pub fn rejected(message: impl Into<String>) -> Self {
        DriverError::Rejected(message.into())
    }

    /// Whether this failure should abort the run rather than count as a rejected command
    pub fn is_abort(&self) -> bool {
        matches!(self, DriverError::TimedOut(_) | DriverError::Cancelled)
    }
}

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DriverError::TimedOut(err.to_string()),
            other => DriverError::Rejected(other.to_string()),
        }
    }
}
