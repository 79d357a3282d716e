//! Driver Traits - the boundary between the engine and a database
//!
//! The engine never issues SQL itself. It asks a [`MigrationBackend`] for a
//! transaction and drives it through two capability traits: [`SchemaDriver`]
//! for schema changes and [`LedgerStore`] for ledger persistence. Both run on
//! the same transaction so a unit and its ledger row commit together.

use async_trait::async_trait;

use crate::error::DriverResult;
use crate::ledger::LedgerEntry;
use crate::schema::ColumnDef;

/// Translates abstract schema operations into native commands
#[async_trait]
pub trait SchemaDriver: Send {
    async fn create_table(&mut self, table: &str, columns: &[ColumnDef]) -> DriverResult<()>;

    async fn drop_table(&mut self, table: &str) -> DriverResult<()>;

    async fn add_column(&mut self, table: &str, column: &ColumnDef) -> DriverResult<()>;

    async fn remove_column(&mut self, table: &str, column: &str) -> DriverResult<()>;

    async fn rename_column(&mut self, table: &str, from: &str, to: &str) -> DriverResult<()>;

    async fn rename_table(&mut self, from: &str, to: &str) -> DriverResult<()>;

    /// Execute one native statement as written
    async fn execute_raw(&mut self, sql: &str) -> DriverResult<()>;
}

/// Persistence primitives behind the [`Ledger`](crate::ledger::Ledger)
#[async_trait]
pub trait LedgerStore: Send {
    /// Create the ledger table if it does not exist yet
    async fn ensure_ledger(&mut self, table: &str) -> DriverResult<()>;

    async fn ledger_entries(&mut self, table: &str) -> DriverResult<Vec<LedgerEntry>>;

    async fn insert_entry(&mut self, table: &str, entry: &LedgerEntry) -> DriverResult<()>;

    /// Delete the entry stored under `version`, returning the number of rows removed
    async fn delete_entry(&mut self, table: &str, version: &str) -> DriverResult<u64>;
}

/// A unit of work: schema changes and ledger writes that commit or roll back together
#[async_trait]
pub trait MigrationTransaction: SchemaDriver + LedgerStore {
    async fn commit(self: Box<Self>) -> DriverResult<()>;

    async fn rollback(self: Box<Self>) -> DriverResult<()>;
}

/// A database the engine can migrate
#[async_trait]
pub trait MigrationBackend: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Whether schema changes take part in transactions on this backend
    fn supports_transactional_ddl(&self) -> bool;

    async fn begin(&self) -> DriverResult<Box<dyn MigrationTransaction>>;
}
