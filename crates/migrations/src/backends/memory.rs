//! In-memory schema backend for development and testing
//!
//! Models tables as ordered column lists. A transaction works on a private
//! copy of the state and publishes it on commit, so a failed unit leaves no
//! trace. Commands are validated the way a database would reject them:
//! creating an existing table, dropping a missing column, and so on.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::driver::{LedgerStore, MigrationBackend, MigrationTransaction, SchemaDriver};
use crate::error::{DriverError, DriverResult};
use crate::ledger::LedgerEntry;
use crate::schema::ColumnDef;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: BTreeMap<String, Vec<ColumnDef>>,
    ledgers: BTreeMap<String, Vec<LedgerEntry>>,
    statements: Vec<String>,
}

#[derive(Debug, Default)]
struct MemoryOptions {
    latency: Option<Duration>,
    rejected_statements: Vec<String>,
    ledger_failure: Option<DriverError>,
    ledger_read_failure: Option<DriverError>,
}

/// In-memory migration backend
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    options: Arc<Mutex<MemoryOptions>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every command, to exercise cancellation of in-flight units
    pub fn with_latency(self, latency: Duration) -> Self {
        self.options.lock().latency = Some(latency);
        self
    }

    /// Reject raw statements containing `pattern`
    pub fn reject_statements_containing(&self, pattern: impl Into<String>) {
        self.options.lock().rejected_statements.push(pattern.into());
    }

    /// Fail every later ledger insert or delete with `err`
    pub fn fail_ledger_writes_with(&self, err: DriverError) {
        self.options.lock().ledger_failure = Some(err);
    }

    /// Fail every later ledger read with `err`
    pub fn fail_ledger_reads_with(&self, err: DriverError) {
        self.options.lock().ledger_read_failure = Some(err);
    }

    pub fn tables(&self) -> Vec<String> {
        self.state.lock().tables.keys().cloned().collect()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().tables.contains_key(table)
    }

    /// Column names of `table` in declaration order
    pub fn columns(&self, table: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|columns| columns.iter().map(|c| c.name.clone()).collect())
    }

    pub fn has_ledger(&self, table: &str) -> bool {
        self.state.lock().ledgers.contains_key(table)
    }

    /// Stored version tokens of the ledger `table`, in insertion order
    pub fn ledger_versions(&self, table: &str) -> Vec<String> {
        self.state
            .lock()
            .ledgers
            .get(table)
            .map(|entries| entries.iter().map(|e| e.version.clone()).collect())
            .unwrap_or_default()
    }

    /// Raw statements executed by committed transactions
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }
}

#[async_trait]
impl MigrationBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    async fn begin(&self) -> DriverResult<Box<dyn MigrationTransaction>> {
        let working = self.state.lock().clone();
        let (latency, rejected, ledger_failure, ledger_read_failure) = {
            let options = self.options.lock();
            (
                options.latency,
                options.rejected_statements.clone(),
                options.ledger_failure.clone(),
                options.ledger_read_failure.clone(),
            )
        };

        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.state),
            working,
            latency,
            rejected,
            ledger_failure,
            ledger_read_failure,
        }))
    }
}

/// Transaction over a private copy of the backend state
pub struct MemoryTransaction {
    shared: Arc<Mutex<MemoryState>>,
    working: MemoryState,
    latency: Option<Duration>,
    rejected: Vec<String>,
    ledger_failure: Option<DriverError>,
    ledger_read_failure: Option<DriverError>,
}

impl MemoryTransaction {
    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn table_mut(&mut self, table: &str) -> DriverResult<&mut Vec<ColumnDef>> {
        self.working
            .tables
            .get_mut(table)
            .ok_or_else(|| DriverError::rejected(format!("table '{}' does not exist", table)))
    }

    fn ledger_mut(&mut self, table: &str) -> DriverResult<&mut Vec<LedgerEntry>> {
        self.working
            .ledgers
            .get_mut(table)
            .ok_or_else(|| DriverError::rejected(format!("ledger table '{}' does not exist", table)))
    }
}

#[async_trait]
impl SchemaDriver for MemoryTransaction {
    async fn create_table(&mut self, table: &str, columns: &[ColumnDef]) -> DriverResult<()> {
        self.pause().await;
        if self.working.tables.contains_key(table) {
            return Err(DriverError::rejected(format!("table '{}' already exists", table)));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(DriverError::rejected(format!(
                    "column '{}' specified more than once",
                    column.name
                )));
            }
        }
        self.working.tables.insert(table.to_string(), columns.to_vec());
        Ok(())
    }

    async fn drop_table(&mut self, table: &str) -> DriverResult<()> {
        self.pause().await;
        self.working
            .tables
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| DriverError::rejected(format!("table '{}' does not exist", table)))
    }

    async fn add_column(&mut self, table: &str, column: &ColumnDef) -> DriverResult<()> {
        self.pause().await;
        let columns = self.table_mut(table)?;
        if columns.iter().any(|c| c.name == column.name) {
            return Err(DriverError::rejected(format!(
                "column '{}' of table '{}' already exists",
                column.name, table
            )));
        }
        columns.push(column.clone());
        Ok(())
    }

    async fn remove_column(&mut self, table: &str, column: &str) -> DriverResult<()> {
        self.pause().await;
        let columns = self.table_mut(table)?;
        let position = columns.iter().position(|c| c.name == column).ok_or_else(|| {
            DriverError::rejected(format!("column '{}' of table '{}' does not exist", column, table))
        })?;
        columns.remove(position);
        Ok(())
    }

    async fn rename_column(&mut self, table: &str, from: &str, to: &str) -> DriverResult<()> {
        self.pause().await;
        let columns = self.table_mut(table)?;
        if columns.iter().any(|c| c.name == to) {
            return Err(DriverError::rejected(format!(
                "column '{}' of table '{}' already exists",
                to, table
            )));
        }
        let column = columns.iter_mut().find(|c| c.name == from).ok_or_else(|| {
            DriverError::rejected(format!("column '{}' of table '{}' does not exist", from, table))
        })?;
        column.name = to.to_string();
        Ok(())
    }

    async fn rename_table(&mut self, from: &str, to: &str) -> DriverResult<()> {
        self.pause().await;
        if self.working.tables.contains_key(to) {
            return Err(DriverError::rejected(format!("table '{}' already exists", to)));
        }
        let columns = self
            .working
            .tables
            .remove(from)
            .ok_or_else(|| DriverError::rejected(format!("table '{}' does not exist", from)))?;
        self.working.tables.insert(to.to_string(), columns);
        Ok(())
    }

    async fn execute_raw(&mut self, sql: &str) -> DriverResult<()> {
        self.pause().await;
        if let Some(pattern) = self.rejected.iter().find(|p| sql.contains(p.as_str())) {
            return Err(DriverError::rejected(format!(
                "statement rejected (matched '{}'): {}",
                pattern, sql
            )));
        }
        self.working.statements.push(sql.to_string());
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryTransaction {
    async fn ensure_ledger(&mut self, table: &str) -> DriverResult<()> {
        self.working.ledgers.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn ledger_entries(&mut self, table: &str) -> DriverResult<Vec<LedgerEntry>> {
        if let Some(err) = &self.ledger_read_failure {
            return Err(err.clone());
        }
        Ok(self.ledger_mut(table)?.clone())
    }

    async fn insert_entry(&mut self, table: &str, entry: &LedgerEntry) -> DriverResult<()> {
        if let Some(err) = &self.ledger_failure {
            return Err(err.clone());
        }
        let entries = self.ledger_mut(table)?;
        if entries.iter().any(|e| e.version == entry.version) {
            return Err(DriverError::rejected(format!(
                "duplicate key value violates primary key of '{}': {}",
                table, entry.version
            )));
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn delete_entry(&mut self, table: &str, version: &str) -> DriverResult<u64> {
        if let Some(err) = &self.ledger_failure {
            return Err(err.clone());
        }
        let entries = self.ledger_mut(table)?;
        let before = entries.len();
        entries.retain(|e| e.version != version);
        Ok((before - entries.len()) as u64)
    }
}

#[async_trait]
impl MigrationTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> DriverResult<()> {
        let this = *self;
        *this.shared.lock() = this.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DriverResult<()> {
        Ok(())
    }
}
