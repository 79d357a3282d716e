//! Ledger - the record of applied versions kept inside the target database
//!
//! The ledger is read fresh for every planning cycle and never cached. Writes
//! happen on the caller's transaction so they commit with the unit they
//! describe.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::driver::LedgerStore;
use crate::error::{DriverError, MigrationError, MigrationResult};
use crate::version::{Version, VersionScheme};

/// A row of the ledger table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Version token as written in the definition filename
    pub version: String,
    /// When the migration was applied
    pub applied_at: DateTime<Utc>,
}

/// Reads and writes the ledger table through a [`LedgerStore`]
#[derive(Clone)]
pub struct Ledger {
    table: String,
    scheme: Arc<dyn VersionScheme>,
}

impl Ledger {
    pub fn new(table: impl Into<String>, scheme: Arc<dyn VersionScheme>) -> Self {
        Self {
            table: table.into(),
            scheme,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// All entries with their parsed versions, creating the table on first use
    pub async fn entries<S>(&self, store: &mut S) -> MigrationResult<Vec<(Version, LedgerEntry)>>
    where
        S: LedgerStore + ?Sized,
    {
        store.ensure_ledger(&self.table).await.map_err(ledger_error)?;
        let rows = store.ledger_entries(&self.table).await.map_err(ledger_error)?;

        rows.into_iter()
            .map(|entry| {
                let version = self
                    .scheme
                    .parse_token(&entry.version)
                    .ok_or_else(|| MigrationError::MalformedLedgerEntry(entry.version.clone()))?;
                Ok((version, entry))
            })
            .collect()
    }

    pub async fn applied_versions<S>(&self, store: &mut S) -> MigrationResult<BTreeSet<Version>>
    where
        S: LedgerStore + ?Sized,
    {
        Ok(self
            .entries(store)
            .await?
            .into_iter()
            .map(|(version, _)| version)
            .collect())
    }

    /// Mark `version` as applied
    pub async fn record<S>(&self, store: &mut S, version: &Version) -> MigrationResult<LedgerEntry>
    where
        S: LedgerStore + ?Sized,
    {
        let existing = self.entries(store).await?;
        if existing.iter().any(|(applied, _)| applied == version) {
            return Err(MigrationError::DuplicateEntry(version.to_string()));
        }

        let entry = LedgerEntry {
            version: version.to_string(),
            applied_at: Utc::now(),
        };
        store
            .insert_entry(&self.table, &entry)
            .await
            .map_err(ledger_error)?;

        tracing::debug!(version = %version, table = %self.table, "Recorded ledger entry");
        Ok(entry)
    }

    /// Remove the entry for `version`
    pub async fn erase<S>(&self, store: &mut S, version: &Version) -> MigrationResult<()>
    where
        S: LedgerStore + ?Sized,
    {
        // Match on the parsed version so `001` on disk finds a row stored as `1`
        let existing = self.entries(store).await?;
        let stored = existing
            .into_iter()
            .find(|(applied, _)| applied == version)
            .map(|(_, entry)| entry.version)
            .ok_or_else(|| MigrationError::MissingEntry(version.to_string()))?;

        let removed = store
            .delete_entry(&self.table, &stored)
            .await
            .map_err(ledger_error)?;
        if removed == 0 {
            return Err(MigrationError::MissingEntry(version.to_string()));
        }

        tracing::debug!(version = %version, table = %self.table, "Erased ledger entry");
        Ok(())
    }
}

fn ledger_error(err: DriverError) -> MigrationError {
    MigrationError::Ledger(err)
}
