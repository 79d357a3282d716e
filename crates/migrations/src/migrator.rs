//! Migrator - the entry point tying discovery, ledger, planning and execution
//!
//! A [`Migrator`] owns one backend and one migrations directory. Every command
//! rediscovers the definitions and rereads the ledger before planning.
//!
//! The ledger table is created lazily by the first command that reads it,
//! `status` and `plan` included. No other schema change happens outside
//! `run` and its wrappers.
//!
//! There is no cross-process locking: two migrators running against the same
//! database at once can both plan the same pending unit. Callers must
//! serialize runs themselves.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::backends::SqlBackend;
use crate::config::MigrationConfig;
use crate::discovery::{DefinitionFormat, Discoverer};
use crate::driver::MigrationBackend;
use crate::error::{MigrationError, MigrationResult};
use crate::executor::{ExecutionReport, Executor};
use crate::ledger::{Ledger, LedgerEntry};
use crate::planner::{MigrationCommand, Planner};
use crate::schema::SchemaOperation;
use crate::unit::{ChangeUnit, Direction};
use crate::version::{ConventionScheme, Version, VersionScheme};

/// A step as it would run, for dry runs
#[derive(Debug, Clone, Serialize)]
pub struct PlannedChange {
    pub version: String,
    pub name: String,
    pub direction: Direction,
    pub operations: Vec<String>,
}

/// Whether a unit is applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Applied { applied_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub version: String,
    pub name: String,
    #[serde(flatten)]
    pub status: MigrationStatus,
}

/// Every discovered unit with its state, plus ledger entries without a definition
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub units: Vec<UnitStatus>,
    pub orphaned: Vec<LedgerEntry>,
}

impl StatusReport {
    pub fn pending_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.status == MigrationStatus::Pending)
            .count()
    }

    pub fn applied_count(&self) -> usize {
        self.units.len() - self.pending_count()
    }
}

/// Runs migration commands against one database
pub struct Migrator {
    config: MigrationConfig,
    scheme: Arc<dyn VersionScheme>,
    backend: Arc<dyn MigrationBackend>,
    cancel: Option<CancellationToken>,
}

impl Migrator {
    pub fn new(config: MigrationConfig, backend: Arc<dyn MigrationBackend>) -> Self {
        Self {
            config,
            scheme: Arc::new(ConventionScheme),
            backend,
            cancel: None,
        }
    }

    /// Connect to `config.database_url` with the bundled SQL backend
    pub async fn connect(config: MigrationConfig) -> MigrationResult<Self> {
        config.validate()?;
        let backend = SqlBackend::connect(config.require_database_url()?).await?;
        Ok(Self::new(config, Arc::new(backend)))
    }

    /// Use a different filename versioning scheme
    pub fn with_scheme(mut self, scheme: Arc<dyn VersionScheme>) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn MigrationBackend {
        self.backend.as_ref()
    }

    fn discoverer(&self) -> Discoverer {
        Discoverer::new(&self.config.migrations_dir, Arc::clone(&self.scheme))
    }

    fn ledger(&self) -> Ledger {
        Ledger::new(&self.config.migrations_table, Arc::clone(&self.scheme))
    }

    /// Definitions on disk, ascending by version
    pub fn discover(&self) -> MigrationResult<Vec<ChangeUnit>> {
        self.discoverer().discover()
    }

    /// Write a new definition template
    pub fn create(&self, name: &str, format: DefinitionFormat) -> MigrationResult<std::path::PathBuf> {
        self.discoverer().create(name, format)
    }

    /// Parse a version token with the configured scheme
    pub fn parse_version(&self, token: &str) -> MigrationResult<Version> {
        self.scheme
            .parse_token(token)
            .ok_or_else(|| MigrationError::InvalidVersion(token.to_string()))
    }

    /// Current ledger rows, read in a short transaction
    ///
    /// Creates the ledger table first if it does not exist.
    pub async fn ledger_entries(&self) -> MigrationResult<Vec<(Version, LedgerEntry)>> {
        let ledger = self.ledger();
        let mut tx = self.backend.begin().await.map_err(ledger_error)?;
        let entries = ledger.entries(&mut *tx).await;
        match entries {
            Ok(entries) => {
                tx.commit().await.map_err(ledger_error)?;
                Ok(entries)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Failed to roll back ledger read");
                }
                Err(err)
            }
        }
    }

    pub async fn applied_versions(&self) -> MigrationResult<BTreeSet<Version>> {
        Ok(self
            .ledger_entries()
            .await?
            .into_iter()
            .map(|(version, _)| version)
            .collect())
    }

    /// Plan and execute `command`
    pub async fn run(&self, command: MigrationCommand) -> MigrationResult<ExecutionReport> {
        let units = self.discover()?;
        let applied = self.applied_versions().await?;
        let plan = Planner::new(&units, &applied).plan(&command)?;

        if plan.is_empty() {
            tracing::info!(command = %command, "Nothing to migrate");
            return Ok(ExecutionReport::default());
        }

        let ledger = self.ledger();
        let mut executor = Executor::new(self.backend.as_ref(), &ledger);
        if let Some(token) = &self.cancel {
            executor = executor.with_cancellation(token.clone());
        }
        executor.execute(&plan).await
    }

    /// Apply every pending unit
    pub async fn migrate(&self) -> MigrationResult<ExecutionReport> {
        self.run(MigrationCommand::MigrateAll).await
    }

    /// Move the schema to `target`, forward or backward
    pub async fn migrate_to(&self, target: &str) -> MigrationResult<ExecutionReport> {
        let target = self.parse_version(target)?;
        self.run(MigrationCommand::MigrateTo(target)).await
    }

    /// Revert the `steps` most recently applied units
    pub async fn rollback(&self, steps: usize) -> MigrationResult<ExecutionReport> {
        self.run(MigrationCommand::Rollback(steps)).await
    }

    /// The steps `command` would run, without executing anything
    ///
    /// Only the ledger table may be created, see [`Migrator::ledger_entries`].
    pub async fn plan(&self, command: &MigrationCommand) -> MigrationResult<Vec<PlannedChange>> {
        let units = self.discover()?;
        let applied = self.applied_versions().await?;
        let plan = Planner::new(&units, &applied).plan(command)?;

        plan.iter()
            .map(|step| {
                let operations = step.unit.operations(step.direction)?;
                Ok(PlannedChange {
                    version: step.unit.version().to_string(),
                    name: step.unit.name().to_string(),
                    direction: step.direction,
                    operations: operations.iter().map(SchemaOperation::to_string).collect(),
                })
            })
            .collect()
    }

    /// Every discovered unit annotated applied or pending
    ///
    /// Bootstraps the ledger table like [`Migrator::ledger_entries`].
    pub async fn status(&self) -> MigrationResult<StatusReport> {
        let units = self.discover()?;
        let entries = self.ledger_entries().await?;

        let statuses = units
            .iter()
            .map(|unit| {
                let status = entries
                    .iter()
                    .find(|(version, _)| version == unit.version())
                    .map(|(_, entry)| MigrationStatus::Applied {
                        applied_at: entry.applied_at,
                    })
                    .unwrap_or(MigrationStatus::Pending);
                UnitStatus {
                    version: unit.version().to_string(),
                    name: unit.name().to_string(),
                    status,
                }
            })
            .collect();

        let orphaned: Vec<LedgerEntry> = entries
            .into_iter()
            .filter(|(version, _)| !units.iter().any(|u| u.version() == version))
            .map(|(_, entry)| entry)
            .collect();
        for entry in &orphaned {
            tracing::warn!(version = %entry.version, "Applied migration has no definition on disk");
        }

        Ok(StatusReport {
            units: statuses,
            orphaned,
        })
    }
}

fn ledger_error(err: crate::error::DriverError) -> MigrationError {
    MigrationError::Ledger(err)
}
