//! Migration Executor - applies a plan one unit at a time
//!
//! Every unit runs in its own transaction together with its ledger write, so
//! a unit is either fully applied and recorded or not at all. The first
//! failure rolls back the unit in flight and halts the plan; units committed
//! before it stay committed.

use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::driver::{MigrationBackend, MigrationTransaction};
use crate::error::{DriverError, MigrationError, MigrationResult};
use crate::ledger::Ledger;
use crate::planner::{Plan, PlannedStep};
use crate::schema::SchemaOperation;
use crate::unit::Direction;

/// Result of one executed step
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub version: String,
    pub name: String,
    pub direction: Direction,
    pub elapsed_ms: u64,
}

/// Result of running a plan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub steps: Vec<StepOutcome>,
    pub execution_time_ms: u64,
}

impl ExecutionReport {
    pub fn applied_count(&self) -> usize {
        self.count(Direction::Up)
    }

    pub fn reverted_count(&self) -> usize {
        self.count(Direction::Down)
    }

    fn count(&self, direction: Direction) -> usize {
        self.steps.iter().filter(|s| s.direction == direction).count()
    }
}

/// Runs planned steps against a backend
pub struct Executor<'a> {
    backend: &'a dyn MigrationBackend,
    ledger: &'a Ledger,
    cancel: Option<CancellationToken>,
}

impl<'a> Executor<'a> {
    pub fn new(backend: &'a dyn MigrationBackend, ledger: &'a Ledger) -> Self {
        Self {
            backend,
            ledger,
            cancel: None,
        }
    }

    /// Abort the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Execute every step in plan order, halting on the first failure
    pub async fn execute(&self, plan: &Plan<'_>) -> MigrationResult<ExecutionReport> {
        let start_time = Instant::now();
        let mut report = ExecutionReport::default();

        if plan.is_empty() {
            return Ok(report);
        }

        if !self.backend.supports_transactional_ddl() {
            tracing::warn!(
                backend = self.backend.name(),
                "Backend does not support transactional DDL; a failing migration may leave partial changes"
            );
        }

        for step in plan.iter() {
            let outcome = self.execute_step(step).await?;
            report.steps.push(outcome);
        }

        report.execution_time_ms = start_time.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Run one unit in one transaction
    pub async fn execute_step(&self, step: &PlannedStep<'_>) -> MigrationResult<StepOutcome> {
        let unit = step.unit;
        let operations = unit.operations(step.direction)?;

        if self.cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
            return Err(aborted(step, "cancelled before start".to_string()));
        }

        let start_time = Instant::now();
        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(|e| driver_error(step, e))?;

        let result = match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(aborted(step, DriverError::Cancelled.to_string())),
                    result = self.apply(&mut *tx, step, &operations) => result,
                }
            }
            None => self.apply(&mut *tx, step, &operations).await,
        };

        if let Err(err) = result {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(
                    version = %unit.version(),
                    error = %rollback_err,
                    "Failed to roll back migration transaction"
                );
            }
            tracing::error!(
                version = %unit.version(),
                name = unit.name(),
                direction = %step.direction,
                error = %err,
                "Migration failed"
            );
            return Err(err);
        }

        tx.commit().await.map_err(|e| driver_error(step, e))?;

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        let message = match step.direction {
            Direction::Up => "Applied migration",
            Direction::Down => "Reverted migration",
        };
        tracing::info!(
            version = %unit.version(),
            name = unit.name(),
            direction = %step.direction,
            elapsed_ms,
            "{}",
            message
        );

        Ok(StepOutcome {
            version: unit.version().to_string(),
            name: unit.name().to_string(),
            direction: step.direction,
            elapsed_ms,
        })
    }

    async fn apply(
        &self,
        tx: &mut dyn MigrationTransaction,
        step: &PlannedStep<'_>,
        operations: &[SchemaOperation],
    ) -> MigrationResult<()> {
        for operation in operations {
            tracing::debug!(version = %step.unit.version(), operation = %operation, "Running operation");
            operation
                .apply_to(&mut *tx)
                .await
                .map_err(|e| driver_error(step, e))?;
        }

        let recorded = match step.direction {
            Direction::Up => self
                .ledger
                .record(&mut *tx, step.unit.version())
                .await
                .map(|_| ()),
            Direction::Down => self.ledger.erase(&mut *tx, step.unit.version()).await,
        };

        // Store failures inside a unit carry the unit's identity like schema failures do
        recorded.map_err(|err| match err {
            MigrationError::Ledger(source) => driver_error(step, source),
            other => other,
        })
    }
}

fn driver_error(step: &PlannedStep<'_>, err: DriverError) -> MigrationError {
    if err.is_abort() {
        return aborted(step, err.to_string());
    }
    MigrationError::DriverFailure {
        version: step.unit.version().to_string(),
        name: step.unit.name().to_string(),
        direction: step.direction,
        message: err.to_string(),
    }
}

fn aborted(step: &PlannedStep<'_>, reason: String) -> MigrationError {
    MigrationError::ExecutionAborted {
        version: step.unit.version().to_string(),
        name: step.unit.name().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;
    use crate::planner::{MigrationCommand, Planner};
    use crate::schema::{ColumnDef, SchemaOperation};
    use crate::unit::ChangeUnit;
    use crate::version::{SequenceScheme, Version, VersionScheme};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn v(token: &str) -> Version {
        SequenceScheme.parse_token(token).unwrap()
    }

    fn ledger() -> Ledger {
        Ledger::new("elif_migrations", Arc::new(SequenceScheme))
    }

    fn units() -> Vec<ChangeUnit> {
        vec![
            ChangeUnit::change(
                v("1"),
                "create cats",
                vec![SchemaOperation::create_table(
                    "cats",
                    vec![ColumnDef::id("id"), ColumnDef::string("name", None)],
                )],
            ),
            ChangeUnit::change(
                v("2"),
                "add gender",
                vec![SchemaOperation::add_column("cats", ColumnDef::string("gender", None))],
            ),
        ]
    }

    async fn applied(backend: &MemoryBackend, ledger: &Ledger) -> BTreeSet<Version> {
        let mut tx = backend.begin().await.unwrap();
        let applied = ledger.applied_versions(&mut *tx).await.unwrap();
        tx.commit().await.unwrap();
        applied
    }

    #[tokio::test]
    async fn test_applies_and_records_each_unit() {
        let backend = MemoryBackend::new();
        let ledger = ledger();
        let units = units();
        let applied_before = applied(&backend, &ledger).await;

        let plan = Planner::new(&units, &applied_before)
            .plan(&MigrationCommand::MigrateAll)
            .unwrap();
        let report = Executor::new(&backend, &ledger).execute(&plan).await.unwrap();

        assert_eq!(report.applied_count(), 2);
        assert_eq!(report.steps[0].version, "1");
        assert_eq!(
            backend.columns("cats"),
            Some(vec!["id".to_string(), "name".to_string(), "gender".to_string()])
        );
        assert_eq!(backend.ledger_versions("elif_migrations"), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_unit_and_halts() {
        let backend = MemoryBackend::new();
        let ledger = ledger();
        let mut units = units();
        units.push(ChangeUnit::up_down(
            v("3"),
            "broken",
            vec![
                SchemaOperation::add_column("cats", ColumnDef::integer("age")),
                SchemaOperation::add_column("cats", ColumnDef::integer("age")),
            ],
            vec![],
        ));
        units.push(ChangeUnit::change(
            v("4"),
            "never runs",
            vec![SchemaOperation::create_table("dogs", vec![ColumnDef::id("id")])],
        ));

        let applied_before = applied(&backend, &ledger).await;
        let plan = Planner::new(&units, &applied_before)
            .plan(&MigrationCommand::MigrateAll)
            .unwrap();

        match Executor::new(&backend, &ledger).execute(&plan).await {
            Err(MigrationError::DriverFailure {
                version,
                name,
                direction,
                ..
            }) => {
                assert_eq!(version, "3");
                assert_eq!(name, "broken");
                assert_eq!(direction, Direction::Up);
            }
            other => panic!("Expected driver failure, got {:?}", other),
        }

        assert_eq!(backend.ledger_versions("elif_migrations"), vec!["1", "2"]);
        assert!(!backend.columns("cats").unwrap().contains(&"age".to_string()));
        assert!(!backend.has_table("dogs"));
    }

    #[tokio::test]
    async fn test_rollback_erases_entry() {
        let backend = MemoryBackend::new();
        let ledger = ledger();
        let units = units();

        let applied_before = applied(&backend, &ledger).await;
        let plan = Planner::new(&units, &applied_before)
            .plan(&MigrationCommand::MigrateAll)
            .unwrap();
        Executor::new(&backend, &ledger).execute(&plan).await.unwrap();

        let applied_now = applied(&backend, &ledger).await;
        let plan = Planner::new(&units, &applied_now)
            .plan(&MigrationCommand::Rollback(1))
            .unwrap();
        let report = Executor::new(&backend, &ledger).execute(&plan).await.unwrap();

        assert_eq!(report.reverted_count(), 1);
        assert_eq!(backend.ledger_versions("elif_migrations"), vec!["1"]);
        assert_eq!(
            backend.columns("cats"),
            Some(vec!["id".to_string(), "name".to_string()])
        );
    }

    #[tokio::test]
    async fn test_ledger_write_failure_names_the_unit() {
        let backend = MemoryBackend::new();
        let ledger = ledger();
        let units = units();
        let applied_before = applied(&backend, &ledger).await;
        backend.fail_ledger_writes_with(DriverError::rejected("disk full"));

        let plan = Planner::new(&units, &applied_before)
            .plan(&MigrationCommand::MigrateAll)
            .unwrap();

        match Executor::new(&backend, &ledger).execute(&plan).await {
            Err(MigrationError::DriverFailure {
                version,
                name,
                direction,
                message,
            }) => {
                assert_eq!(version, "1");
                assert_eq!(name, "create cats");
                assert_eq!(direction, Direction::Up);
                assert!(message.contains("disk full"));
            }
            other => panic!("Expected driver failure, got {:?}", other),
        }

        assert!(!backend.has_table("cats"));
        assert!(backend.ledger_versions("elif_migrations").is_empty());
    }

    #[tokio::test]
    async fn test_ledger_write_timeout_aborts() {
        let backend = MemoryBackend::new();
        let ledger = ledger();
        let units = units();

        let applied_before = applied(&backend, &ledger).await;
        let plan = Planner::new(&units, &applied_before)
            .plan(&MigrationCommand::MigrateAll)
            .unwrap();
        Executor::new(&backend, &ledger).execute(&plan).await.unwrap();

        backend.fail_ledger_writes_with(DriverError::TimedOut("statement timeout".to_string()));
        let applied_now = applied(&backend, &ledger).await;
        let plan = Planner::new(&units, &applied_now)
            .plan(&MigrationCommand::Rollback(1))
            .unwrap();
        let result = Executor::new(&backend, &ledger).execute(&plan).await;

        assert!(matches!(result, Err(MigrationError::ExecutionAborted { ref version, .. }) if version == "2"));
        assert_eq!(backend.ledger_versions("elif_migrations"), vec!["1", "2"]);
        assert!(backend.columns("cats").unwrap().contains(&"gender".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_unit() {
        let backend = MemoryBackend::new();
        let ledger = ledger();
        let units = units();
        let token = CancellationToken::new();
        token.cancel();

        let applied_before = applied(&backend, &ledger).await;
        let plan = Planner::new(&units, &applied_before)
            .plan(&MigrationCommand::MigrateAll)
            .unwrap();
        let result = Executor::new(&backend, &ledger)
            .with_cancellation(token)
            .execute(&plan)
            .await;

        assert!(matches!(result, Err(MigrationError::ExecutionAborted { ref version, .. }) if version == "1"));
        assert!(backend.tables().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_in_flight_unit() {
        let backend = MemoryBackend::new().with_latency(Duration::from_millis(200));
        let ledger = ledger();
        let units = units();
        let token = CancellationToken::new();

        let applied_before = applied(&backend, &ledger).await;
        let plan = Planner::new(&units, &applied_before)
            .plan(&MigrationCommand::MigrateAll)
            .unwrap();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = Executor::new(&backend, &ledger)
            .with_cancellation(token)
            .execute(&plan)
            .await;

        assert!(matches!(result, Err(MigrationError::ExecutionAborted { .. })));
        assert!(!backend.has_table("cats"));
        assert!(backend.ledger_versions("elif_migrations").is_empty());
    }
}
