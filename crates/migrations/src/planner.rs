//! Migration Planner - decides which units run, in which direction and order
//!
//! Planning is pure: it sees the discovered units and the applied versions
//! read from the ledger, and never touches the database.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{MigrationError, MigrationResult};
use crate::unit::{ChangeUnit, Direction};
use crate::version::Version;

/// What the caller asked the engine to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationCommand {
    /// Apply every pending unit
    MigrateAll,
    /// Revert the given number of most recently applied units
    Rollback(usize),
    /// Move the schema up or down to the given version
    MigrateTo(Version),
}

impl fmt::Display for MigrationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationCommand::MigrateAll => f.write_str("migrate"),
            MigrationCommand::Rollback(steps) => write!(f, "rollback {}", steps),
            MigrationCommand::MigrateTo(target) => write!(f, "migrate to {}", target),
        }
    }
}

/// One unit to run in one direction
#[derive(Debug, Clone, Copy)]
pub struct PlannedStep<'a> {
    pub unit: &'a ChangeUnit,
    pub direction: Direction,
}

/// Ordered steps for a command
#[derive(Debug, Clone, Default)]
pub struct Plan<'a> {
    steps: Vec<PlannedStep<'a>>,
}

impl<'a> Plan<'a> {
    pub fn steps(&self) -> &[PlannedStep<'a>] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedStep<'a>> {
        self.steps.iter()
    }
}

/// Computes plans from discovered units and the applied set
pub struct Planner<'a> {
    units: BTreeMap<&'a Version, &'a ChangeUnit>,
    applied: &'a BTreeSet<Version>,
}

impl<'a> Planner<'a> {
    pub fn new(units: &'a [ChangeUnit], applied: &'a BTreeSet<Version>) -> Self {
        Self {
            units: units.iter().map(|unit| (unit.version(), unit)).collect(),
            applied,
        }
    }

    pub fn plan(&self, command: &MigrationCommand) -> MigrationResult<Plan<'a>> {
        let steps = match command {
            MigrationCommand::MigrateAll => self.forward(|_| true),
            MigrationCommand::Rollback(count) => {
                let versions: Vec<&Version> = self.applied.iter().rev().take(*count).collect();
                self.backward(versions)?
            }
            MigrationCommand::MigrateTo(target) => match self.applied.iter().next_back() {
                Some(latest) if target < latest => {
                    let versions: Vec<&Version> =
                        self.applied.iter().rev().take_while(|v| *v > target).collect();
                    self.backward(versions)?
                }
                _ => self.forward(|version| version <= target),
            },
        };

        tracing::debug!(command = %command, steps = steps.len(), "Planned migrations");
        Ok(Plan { steps })
    }

    /// Pending units accepted by `filter`, ascending
    fn forward(&self, filter: impl Fn(&Version) -> bool) -> Vec<PlannedStep<'a>> {
        self.units
            .iter()
            .filter(|(version, _)| !self.applied.contains(**version) && filter(**version))
            .map(|(_, unit)| PlannedStep {
                unit: *unit,
                direction: Direction::Up,
            })
            .collect()
    }

    /// Applied `versions`, already in descending order, as down steps
    fn backward(&self, versions: Vec<&Version>) -> MigrationResult<Vec<PlannedStep<'a>>> {
        versions
            .into_iter()
            .map(|version| {
                let unit = self
                    .units
                    .get(version)
                    .ok_or_else(|| MigrationError::MissingDefinition(version.to_string()))?;
                Ok(PlannedStep {
                    unit: *unit,
                    direction: Direction::Down,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{SequenceScheme, VersionScheme};

    fn v(token: &str) -> Version {
        SequenceScheme.parse_token(token).unwrap()
    }

    fn units(tokens: &[&str]) -> Vec<ChangeUnit> {
        tokens
            .iter()
            .map(|t| ChangeUnit::change(v(t), format!("unit {}", t), Vec::new()))
            .collect()
    }

    fn applied(tokens: &[&str]) -> BTreeSet<Version> {
        tokens.iter().map(|t| v(t)).collect()
    }

    fn summary(plan: &Plan<'_>) -> Vec<(String, Direction)> {
        plan.iter()
            .map(|step| (step.unit.version().to_string(), step.direction))
            .collect()
    }

    #[test]
    fn test_migrate_all_is_ascending_and_skips_applied() {
        // Given out of order on purpose
        let units = units(&["10", "2", "1", "3"]);
        let applied = applied(&["2"]);
        let plan = Planner::new(&units, &applied)
            .plan(&MigrationCommand::MigrateAll)
            .unwrap();

        assert_eq!(
            summary(&plan),
            vec![
                ("1".to_string(), Direction::Up),
                ("3".to_string(), Direction::Up),
                ("10".to_string(), Direction::Up),
            ]
        );
    }

    #[test]
    fn test_nothing_pending() {
        let units = units(&["1", "2"]);
        let applied = applied(&["1", "2"]);
        let plan = Planner::new(&units, &applied)
            .plan(&MigrationCommand::MigrateAll)
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_rollback_is_bounded() {
        let units = units(&["1", "2", "3"]);
        let applied = applied(&["1", "2", "3"]);
        let planner = Planner::new(&units, &applied);

        let plan = planner.plan(&MigrationCommand::Rollback(2)).unwrap();
        assert_eq!(
            summary(&plan),
            vec![("3".to_string(), Direction::Down), ("2".to_string(), Direction::Down)]
        );

        assert!(planner.plan(&MigrationCommand::Rollback(0)).unwrap().is_empty());
        assert_eq!(planner.plan(&MigrationCommand::Rollback(10)).unwrap().len(), 3);
    }

    #[test]
    fn test_rollback_requires_definition() {
        let units = units(&["1"]);
        let applied = applied(&["1", "2"]);

        match Planner::new(&units, &applied).plan(&MigrationCommand::Rollback(1)) {
            Err(MigrationError::MissingDefinition(version)) => assert_eq!(version, "2"),
            other => panic!("Expected missing definition, got {:?}", other),
        }
    }

    #[test]
    fn test_migrate_to_forward() {
        let units = units(&["1", "2", "3", "4"]);
        let applied = applied(&["1"]);
        let plan = Planner::new(&units, &applied)
            .plan(&MigrationCommand::MigrateTo(v("3")))
            .unwrap();

        assert_eq!(
            summary(&plan),
            vec![("2".to_string(), Direction::Up), ("3".to_string(), Direction::Up)]
        );
    }

    #[test]
    fn test_migrate_to_backward() {
        let units = units(&["1", "2", "3", "4"]);
        let applied = applied(&["1", "2", "3", "4"]);
        let plan = Planner::new(&units, &applied)
            .plan(&MigrationCommand::MigrateTo(v("2")))
            .unwrap();

        assert_eq!(
            summary(&plan),
            vec![("4".to_string(), Direction::Down), ("3".to_string(), Direction::Down)]
        );
    }

    #[test]
    fn test_migrate_to_current_version_is_empty() {
        let units = units(&["1", "2"]);
        let applied = applied(&["1", "2"]);
        let plan = Planner::new(&units, &applied)
            .plan(&MigrationCommand::MigrateTo(v("002")))
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_migrate_to_fills_gaps_below_target() {
        // 2 was added after 3 had already been applied
        let units = units(&["1", "2", "3"]);
        let applied = applied(&["1", "3"]);
        let plan = Planner::new(&units, &applied)
            .plan(&MigrationCommand::MigrateTo(v("3")))
            .unwrap();
        assert_eq!(summary(&plan), vec![("2".to_string(), Direction::Up)]);
    }
}
