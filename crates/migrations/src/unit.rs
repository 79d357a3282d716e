//! Change Units - versioned, immutable schema transformations
//!
//! A unit is built once by the discoverer and only read afterwards. Its body
//! is either a reversible `change` list, whose inverse is derived, or an
//! explicit `up`/`down` pair.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{MigrationError, MigrationResult};
use crate::schema::SchemaOperation;
use crate::version::Version;

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the migration (run forward operations)
    Up,
    /// Rollback the migration (run backward operations)
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// The operations a unit carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitBody {
    /// Reversible operations; the down direction is derived
    Change(Vec<SchemaOperation>),
    /// Explicit forward and backward operations
    UpDown {
        up: Vec<SchemaOperation>,
        down: Vec<SchemaOperation>,
    },
}

/// One versioned schema transformation
#[derive(Debug, Clone)]
pub struct ChangeUnit {
    version: Version,
    name: String,
    source: PathBuf,
    body: UnitBody,
}

impl ChangeUnit {
    pub fn new(version: Version, name: impl Into<String>, body: UnitBody) -> Self {
        Self {
            version,
            name: name.into(),
            source: PathBuf::new(),
            body,
        }
    }

    /// A `change`-style unit
    pub fn change(version: Version, name: impl Into<String>, operations: Vec<SchemaOperation>) -> Self {
        Self::new(version, name, UnitBody::Change(operations))
    }

    /// An explicit `up`/`down` unit
    pub fn up_down(
        version: Version,
        name: impl Into<String>,
        up: Vec<SchemaOperation>,
        down: Vec<SchemaOperation>,
    ) -> Self {
        Self::new(version, name, UnitBody::UpDown { up, down })
    }

    /// Record the definition file this unit was read from
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = source.into();
        self
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn body(&self) -> &UnitBody {
        &self.body
    }

    pub fn forward_operations(&self) -> &[SchemaOperation] {
        match &self.body {
            UnitBody::Change(operations) => operations,
            UnitBody::UpDown { up, .. } => up,
        }
    }

    /// Operations that undo the unit, derived in reverse order for `change` bodies
    pub fn backward_operations(&self) -> MigrationResult<Vec<SchemaOperation>> {
        match &self.body {
            UnitBody::UpDown { down, .. } => Ok(down.clone()),
            UnitBody::Change(operations) => operations
                .iter()
                .rev()
                .map(|op| op.inverse().ok_or_else(|| self.irreversible(op)))
                .collect(),
        }
    }

    pub fn operations(&self, direction: Direction) -> MigrationResult<Vec<SchemaOperation>> {
        match direction {
            Direction::Up => Ok(self.forward_operations().to_vec()),
            Direction::Down => self.backward_operations(),
        }
    }

    /// Reject `change` bodies holding an operation without a structural inverse
    pub fn ensure_reversible(&self) -> MigrationResult<()> {
        if let UnitBody::Change(operations) = &self.body {
            if let Some(op) = operations.iter().find(|op| !op.is_reversible()) {
                return Err(self.irreversible(op));
            }
        }
        Ok(())
    }

    fn irreversible(&self, op: &SchemaOperation) -> MigrationError {
        MigrationError::IrreversibleChange {
            version: self.version.to_string(),
            name: self.name.clone(),
            operation: op.to_string(),
        }
    }
}

impl fmt::Display for ChangeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.version, self.name)
    }
}
