//! Schema Operations - abstract schema changes and their structural inverses
//!
//! Operations are engine-neutral; a [`SchemaDriver`](crate::driver::SchemaDriver)
//! turns each one into native commands. They deserialize from the YAML
//! definition format, one externally tagged map per operation:
//!
//! ```yaml
//! - create_table:
//!     table: cats
//!     columns:
//!       - { name: id, type: id }
//!       - { name: name, type: string, length: 255 }
//! - rename_column: { table: cats, from: name, to: full_name }
//! ```
//!
//! Plain `serde_yaml` expects YAML tags for enum variants, so definitions go
//! through [`from_yaml`], which reads the single-key map form.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::driver::SchemaDriver;
use crate::error::DriverResult;

/// Deserialize YAML that spells enum variants as single-key maps
pub fn from_yaml<T: DeserializeOwned>(content: &str) -> Result<T, serde_yaml::Error> {
    serde_yaml::with::singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(content))
}

/// Portable column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Auto-increment primary key
    Id,
    Integer,
    BigInteger,
    /// Variable length string, bounded by the column's `length` when set
    String,
    Text,
    Boolean,
    Float,
    Timestamp,
    Uuid,
    Json,
}

/// A column as declared in a migration definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Default value expression, passed through to the database verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            length: None,
            nullable: true,
            default: None,
        }
    }

    /// Auto-increment primary key column
    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Id).not_null()
    }

    pub fn string(name: impl Into<String>, length: Option<u32>) -> Self {
        Self {
            length,
            ..Self::new(name, ColumnType::String)
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// One abstract schema change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaOperation {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    /// `columns` holds the dropped table's definition; without it the drop cannot be undone
    DropTable {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        columns: Option<Vec<ColumnDef>>,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    /// `definition` holds the removed column; without it the removal cannot be undone
    RemoveColumn {
        table: String,
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        definition: Option<ColumnDef>,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    RenameTable {
        from: String,
        to: String,
    },
    /// Native SQL passed straight to the driver; never reversible
    Raw {
        sql: String,
    },
}

impl SchemaOperation {
    pub fn create_table(table: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        SchemaOperation::CreateTable {
            table: table.into(),
            columns,
        }
    }

    pub fn add_column(table: impl Into<String>, column: ColumnDef) -> Self {
        SchemaOperation::AddColumn {
            table: table.into(),
            column,
        }
    }

    pub fn rename_column(
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        SchemaOperation::RenameColumn {
            table: table.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn rename_table(from: impl Into<String>, to: impl Into<String>) -> Self {
        SchemaOperation::RenameTable {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        SchemaOperation::Raw { sql: sql.into() }
    }

    /// The operation that undoes this one, if the definition carries enough to build it
    pub fn inverse(&self) -> Option<SchemaOperation> {
        match self {
            SchemaOperation::CreateTable { table, columns } => Some(SchemaOperation::DropTable {
                table: table.clone(),
                columns: Some(columns.clone()),
            }),
            SchemaOperation::DropTable { table, columns } => {
                columns.as_ref().map(|columns| SchemaOperation::CreateTable {
                    table: table.clone(),
                    columns: columns.clone(),
                })
            }
            SchemaOperation::AddColumn { table, column } => Some(SchemaOperation::RemoveColumn {
                table: table.clone(),
                column: column.name.clone(),
                definition: Some(column.clone()),
            }),
            SchemaOperation::RemoveColumn {
                table, definition, ..
            } => definition.as_ref().map(|column| SchemaOperation::AddColumn {
                table: table.clone(),
                column: column.clone(),
            }),
            SchemaOperation::RenameColumn { table, from, to } => {
                Some(SchemaOperation::rename_column(table.clone(), to.clone(), from.clone()))
            }
            SchemaOperation::RenameTable { from, to } => {
                Some(SchemaOperation::rename_table(to.clone(), from.clone()))
            }
            SchemaOperation::Raw { .. } => None,
        }
    }

    pub fn is_reversible(&self) -> bool {
        self.inverse().is_some()
    }

    /// Send this operation to a schema driver
    pub async fn apply_to<D>(&self, driver: &mut D) -> DriverResult<()>
    where
        D: SchemaDriver + ?Sized,
    {
        match self {
            SchemaOperation::CreateTable { table, columns } => {
                driver.create_table(table, columns).await
            }
            SchemaOperation::DropTable { table, .. } => driver.drop_table(table).await,
            SchemaOperation::AddColumn { table, column } => driver.add_column(table, column).await,
            SchemaOperation::RemoveColumn { table, column, .. } => {
                driver.remove_column(table, column).await
            }
            SchemaOperation::RenameColumn { table, from, to } => {
                driver.rename_column(table, from, to).await
            }
            SchemaOperation::RenameTable { from, to } => driver.rename_table(from, to).await,
            SchemaOperation::Raw { sql } => driver.execute_raw(sql).await,
        }
    }
}

impl fmt::Display for SchemaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaOperation::CreateTable { table, columns } => {
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                write!(f, "create_table {} ({})", table, names.join(", "))
            }
            SchemaOperation::DropTable { table, .. } => write!(f, "drop_table {}", table),
            SchemaOperation::AddColumn { table, column } => {
                write!(f, "add_column {}.{}", table, column.name)
            }
            SchemaOperation::RemoveColumn { table, column, .. } => {
                write!(f, "remove_column {}.{}", table, column)
            }
            SchemaOperation::RenameColumn { table, from, to } => {
                write!(f, "rename_column {}.{} -> {}", table, from, to)
            }
            SchemaOperation::RenameTable { from, to } => write!(f, "rename_table {} -> {}", from, to),
            SchemaOperation::Raw { sql } => {
                let first_line = sql.lines().next().unwrap_or_default();
                write!(f, "raw {}", first_line)
            }
        }
    }
}
