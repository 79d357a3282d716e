//! Migration Discovery - loading definition files from the migrations directory
//!
//! Handles scanning, parsing and creating migration definition files. Two
//! formats are understood:
//!
//! - YAML (`.yaml`/`.yml`) with either a reversible `change` list or explicit
//!   `up` and `down` lists of schema operations
//! - SQL (`.sql`) with `-- Up migration` and `-- Down migration` sections
//!
//! Discovery never touches the database.

use chrono::Utc;
use serde::Deserialize;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{MigrationError, MigrationResult};
use crate::schema::{self, SchemaOperation};
use crate::unit::{ChangeUnit, UnitBody};
use crate::version::{Version, VersionScheme};

/// File format for new migration definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Sql,
}

impl DefinitionFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DefinitionFormat::Yaml => "yaml",
            DefinitionFormat::Sql => "sql",
        }
    }

    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(DefinitionFormat::Yaml),
            "sql" => Some(DefinitionFormat::Sql),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlDefinition {
    #[serde(default)]
    change: Option<Vec<SchemaOperation>>,
    #[serde(default)]
    up: Option<Vec<SchemaOperation>>,
    #[serde(default)]
    down: Option<Vec<SchemaOperation>>,
}

/// Scans a directory for migration definitions
pub struct Discoverer {
    directory: PathBuf,
    scheme: Arc<dyn VersionScheme>,
}

impl Discoverer {
    pub fn new(directory: impl Into<PathBuf>, scheme: Arc<dyn VersionScheme>) -> Self {
        Self {
            directory: directory.into(),
            scheme,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Load every definition, sorted ascending by version
    pub fn discover(&self) -> MigrationResult<Vec<ChangeUnit>> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }

        let mut units = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if !path.is_file() || DefinitionFormat::from_path(&path).is_none() {
                continue;
            }
            units.push(self.load_unit(&path)?);
        }

        units.sort_by(|a, b| a.version().cmp(b.version()));

        for pair in units.windows(2) {
            if pair[0].version() == pair[1].version() {
                return Err(MigrationError::DuplicateVersion {
                    version: pair[1].version().to_string(),
                    first: pair[0].source().to_path_buf(),
                    second: pair[1].source().to_path_buf(),
                });
            }
        }

        tracing::debug!(
            directory = %self.directory.display(),
            count = units.len(),
            "Discovered migrations"
        );
        Ok(units)
    }

    /// Parse a single definition file into a unit
    pub fn load_unit(&self, path: &Path) -> MigrationResult<ChangeUnit> {
        let format = DefinitionFormat::from_path(path).ok_or_else(|| {
            MigrationError::InvalidDefinition {
                file: path.to_path_buf(),
                message: "expected a .yaml, .yml or .sql file".to_string(),
            }
        })?;

        let malformed = || MigrationError::MalformedUnitName {
            file: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(malformed)?;
        let (version, name) = self.scheme.split_stem(stem).ok_or_else(malformed)?;

        let content = fs::read_to_string(path)?;
        let body = match format {
            DefinitionFormat::Yaml => parse_yaml_definition(path, &content)?,
            DefinitionFormat::Sql => parse_sql_definition(&content),
        };

        let unit = ChangeUnit::new(version, name.replace('_', " "), body).with_source(path);
        unit.ensure_reversible()?;
        Ok(unit)
    }

    /// Versions of the definition files already in the directory
    fn existing_versions(&self) -> MigrationResult<BTreeSet<Version>> {
        let mut versions = BTreeSet::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if DefinitionFormat::from_path(&path).is_none() {
                continue;
            }
            if let Some((version, _)) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|stem| self.scheme.split_stem(stem))
            {
                versions.insert(version);
            }
        }
        Ok(versions)
    }

    /// Create a new, empty migration definition and return its path
    pub fn create(&self, name: &str, format: DefinitionFormat) -> MigrationResult<PathBuf> {
        fs::create_dir_all(&self.directory)?;

        let slug = name.trim().replace([' ', '-'], "_").to_lowercase();
        let taken = self.existing_versions()?;

        // Two creates within one second would share a version; move to the next free second
        let mut stamp = Utc::now();
        let path = loop {
            let stem = format!("{}_{}", stamp.format("%Y%m%d_%H%M%S"), slug);
            let path = self.directory.join(format!("{}.{}", stem, format.extension()));
            let collides = self
                .scheme
                .split_stem(&stem)
                .is_some_and(|(version, _)| taken.contains(&version));
            if !collides && !path.exists() {
                break path;
            }
            stamp += chrono::Duration::seconds(1);
        };

        let template = match format {
            DefinitionFormat::Yaml => yaml_template(name),
            DefinitionFormat::Sql => sql_template(name),
        };
        fs::write(&path, template)?;

        tracing::info!(path = %path.display(), "Created migration");
        Ok(path)
    }
}

fn parse_yaml_definition(path: &Path, content: &str) -> MigrationResult<UnitBody> {
    let invalid = |message: String| MigrationError::InvalidDefinition {
        file: path.to_path_buf(),
        message,
    };

    let definition: YamlDefinition =
        schema::from_yaml(content).map_err(|e| invalid(e.to_string()))?;

    match definition {
        YamlDefinition {
            change: Some(operations),
            up: None,
            down: None,
        } => Ok(UnitBody::Change(operations)),
        YamlDefinition {
            change: None,
            up: Some(up),
            down: Some(down),
        } => Ok(UnitBody::UpDown { up, down }),
        YamlDefinition { change: Some(_), .. } => {
            Err(invalid("use either `change` or `up`/`down`, not both".to_string()))
        }
        YamlDefinition { up: Some(_), .. } => {
            Err(invalid("`up` needs a matching `down` list (it may be empty)".to_string()))
        }
        _ => Err(invalid("expected a `change` list or `up` and `down` lists".to_string())),
    }
}

/// Parse SQL content into raw `up` and `down` statements
fn parse_sql_definition(content: &str) -> UnitBody {
    let mut up_sql = Vec::new();
    let mut down_sql = Vec::new();
    let mut current_section = "";

    for line in content.lines() {
        let trimmed = line.trim().to_lowercase();

        if let Some(section) = section_marker(&trimmed) {
            current_section = section;
            continue;
        }

        // Skip comment lines and empty lines
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        match current_section {
            "up" => up_sql.push(line),
            "down" => down_sql.push(line),
            _ => {} // Before any section marker
        }
    }

    let to_operations = |lines: Vec<&str>| -> Vec<SchemaOperation> {
        split_sql_statements(lines.join("\n").trim())
            .into_iter()
            .map(SchemaOperation::raw)
            .collect()
    };

    UnitBody::UpDown {
        up: to_operations(up_sql),
        down: to_operations(down_sql),
    }
}

/// `up` or `down` when the whole comment line is a section marker
fn section_marker(line: &str) -> Option<&'static str> {
    let words: Vec<&str> = line.strip_prefix("--")?.split_whitespace().collect();
    match words.as_slice() {
        ["up"] | ["up", "migration"] => Some("up"),
        ["down"] | ["down", "migration"] => Some("down"),
        _ => None,
    }
}

/// Split SQL into individual statements using a real SQL parser
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    if sql.trim().is_empty() {
        return Vec::new();
    }

    let dialect = GenericDialect {};
    match Parser::parse_sql(&dialect, sql) {
        Ok(statements) => statements.iter().map(|stmt| stmt.to_string()).collect(),
        Err(e) => {
            // Dialect-specific syntax the generic parser does not know; fall back to `;`
            tracing::warn!("SQL parsing failed, using naive semicolon splitting: {}", e);
            sql.split(';')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect()
        }
    }
}

fn yaml_template(name: &str) -> String {
    format!(
        "# Migration: {}\n\
         # Created: {}\n\
         #\n\
         # List reversible operations under `change`; the rollback is derived.\n\
         # For anything else declare explicit `up` and `down` lists instead.\n\
         #\n\
         # change:\n\
         #   - create_table:\n\
         #       table: cats\n\
         #       columns:\n\
         #         - {{ name: id, type: id }}\n\
         #         - {{ name: name, type: string, length: 255 }}\n\
         #   - add_column:\n\
         #       table: cats\n\
         #       column: {{ name: gender, type: string }}\n\
         change: []\n",
        name,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

fn sql_template(name: &str) -> String {
    format!(
        "-- Migration: {}\n\
         -- Created: {}\n\n\
         -- Up migration\n\
         -- Add your schema changes here\n\n\n\
         -- Down migration\n\
         -- Add rollback statements here\n\n",
        name,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}
