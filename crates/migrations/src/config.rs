//! Migration configuration
//!
//! Defaults mirror the conventions used across elif projects: definitions in
//! `./migrations`, applied versions tracked in `elif_migrations`.

use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for tracking migrations
    pub migrations_table: String,
    /// Connection string of the target database
    pub database_url: Option<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: "elif_migrations".to_string(),
            database_url: None,
        }
    }
}

impl MigrationConfig {
    /// Load configuration from `DATABASE_URL`, `MIGRATIONS_DIR` and `MIGRATIONS_TABLE`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(dir) = env::var("MIGRATIONS_DIR") {
            config.migrations_dir = PathBuf::from(dir);
        }
        if let Ok(table) = env::var("MIGRATIONS_TABLE") {
            config.migrations_table = table;
        }
        config.database_url = env::var("DATABASE_URL").ok();

        config.validate()?;
        Ok(config)
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // The table name is interpolated into ledger SQL, so only plain identifiers pass
        let table = &self.migrations_table;
        let valid_table = !table.is_empty()
            && table.len() <= 63
            && !table.starts_with(|c: char| c.is_ascii_digit())
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_table {
            return Err(ConfigError::invalid_value(
                "migrations_table",
                table,
                "an identifier of letters, digits and underscores",
            ));
        }

        if let Some(url) = &self.database_url {
            if !is_supported_url(url) {
                return Err(ConfigError::invalid_value(
                    "database_url",
                    url,
                    "a postgres://, postgresql:// or sqlite: URL",
                ));
            }
        }

        Ok(())
    }

    /// The database URL, or an error pointing at `DATABASE_URL`
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or_else(|| {
            ConfigError::missing_required(
                "database_url",
                "Set DATABASE_URL or pass --database-url",
            )
        })
    }
}

fn is_supported_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://") || url.starts_with("sqlite:")
}
