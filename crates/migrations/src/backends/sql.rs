//! SQL Backend - PostgreSQL and SQLite through sqlx
//!
//! Schema operations are rendered to DDL by [`SqlDialect`] and executed on a
//! `sqlx` transaction, one transaction per unit. Both supported engines run
//! DDL transactionally, so a failing unit leaves no partial columns behind.

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyPool, Row, Transaction};

use crate::driver::{LedgerStore, MigrationBackend, MigrationTransaction, SchemaDriver};
use crate::error::{DriverError, DriverResult, MigrationError, MigrationResult};
use crate::ledger::LedgerEntry;
use crate::schema::{ColumnDef, ColumnType};

/// SQL flavor spoken by the target database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    Sqlite,
}

impl SqlDialect {
    /// Pick the dialect from a connection URL scheme
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(SqlDialect::Postgres)
        } else if url.starts_with("sqlite:") {
            Some(SqlDialect::Sqlite)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "postgres",
            SqlDialect::Sqlite => "sqlite",
        }
    }

    /// Bind parameter marker for the 1-based position `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", index),
            SqlDialect::Sqlite => "?".to_string(),
        }
    }

    pub fn column_type(&self, column: &ColumnDef) -> String {
        let sql = match (self, column.column_type) {
            (SqlDialect::Postgres, ColumnType::Id) => "SERIAL PRIMARY KEY",
            (SqlDialect::Sqlite, ColumnType::Id) => "INTEGER PRIMARY KEY AUTOINCREMENT",
            (_, ColumnType::Integer) => "INTEGER",
            (SqlDialect::Postgres, ColumnType::BigInteger) => "BIGINT",
            (SqlDialect::Sqlite, ColumnType::BigInteger) => "INTEGER",
            (_, ColumnType::String) => {
                return match column.length {
                    Some(len) => format!("VARCHAR({})", len),
                    None => "TEXT".to_string(),
                };
            }
            (_, ColumnType::Text) => "TEXT",
            (_, ColumnType::Boolean) => "BOOLEAN",
            (SqlDialect::Postgres, ColumnType::Float) => "DOUBLE PRECISION",
            (SqlDialect::Sqlite, ColumnType::Float) => "REAL",
            (_, ColumnType::Timestamp) => "TIMESTAMP",
            (SqlDialect::Postgres, ColumnType::Uuid) => "UUID",
            (SqlDialect::Postgres, ColumnType::Json) => "JSONB",
            (SqlDialect::Sqlite, ColumnType::Uuid | ColumnType::Json) => "TEXT",
        };
        sql.to_string()
    }

    /// Column definition as it appears in CREATE TABLE and ADD COLUMN
    pub fn column_sql(&self, column: &ColumnDef) -> String {
        let mut sql = format!("{} {}", column.name, self.column_type(column));
        if column.column_type != ColumnType::Id {
            if !column.nullable {
                sql.push_str(" NOT NULL");
            }
            if let Some(default) = &column.default {
                sql.push_str(" DEFAULT ");
                sql.push_str(default);
            }
        }
        sql
    }

    pub fn create_table_sql(&self, table: &str, columns: &[ColumnDef]) -> String {
        let parts: Vec<String> = columns.iter().map(|c| self.column_sql(c)).collect();
        format!("CREATE TABLE {} (\n    {}\n)", table, parts.join(",\n    "))
    }

    pub fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE {}", table)
    }

    pub fn add_column_sql(&self, table: &str, column: &ColumnDef) -> String {
        format!("ALTER TABLE {} ADD COLUMN {}", table, self.column_sql(column))
    }

    pub fn remove_column_sql(&self, table: &str, column: &str) -> String {
        format!("ALTER TABLE {} DROP COLUMN {}", table, column)
    }

    pub fn rename_column_sql(&self, table: &str, from: &str, to: &str) -> String {
        format!("ALTER TABLE {} RENAME COLUMN {} TO {}", table, from, to)
    }

    pub fn rename_table_sql(&self, from: &str, to: &str) -> String {
        format!("ALTER TABLE {} RENAME TO {}", from, to)
    }

    /// SQL to create the migrations tracking table
    pub fn create_ledger_sql(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version VARCHAR(255) PRIMARY KEY,\n    \
                applied_at VARCHAR(64) NOT NULL\n\
            )",
            table
        )
    }

    /// SQL to get applied migrations
    pub fn select_ledger_sql(&self, table: &str) -> String {
        format!("SELECT version, applied_at FROM {} ORDER BY applied_at, version", table)
    }

    /// SQL to record a migration as applied
    pub fn insert_ledger_sql(&self, table: &str) -> String {
        format!(
            "INSERT INTO {} (version, applied_at) VALUES ({}, {})",
            table,
            self.placeholder(1),
            self.placeholder(2)
        )
    }

    /// SQL to remove a migration record (for rollback)
    pub fn delete_ledger_sql(&self, table: &str) -> String {
        format!("DELETE FROM {} WHERE version = {}", table, self.placeholder(1))
    }
}

/// Migration backend over a sqlx connection pool
#[derive(Debug, Clone)]
pub struct SqlBackend {
    pool: AnyPool,
    dialect: SqlDialect,
}

impl SqlBackend {
    /// Connect to the database at `database_url`
    pub async fn connect(database_url: &str) -> MigrationResult<Self> {
        let dialect = SqlDialect::from_url(database_url).ok_or_else(|| {
            crate::config::ConfigError::invalid_value(
                "database_url",
                database_url,
                "a postgres://, postgresql:// or sqlite: URL",
            )
        })?;

        sqlx::any::install_default_drivers();

        // Units run one at a time; a single connection also keeps `sqlite::memory:` alive
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(database_url)
            .await
            .map_err(|e| MigrationError::Connection(format!("Failed to connect to database: {}", e)))?;

        tracing::debug!(dialect = dialect.name(), "Connected migration backend");
        Ok(Self { pool, dialect })
    }
}

#[async_trait]
impl MigrationBackend for SqlBackend {
    fn name(&self) -> &str {
        self.dialect.name()
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    async fn begin(&self) -> DriverResult<Box<dyn MigrationTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqlTransaction {
            tx,
            dialect: self.dialect,
        }))
    }
}

/// One unit's transaction on a SQL database
pub struct SqlTransaction {
    tx: Transaction<'static, Any>,
    dialect: SqlDialect,
}

impl SqlTransaction {
    async fn execute(&mut self, sql: &str) -> DriverResult<()> {
        tracing::trace!(sql = %sql, "Executing migration statement");
        sqlx::query(sql).execute(&mut *self.tx).await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaDriver for SqlTransaction {
    async fn create_table(&mut self, table: &str, columns: &[ColumnDef]) -> DriverResult<()> {
        let sql = self.dialect.create_table_sql(table, columns);
        self.execute(&sql).await
    }

    async fn drop_table(&mut self, table: &str) -> DriverResult<()> {
        let sql = self.dialect.drop_table_sql(table);
        self.execute(&sql).await
    }

    async fn add_column(&mut self, table: &str, column: &ColumnDef) -> DriverResult<()> {
        let sql = self.dialect.add_column_sql(table, column);
        self.execute(&sql).await
    }

    async fn remove_column(&mut self, table: &str, column: &str) -> DriverResult<()> {
        let sql = self.dialect.remove_column_sql(table, column);
        self.execute(&sql).await
    }

    async fn rename_column(&mut self, table: &str, from: &str, to: &str) -> DriverResult<()> {
        let sql = self.dialect.rename_column_sql(table, from, to);
        self.execute(&sql).await
    }

    async fn rename_table(&mut self, from: &str, to: &str) -> DriverResult<()> {
        let sql = self.dialect.rename_table_sql(from, to);
        self.execute(&sql).await
    }

    async fn execute_raw(&mut self, sql: &str) -> DriverResult<()> {
        self.execute(sql).await
    }
}

#[async_trait]
impl LedgerStore for SqlTransaction {
    async fn ensure_ledger(&mut self, table: &str) -> DriverResult<()> {
        let sql = self.dialect.create_ledger_sql(table);
        self.execute(&sql).await
    }

    async fn ledger_entries(&mut self, table: &str) -> DriverResult<Vec<LedgerEntry>> {
        let sql = self.dialect.select_ledger_sql(table);
        let rows = sqlx::query(&sql).fetch_all(&mut *self.tx).await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn insert_entry(&mut self, table: &str, entry: &LedgerEntry) -> DriverResult<()> {
        let sql = self.dialect.insert_ledger_sql(table);
        sqlx::query(&sql)
            .bind(entry.version.clone())
            .bind(entry.applied_at.to_rfc3339())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_entry(&mut self, table: &str, version: &str) -> DriverResult<u64> {
        let sql = self.dialect.delete_ledger_sql(table);
        let result = sqlx::query(&sql)
            .bind(version.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MigrationTransaction for SqlTransaction {
    async fn commit(self: Box<Self>) -> DriverResult<()> {
        let this = *self;
        this.tx.commit().await.map_err(DriverError::from)
    }

    async fn rollback(self: Box<Self>) -> DriverResult<()> {
        let this = *self;
        this.tx.rollback().await.map_err(DriverError::from)
    }
}

fn entry_from_row(row: &AnyRow) -> DriverResult<LedgerEntry> {
    let version: String = row.try_get("version")?;
    let applied_at: String = row.try_get("applied_at")?;
    let applied_at = chrono::DateTime::parse_from_rfc3339(&applied_at)
        .map_err(|e| {
            DriverError::rejected(format!(
                "invalid applied_at '{}' for version {}: {}",
                applied_at, version, e
            ))
        })?
        .with_timezone(&chrono::Utc);

    Ok(LedgerEntry {
        version,
        applied_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_sql() {
        let columns = vec![
            ColumnDef::id("id"),
            ColumnDef::string("name", Some(255)).not_null(),
            ColumnDef::string("bio", None),
            ColumnDef::integer("age").with_default("0"),
        ];

        let sql = SqlDialect::Postgres.create_table_sql("cats", &columns);
        assert!(sql.contains("CREATE TABLE cats"));
        assert!(sql.contains("id SERIAL PRIMARY KEY"));
        assert!(sql.contains("name VARCHAR(255) NOT NULL"));
        assert!(sql.contains("bio TEXT"));
        assert!(sql.contains("age INTEGER DEFAULT 0"));

        let sql = SqlDialect::Sqlite.create_table_sql("cats", &columns);
        assert!(sql.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
    }

    #[test]
    fn test_alter_statements() {
        let dialect = SqlDialect::Postgres;
        assert_eq!(
            dialect.add_column_sql("cats", &ColumnDef::string("gender", Some(16))),
            "ALTER TABLE cats ADD COLUMN gender VARCHAR(16)"
        );
        assert_eq!(dialect.remove_column_sql("cats", "gender"), "ALTER TABLE cats DROP COLUMN gender");
        assert_eq!(
            dialect.rename_column_sql("cats", "name", "full_name"),
            "ALTER TABLE cats RENAME COLUMN name TO full_name"
        );
        assert_eq!(dialect.rename_table_sql("cats", "felines"), "ALTER TABLE cats RENAME TO felines");
    }

    #[test]
    fn test_ledger_sql_placeholders() {
        let pg = SqlDialect::Postgres;
        assert!(pg.create_ledger_sql("elif_migrations").contains("CREATE TABLE IF NOT EXISTS elif_migrations"));
        assert_eq!(
            pg.insert_ledger_sql("elif_migrations"),
            "INSERT INTO elif_migrations (version, applied_at) VALUES ($1, $2)"
        );
        assert_eq!(
            SqlDialect::Sqlite.delete_ledger_sql("elif_migrations"),
            "DELETE FROM elif_migrations WHERE version = ?"
        );
    }

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(SqlDialect::from_url("postgres://localhost/app"), Some(SqlDialect::Postgres));
        assert_eq!(SqlDialect::from_url("postgresql://localhost/app"), Some(SqlDialect::Postgres));
        assert_eq!(SqlDialect::from_url("sqlite::memory:"), Some(SqlDialect::Sqlite));
        assert_eq!(SqlDialect::from_url("mysql://localhost/app"), None);
    }
}
