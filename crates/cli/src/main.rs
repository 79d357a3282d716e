mod commands;
mod logging;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::migrate;
use elif_migrations::{MigrationConfig, Migrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "elif-migrate")]
#[command(about = "Versioned, reversible database schema migrations", version)]
struct Cli {
    /// Database connection URL (defaults to DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory holding migration definitions (defaults to MIGRATIONS_DIR or ./migrations)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Ledger table name (defaults to MIGRATIONS_TABLE or elif_migrations)
    #[arg(long, global = true)]
    table: Option<String>,

    /// Print the plan without executing anything
    #[arg(long, global = true)]
    dry_run: bool,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run pending migrations, or migrate up or down to VERSION
    Migrate {
        /// Target version
        version: Option<String>,
    },

    /// Rollback the most recently applied migrations
    Rollback {
        /// Number of migrations to roll back
        #[arg(default_value_t = 1)]
        steps: usize,
    },

    /// Show migration status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new migration
    Create {
        /// Migration name
        name: String,

        /// Write a SQL definition instead of YAML
        #[arg(long)]
        sql: bool,
    },
}

impl Cli {
    /// Environment configuration with command line overrides applied
    fn config(&self) -> anyhow::Result<MigrationConfig> {
        let mut config = MigrationConfig::from_env().context("Invalid migration environment")?;
        if let Some(url) = &self.database_url {
            config = config.with_database_url(url);
        }
        if let Some(dir) = &self.dir {
            config = config.with_migrations_dir(dir);
        }
        if let Some(table) = &self.table {
            config = config.with_migrations_table(table);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(&cli.log_level, cli.log_json) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config()?;
    let dry_run = cli.dry_run;

    if let Commands::Create { name, sql } = &cli.command {
        return migrate::create(&config, name, *sql);
    }

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, aborting the migration in flight");
            canceller.cancel();
        }
    });

    let migrator = Migrator::connect(config)
        .await
        .context("Failed to open the migration database")?
        .with_cancellation(token);

    match cli.command {
        Commands::Migrate { version } => migrate::run(&migrator, version.as_deref(), dry_run).await,
        Commands::Rollback { steps } => migrate::rollback(&migrator, steps, dry_run).await,
        Commands::Status { json } => migrate::status(&migrator, json).await,
        Commands::Create { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_arguments() {
        let cli = Cli::try_parse_from(["elif-migrate", "migrate"]).unwrap();
        assert!(matches!(cli.command, Commands::Migrate { version: None }));

        let cli = Cli::try_parse_from(["elif-migrate", "migrate", "20240101_120000", "--dry-run"]).unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Commands::Migrate { version } => assert_eq!(version.as_deref(), Some("20240101_120000")),
            other => panic!("Expected migrate, got {:?}", other),
        }
    }

    #[test]
    fn test_rollback_defaults_to_one_step() {
        let cli = Cli::try_parse_from(["elif-migrate", "rollback"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollback { steps: 1 }));

        let cli = Cli::try_parse_from(["elif-migrate", "rollback", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollback { steps: 3 }));

        assert!(Cli::try_parse_from(["elif-migrate", "rollback", "-1"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "elif-migrate",
            "status",
            "--json",
            "--database-url",
            "sqlite::memory:",
            "--dir",
            "db/migrations",
            "--table",
            "schema_ledger",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert!(matches!(cli.command, Commands::Status { json: true }));
        assert_eq!(cli.log_level, "debug");

        let config = cli.config().unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.migrations_table, "schema_ledger");
    }

    #[test]
    fn test_invalid_table_flag_is_rejected() {
        let cli = Cli::try_parse_from(["elif-migrate", "status", "--table", "drop table;"]).unwrap();
        assert!(cli.config().is_err());
    }

    #[test]
    fn test_create_arguments() {
        let cli = Cli::try_parse_from(["elif-migrate", "create", "add_gender", "--sql"]).unwrap();
        match cli.command {
            Commands::Create { name, sql } => {
                assert_eq!(name, "add_gender");
                assert!(sql);
            }
            other => panic!("Expected create, got {:?}", other),
        }
    }
}
