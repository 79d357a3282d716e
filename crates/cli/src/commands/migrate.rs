use std::fmt::Write;
use std::sync::Arc;

use anyhow::Context;
use elif_migrations::{
    ConventionScheme, DefinitionFormat, Direction, Discoverer, ExecutionReport, MigrationCommand,
    MigrationConfig, MigrationStatus, Migrator, PlannedChange, StatusReport,
};

pub fn create(config: &MigrationConfig, name: &str, sql: bool) -> anyhow::Result<()> {
    let format = if sql {
        DefinitionFormat::Sql
    } else {
        DefinitionFormat::Yaml
    };
    let path = Discoverer::new(&config.migrations_dir, Arc::new(ConventionScheme))
        .create(name, format)
        .with_context(|| format!("Failed to create migration '{}'", name))?;

    println!("Created migration: {}", path.display());
    Ok(())
}

pub async fn run(migrator: &Migrator, target: Option<&str>, dry_run: bool) -> anyhow::Result<()> {
    let command = match target {
        Some(target) => MigrationCommand::MigrateTo(migrator.parse_version(target)?),
        None => MigrationCommand::MigrateAll,
    };
    execute(migrator, command, dry_run).await
}

pub async fn rollback(migrator: &Migrator, steps: usize, dry_run: bool) -> anyhow::Result<()> {
    execute(migrator, MigrationCommand::Rollback(steps), dry_run).await
}

pub async fn status(migrator: &Migrator, json: bool) -> anyhow::Result<()> {
    let report = migrator.status().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_status(&report));
    }
    Ok(())
}

async fn execute(migrator: &Migrator, command: MigrationCommand, dry_run: bool) -> anyhow::Result<()> {
    if dry_run {
        let changes = migrator.plan(&command).await?;
        print!("{}", format_plan(&changes));
        return Ok(());
    }

    let report = migrator.run(command).await?;
    print!("{}", format_report(&report));
    Ok(())
}

fn arrow(direction: Direction) -> &'static str {
    match direction {
        Direction::Up => "⬆",
        Direction::Down => "⬇",
    }
}

pub fn format_plan(changes: &[PlannedChange]) -> String {
    let mut out = String::new();
    if changes.is_empty() {
        out.push_str("Nothing to do\n");
        return out;
    }

    let _ = writeln!(out, "Dry run, {} migration(s) would run:", changes.len());
    for change in changes {
        let _ = writeln!(
            out,
            "  {} {} - {} ({})",
            arrow(change.direction),
            change.version,
            change.name,
            change.direction
        );
        for operation in &change.operations {
            let _ = writeln!(out, "      {}", operation);
        }
    }
    out
}

pub fn format_report(report: &ExecutionReport) -> String {
    let mut out = String::new();
    if report.steps.is_empty() {
        out.push_str("Nothing to do\n");
        return out;
    }

    for step in &report.steps {
        let verb = match step.direction {
            Direction::Up => "Applied",
            Direction::Down => "Rolled back",
        };
        let _ = writeln!(
            out,
            "{} {}: {} - {} ({} ms)",
            arrow(step.direction),
            verb,
            step.version,
            step.name,
            step.elapsed_ms
        );
    }

    let _ = writeln!(
        out,
        "\n{} applied, {} rolled back in {} ms",
        report.applied_count(),
        report.reverted_count(),
        report.execution_time_ms
    );
    out
}

pub fn format_status(report: &StatusReport) -> String {
    let mut out = String::new();
    out.push_str("Migration Status:\n");
    out.push_str("================\n");

    if report.units.is_empty() && report.orphaned.is_empty() {
        out.push_str("No migrations found\n");
        return out;
    }

    for unit in &report.units {
        match &unit.status {
            MigrationStatus::Applied { applied_at } => {
                let _ = writeln!(
                    out,
                    "  ✅ {} - {} (applied {})",
                    unit.version,
                    unit.name,
                    applied_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            MigrationStatus::Pending => {
                let _ = writeln!(out, "  ⏳ {} - {}", unit.version, unit.name);
            }
        }
    }
    for entry in &report.orphaned {
        let _ = writeln!(out, "  ⚠️  {} (applied, definition missing)", entry.version);
    }

    let _ = writeln!(
        out,
        "\n{} applied, {} pending",
        report.applied_count(),
        report.pending_count()
    );
    out.push_str("✅ = Applied, ⏳ = Pending\n");
    out
}
