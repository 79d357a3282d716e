//! End-to-end runs against a SQLite database file

use elif_migrations::{MigrationConfig, MigrationError, Migrator, SqlDialect};
use sqlx::Row;
use std::fs;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    migrator: Migrator,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let migrations = dir.path().join("migrations");
    fs::create_dir_all(&migrations).unwrap();

    fs::write(
        migrations.join("20240101_120000_create_cats.yaml"),
        r#"
change:
  - create_table:
      table: cats
      columns:
        - { name: id, type: id }
        - { name: name, type: string, length: 255, nullable: false }
        - { name: age, type: integer }
        - { name: breed, type: string }
"#,
    )
    .unwrap();
    fs::write(
        migrations.join("20240102_090000_add_gender.yaml"),
        "change:\n  - add_column: { table: cats, column: { name: gender, type: string } }\n",
    )
    .unwrap();

    let url = format!("sqlite://{}?mode=rwc", dir.path().join("app.db").display());
    let config = MigrationConfig::default()
        .with_migrations_dir(&migrations)
        .with_database_url(url);
    let migrator = Migrator::connect(config).await.unwrap();

    Fixture { _dir: dir, migrator }
}

async fn cat_columns(migrator: &Migrator) -> Vec<String> {
    let pool = sqlite_pool(migrator).await;
    let rows = sqlx::query("SELECT name FROM pragma_table_info('cats')")
        .fetch_all(&pool)
        .await
        .unwrap();
    rows.iter().map(|row| row.get::<String, _>("name")).collect()
}

async fn sqlite_pool(migrator: &Migrator) -> sqlx::AnyPool {
    let url = migrator.config().database_url.clone().unwrap();
    sqlx::AnyPool::connect(&url).await.unwrap()
}

#[tokio::test]
async fn cats_scenario_on_sqlite() {
    let Fixture { _dir, migrator } = fixture().await;
    assert_eq!(migrator.backend().name(), SqlDialect::Sqlite.name());

    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.applied_count(), 2);
    assert_eq!(
        cat_columns(&migrator).await,
        vec!["id", "name", "age", "breed", "gender"]
    );

    migrator.rollback(1).await.unwrap();
    assert_eq!(cat_columns(&migrator).await, vec!["id", "name", "age", "breed"]);
    let applied: Vec<String> = migrator
        .applied_versions()
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.to_string())
        .collect();
    assert_eq!(applied, vec!["20240101_120000"]);

    migrator.migrate().await.unwrap();
    assert!(cat_columns(&migrator).await.contains(&"gender".to_string()));

    let status = migrator.status().await.unwrap();
    assert_eq!(status.applied_count(), 2);
    assert!(status.orphaned.is_empty());
}

#[tokio::test]
async fn failed_unit_is_rolled_back_on_sqlite() {
    let Fixture { _dir, migrator } = fixture().await;
    fs::write(
        migrator.config().migrations_dir.join("20240103_100000_broken.sql"),
        "-- Up migration\nCREATE TABLE dogs (id INTEGER PRIMARY KEY);\nINSERT INTO missing_table VALUES (1);\n\n-- Down migration\nDROP TABLE dogs;\n",
    )
    .unwrap();

    let err = migrator.migrate().await.unwrap_err();
    assert!(matches!(err, MigrationError::DriverFailure { ref version, .. } if version == "20240103_100000"));

    let pool = sqlite_pool(&migrator).await;
    let dogs = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'dogs'")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert!(dogs.is_empty());

    let status = migrator.status().await.unwrap();
    assert_eq!(status.applied_count(), 2);
    assert_eq!(status.pending_count(), 1);
}
