use crate::pool::DbPool;
use anyhow::{Context, Result};
use refinery::load_sql_migrations;
use std::path::Path;
use tracing::info;

/// Apply any pending SQL migrations from `src/migrations/sql`.
///
/// The path is anchored to this crate's manifest directory, so migrations
/// resolve the same way no matter which working directory the process was
/// launched from.
pub async fn run(pool: &DbPool) -> Result<()> {
    let mut client = pool
        .get()
        .await
        .context("Failed to get database connection for migrations")?;

    let migrations_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/migrations/sql");

    let migrations = load_sql_migrations(&migrations_path).with_context(|| {
        format!("Failed to load migrations from {}", migrations_path.display())
    })?;

    let report = refinery::Runner::new(&migrations)
        .run_async(&mut **client)
        .await
        .context("Failed to run migrations")?;

    for migration in report.applied_migrations() {
        info!("Applied migration: {}", migration.name());
    }

    info!("All migrations completed successfully");
    Ok(())
}
