//! Database connection and initialization.

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Database connection wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Initialize the SQLite database.
///
/// Creates the database file if it doesn't exist, runs migrations,
/// and returns a connection pool.
pub async fn init_database(db_path: &str, max_connections: u32) -> Result<Database> {
    // Ensure parent directory exists (":memory:" and bare file names have none)
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    // Create database URL
    let db_url = format!("sqlite:{}?mode=rwc", db_path);

    info!("Connecting to database: {}", db_path);

    // Create connection pool
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(&db_url)
        .await
        .with_context(|| format!("Failed to open database {}", db_path))?;

    // Run migrations
    run_migrations(&pool).await?;

    Ok(Database { pool })
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Read and execute the schema migration
    let migration_sql = include_str!("../../migrations/001_init.sql");

    info!("Running database migrations...");

    // Split by semicolons and execute each statement
    for statement in migration_sql.split(';') {
        // Remove comment lines and trim whitespace
        let statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }

        if let Err(e) = sqlx::query(statement).execute(pool).await {
            let err_str = e.to_string();
            // "already exists" is expected on re-runs
            if err_str.contains("already exists") {
                continue;
            }
            // Table and index creation must not fail silently
            if statement.to_uppercase().starts_with("CREATE") {
                anyhow::bail!("Migration failed on CREATE statement: {}", e);
            }
            warn!("Migration statement failed: {}", e);
        }
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_database() {
        let db = init_database(":memory:", 1).await.unwrap();

        let result: (i32,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' \
             AND name IN ('states', 'segments', 'points', 'concurrencies')",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();

        assert_eq!(result.0, 4);
    }

    #[tokio::test]
    async fn test_migrations_are_rerunnable() {
        let db = init_database(":memory:", 1).await.unwrap();
        sqlx::query(
            "INSERT INTO states (identifier, title, initials, state_code) \
             VALUES ('DE', 'Delaware', 'DE', 10)",
        )
        .execute(db.pool())
        .await
        .unwrap();

        run_migrations(db.pool()).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM states")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
