mod models;

pub use models::*;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub type DbPool = SqlitePool;

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("zotride.db");

    info!("Initializing database at {}", db_path.display());

    // Pragmas are per connection, so they go on the connect options
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: users, drivers, organizations, rides and riders
    let has_rides_table: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='rides'")
            .fetch_optional(pool)
            .await?;
    if has_rides_table.is_none() {
        execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;
    }

    // Migration 002: driver reviews
    let has_reviews_table: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='reviews'")
            .fetch_optional(pool)
            .await?;
    if has_reviews_table.is_none() {
        execute_sql(pool, include_str!("../../migrations/002_reviews.sql")).await?;
    }

    info!("Migrations completed");
    Ok(())
}

/// Current time in the storage format: UTC, second precision, `Z` suffix.
///
/// Every timestamp column uses this format so that string comparison in SQL
/// orders the same way as time does.
pub fn now_timestamp() -> String {
    to_timestamp(chrono::Utc::now())
}

pub fn to_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
