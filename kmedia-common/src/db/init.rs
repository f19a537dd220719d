//! Database initialization
//!
//! Opens (or creates) the SQLite database and creates the tables kmedia
//! background services write to. Table creation is idempotent and runs on
//! every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every connection (milliseconds)
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Maximum time to wait for a pooled connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows the health endpoint to read while the worker writes
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    let pragma_sql = format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS);
    sqlx::query(&pragma_sql).execute(&pool).await?;

    create_progress_records_table(&pool).await?;

    Ok(pool)
}

/// Per-account, per-unit playback progress
///
/// `data` holds a JSON object merged key-by-key on every write.
/// `cursor_ref` is the last chronicle event id that touched the row.
/// `write_seq` increases with every insert or update, giving a total write
/// order independent of timestamps and of how cursors compare.
pub async fn create_progress_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS progress_records (
            account_id TEXT NOT NULL,
            unit_uid TEXT NOT NULL,
            cursor_ref TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            write_seq INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (account_id, unit_uid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_progress_records_write_seq ON progress_records(write_seq)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
