//! Database access for vfd-analyzer
//!
//! One SQLite file (`vfd.db`) under the root folder holds jobs, cached
//! results and the append-only anchor log, so fingerprints and results
//! survive restarts.

pub mod anchors;
pub mod jobs;
pub mod results;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use vfd_common::Result;

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "vfd.db";

/// Open (creating if needed) the database and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Private in-memory database (single connection so every query sees it)
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_jobs (
            analysis_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            fingerprint TEXT,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_results (
            fingerprint TEXT PRIMARY KEY,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_anchors (
            record_id TEXT PRIMARY KEY,
            result_ref TEXT NOT NULL,
            status TEXT NOT NULL,
            transaction_ref TEXT,
            checksum TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            error TEXT,
            submitted_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_anchors_result ON audit_anchors(result_ref, submitted_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (analysis_jobs, analysis_results, audit_anchors)");
    Ok(())
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| vfd_common::Error::Internal(format!("Failed to serialize {}: {}", what, e)))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| vfd_common::Error::Internal(format!("Failed to parse stored {}: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_database_created_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DATABASE_FILE);
        let pool = init_database_pool(&path).await.unwrap();
        assert!(path.exists());

        // idempotent table creation
        init_tables(&pool).await.unwrap();
    }
}
