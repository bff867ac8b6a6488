//! Append-only audit anchor log
//!
//! Records are never updated; a retry after failure appends a new row.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use vfd_common::{Error, Result};

use crate::models::{AnchorStatus, AuditAnchorRecord};
use crate::utils::retry_on_lock;

pub async fn append_anchor(
    pool: &SqlitePool,
    record: &AuditAnchorRecord,
    max_wait_ms: u64,
) -> Result<()> {
    let record_id = record.record_id.to_string();
    let submitted_at = record.submitted_at.to_rfc3339();

    retry_on_lock("append_anchor", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO audit_anchors
                (record_id, result_ref, status, transaction_ref, checksum, attempts, error, submitted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record_id)
        .bind(&record.result_ref)
        .bind(record.status.as_str())
        .bind(&record.transaction_ref)
        .bind(&record.checksum)
        .bind(record.attempts as i64)
        .bind(&record.error)
        .bind(&submitted_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// All records for a result, oldest first
pub async fn list_for_result(pool: &SqlitePool, result_ref: &str) -> Result<Vec<AuditAnchorRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM audit_anchors WHERE result_ref = ? ORDER BY submitted_at ASC, rowid ASC",
    )
    .bind(result_ref)
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

pub async fn latest_for_result(
    pool: &SqlitePool,
    result_ref: &str,
) -> Result<Option<AuditAnchorRecord>> {
    Ok(list_for_result(pool, result_ref).await?.pop())
}

/// The submitted record for a result, if any
pub async fn submitted_for_result(
    pool: &SqlitePool,
    result_ref: &str,
) -> Result<Option<AuditAnchorRecord>> {
    Ok(list_for_result(pool, result_ref)
        .await?
        .into_iter()
        .find(AuditAnchorRecord::is_submitted))
}

fn record_from_row(row: &SqliteRow) -> Result<AuditAnchorRecord> {
    let record_id: String = row.get("record_id");
    let status: String = row.get("status");
    let submitted_at: String = row.get("submitted_at");

    Ok(AuditAnchorRecord {
        record_id: Uuid::parse_str(&record_id)
            .map_err(|e| Error::Internal(format!("Invalid anchor record id: {}", e)))?,
        result_ref: row.get("result_ref"),
        status: match status.as_str() {
            "submitted" => AnchorStatus::Submitted,
            "failed" => AnchorStatus::Failed,
            other => return Err(Error::Internal(format!("Unknown anchor status: {}", other))),
        },
        transaction_ref: row.get("transaction_ref"),
        checksum: row.get("checksum"),
        attempts: row.get::<i64, _>("attempts") as u32,
        error: row.get("error"),
        submitted_at: chrono::DateTime::parse_from_rfc3339(&submitted_at)
            .map_err(|e| Error::Internal(format!("Invalid anchor timestamp: {}", e)))?
            .with_timezone(&chrono::Utc),
    })
}
