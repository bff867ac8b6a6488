//! Analysis job persistence

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use vfd_common::Result;

use super::{from_json, to_json};
use crate::error::AnalysisError;
use crate::models::{AnalysisId, AnalysisJob};
use crate::utils::retry_on_lock;

/// Insert or update a job snapshot
pub async fn save_job(pool: &SqlitePool, job: &AnalysisJob, max_wait_ms: u64) -> Result<()> {
    let analysis_id = job.analysis_id.to_string();
    let state = job.state.as_str();
    let fingerprint = job.fingerprint.as_ref().map(|f| f.digest.clone());
    let body = to_json(job, "job")?;
    let created_at = job.created_at.to_rfc3339();
    let updated_at = Utc::now().to_rfc3339();

    retry_on_lock("save_job", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO analysis_jobs (analysis_id, state, fingerprint, body, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(analysis_id) DO UPDATE SET
                state = excluded.state,
                fingerprint = excluded.fingerprint,
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&analysis_id)
        .bind(state)
        .bind(&fingerprint)
        .bind(&body)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

pub async fn load_job(pool: &SqlitePool, analysis_id: &AnalysisId) -> Result<Option<AnalysisJob>> {
    let row = sqlx::query("SELECT body FROM analysis_jobs WHERE analysis_id = ?")
        .bind(analysis_id.as_str())
        .fetch_optional(pool)
        .await?;

    row.map(|r| from_json(&r.get::<String, _>("body"), "job"))
        .transpose()
}

/// Fail every job a previous process left unfinished
///
/// Returns the number of jobs marked failed.
pub async fn fail_interrupted_jobs(pool: &SqlitePool, max_wait_ms: u64) -> Result<usize> {
    let rows = sqlx::query(
        "SELECT body FROM analysis_jobs WHERE state NOT IN ('COMPLETE', 'FAILED', 'CANCELLED')",
    )
    .fetch_all(pool)
    .await?;

    let mut count = 0;
    for row in rows {
        let mut job: AnalysisJob = from_json(&row.get::<String, _>("body"), "job")?;
        let reason = AnalysisError::Storage("interrupted by service restart".to_string());
        if job.fail(&reason).is_ok() {
            save_job(pool, &job, max_wait_ms).await?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::warn!(count, "Marked interrupted analysis jobs as failed");
    }
    Ok(count)
}
