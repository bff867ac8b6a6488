//! Cached analysis results keyed by fingerprint digest

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use vfd_common::Result;

use super::{from_json, to_json};
use crate::models::AnalysisResult;
use crate::utils::retry_on_lock;

pub async fn get_result(pool: &SqlitePool, fingerprint: &str) -> Result<Option<AnalysisResult>> {
    let row = sqlx::query("SELECT body FROM analysis_results WHERE fingerprint = ?")
        .bind(fingerprint)
        .fetch_optional(pool)
        .await?;

    row.map(|r| from_json(&r.get::<String, _>("body"), "result"))
        .transpose()
}

/// Insert unless a row for the fingerprint exists
///
/// Returns `true` when this call wrote the row. Existing rows are never
/// overwritten.
pub async fn insert_result_if_absent(
    pool: &SqlitePool,
    result: &AnalysisResult,
    max_wait_ms: u64,
) -> Result<bool> {
    let fingerprint = result.cache_key().to_string();
    let body = to_json(result, "result")?;
    let created_at = Utc::now().to_rfc3339();

    retry_on_lock("insert_result", max_wait_ms, || async {
        let outcome = sqlx::query(
            r#"
            INSERT INTO analysis_results (fingerprint, body, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(&fingerprint)
        .bind(&body)
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() == 1)
    })
    .await
}

pub async fn count_results(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM analysis_results")
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::models::fixtures;

    #[tokio::test]
    async fn test_insert_once_then_noop() {
        let pool = init_memory_pool().await.unwrap();
        let first = fixtures::result("aa", 0.2);
        let second = fixtures::result("aa", 0.9);

        assert!(insert_result_if_absent(&pool, &first, 1000).await.unwrap());
        assert!(!insert_result_if_absent(&pool, &second, 1000).await.unwrap());

        let stored = get_result(&pool, "aa").await.unwrap().unwrap();
        assert_eq!(stored.verdict.fake_probability, 0.2);
        assert_eq!(count_results(&pool).await.unwrap(), 1);
        assert!(get_result(&pool, "bb").await.unwrap().is_none());
    }
}
