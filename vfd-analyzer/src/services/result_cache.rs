//! Result Cache: fingerprint → AnalysisResult
//!
//! Writes are idempotent. Offering an equivalent result for a cached
//! fingerprint is a no-op; offering a different one leaves the stored
//! result untouched and reports `CacheConflict`. Results are never evicted
//! while the service runs.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, error};

use crate::db;
use crate::error::AnalysisError;
use crate::models::AnalysisResult;

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<AnalysisResult>, AnalysisError>;

    /// Store a result unless one already exists for its fingerprint
    async fn put(&self, result: &AnalysisResult) -> Result<(), AnalysisError>;
}

/// Compare an offered result against the stored one
fn check_existing(existing: &AnalysisResult, offered: &AnalysisResult) -> Result<(), AnalysisError> {
    if existing.is_equivalent(offered) {
        debug!(fingerprint = %existing.fingerprint.short(), "Result already cached");
        return Ok(());
    }
    error!(
        fingerprint = %existing.fingerprint.short(),
        stored = existing.verdict.fake_probability,
        offered = offered.verdict.fake_probability,
        "Conflicting result offered for cached fingerprint; keeping stored result"
    );
    Err(AnalysisError::CacheConflict {
        fingerprint: existing.cache_key().to_string(),
    })
}

/// SQLite-backed cache; survives restarts
#[derive(Clone)]
pub struct SqliteResultCache {
    pool: SqlitePool,
    lock_wait_ms: u64,
}

impl SqliteResultCache {
    pub fn new(pool: SqlitePool, lock_wait_ms: u64) -> Self {
        Self { pool, lock_wait_ms }
    }
}

#[async_trait]
impl ResultCache for SqliteResultCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<AnalysisResult>, AnalysisError> {
        Ok(db::results::get_result(&self.pool, fingerprint).await?)
    }

    async fn put(&self, result: &AnalysisResult) -> Result<(), AnalysisError> {
        if db::results::insert_result_if_absent(&self.pool, result, self.lock_wait_ms).await? {
            debug!(fingerprint = %result.fingerprint.short(), "Cached analysis result");
            return Ok(());
        }
        match db::results::get_result(&self.pool, result.cache_key()).await? {
            Some(existing) => check_existing(&existing, result),
            None => Err(AnalysisError::Storage(format!(
                "result row for {} vanished after insert conflict",
                result.fingerprint.short()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;

    async fn exercise(cache: &dyn ResultCache) {
        let first = fixtures::result("f00d", 0.2);
        cache.put(&first).await.unwrap();

        // same content, different processing metadata
        let mut again = first.clone();
        again.metadata.processing_ms = 999;
        cache.put(&again).await.unwrap();

        let conflicting = fixtures::result("f00d", 0.95);
        let err = cache.put(&conflicting).await.unwrap_err();
        assert_eq!(err.code(), "CACHE_CONFLICT");

        let stored = cache.get("f00d").await.unwrap().unwrap();
        assert_eq!(stored.verdict, first.verdict);
        assert!(cache.get("beef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_cache_idempotent_writes() {
        let pool = db::init_memory_pool().await.unwrap();
        let cache = SqliteResultCache::new(pool.clone(), 1000);
        exercise(&cache).await;
        assert_eq!(db::results::count_results(&pool).await.unwrap(), 1);
    }
}
