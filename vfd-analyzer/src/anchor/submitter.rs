//! Audit Anchor Submitter
//!
//! `submit(result)` always yields an [`AuditAnchorRecord`]:
//! - an existing `submitted` record for the result is returned as is
//! - transient ledger errors are retried with exponential backoff up to
//!   `max_attempts`
//! - permanent errors and exhausted retries produce a `failed` record
//!
//! Every outcome is appended to the anchor log. Submissions for the same
//! result are serialized so it is never anchored twice concurrently;
//! different results proceed independently.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use super::ledger::{AnchorPayload, LedgerClient, LedgerError};
use crate::config::AnchorConfig;
use crate::db;
use crate::error::AnalysisError;
use crate::models::{AnalysisId, AnalysisResult, AnchorStatus, AuditAnchorRecord};

/// Backoff ceiling between attempts
const MAX_BACKOFF_MS: u64 = 10_000;

/// SHA-256 over the canonical (serde field order) result JSON
pub fn result_checksum(result: &AnalysisResult) -> Result<String, AnalysisError> {
    let canonical = serde_json::to_vec(result)
        .map_err(|e| AnalysisError::Storage(format!("result serialization failed: {}", e)))?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

pub struct AnchorSubmitter {
    ledger: Option<Arc<dyn LedgerClient>>,
    pool: SqlitePool,
    config: AnchorConfig,
    lock_wait_ms: u64,
    /// One lock per result reference with a submission in flight
    result_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AnchorSubmitter {
    pub fn new(
        ledger: Option<Arc<dyn LedgerClient>>,
        pool: SqlitePool,
        config: AnchorConfig,
        lock_wait_ms: u64,
    ) -> Self {
        Self {
            ledger,
            pool,
            config,
            lock_wait_ms,
            result_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Whether a ledger endpoint is configured
    pub fn is_enabled(&self) -> bool {
        self.ledger.is_some()
    }

    pub fn auto_submit(&self) -> bool {
        self.config.auto_submit && self.is_enabled()
    }

    /// Latest anchor record for a result, if any
    pub async fn latest(&self, result_ref: &str) -> Result<Option<AuditAnchorRecord>, AnalysisError> {
        Ok(db::anchors::latest_for_result(&self.pool, result_ref).await?)
    }

    /// Anchor a finished result
    ///
    /// Only fails when no ledger is configured; ledger failures are
    /// reported through the returned record.
    pub async fn submit(
        &self,
        analysis_id: &AnalysisId,
        result: &AnalysisResult,
    ) -> Result<AuditAnchorRecord, AnalysisError> {
        let ledger = self.ledger.as_ref().ok_or_else(|| {
            AnalysisError::AnchorSubmissionFailed("no ledger endpoint configured".to_string())
        })?;

        let result_ref = result.cache_key().to_string();
        let guard = self.lock_result(&result_ref).await;
        let record = self
            .submit_locked(ledger.as_ref(), analysis_id, result, result_ref.clone())
            .await;
        drop(guard);
        self.release_result(&result_ref);
        record
    }

    fn result_locks(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.result_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn lock_result(&self, result_ref: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .result_locks()
            .entry(result_ref.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Forget the lock once nobody holds or waits on it
    fn release_result(&self, result_ref: &str) {
        let mut locks = self.result_locks();
        if locks
            .get(result_ref)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(result_ref);
        }
    }

    async fn submit_locked(
        &self,
        ledger: &dyn LedgerClient,
        analysis_id: &AnalysisId,
        result: &AnalysisResult,
        result_ref: String,
    ) -> Result<AuditAnchorRecord, AnalysisError> {
        match db::anchors::submitted_for_result(&self.pool, &result_ref).await {
            Ok(Some(existing)) => {
                info!(
                    fingerprint = %result.fingerprint.short(),
                    transaction_ref = ?existing.transaction_ref,
                    "Result already anchored"
                );
                return Ok(existing);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not read anchor log; submitting anyway"),
        }

        let checksum = result_checksum(result)?;
        let payload = AnchorPayload {
            result_ref: result_ref.clone(),
            analysis_id: analysis_id.to_string(),
            fake_probability: result.verdict.fake_probability,
            label: result.verdict.label,
            policy_version: result.verdict.policy_version.clone(),
            checksum: checksum.clone(),
            analyzed_at: result.metadata.analyzed_at,
        };

        let (outcome, attempts) = self.submit_with_retry(ledger, &payload).await;

        let record = AuditAnchorRecord {
            record_id: Uuid::new_v4(),
            result_ref,
            status: if outcome.is_ok() {
                AnchorStatus::Submitted
            } else {
                AnchorStatus::Failed
            },
            transaction_ref: outcome.as_ref().ok().cloned(),
            checksum,
            attempts,
            error: outcome.as_ref().err().map(|e| e.to_string()),
            submitted_at: Utc::now(),
        };

        match &outcome {
            Ok(tx) => info!(
                analysis_id = %analysis_id,
                fingerprint = %result.fingerprint.short(),
                transaction_ref = %tx,
                attempts,
                "Audit anchor submitted"
            ),
            Err(e) => warn!(
                analysis_id = %analysis_id,
                fingerprint = %result.fingerprint.short(),
                attempts,
                error = %AnalysisError::AnchorSubmissionFailed(e.to_string()),
                "Audit anchor recorded as failed"
            ),
        }

        if let Err(e) = db::anchors::append_anchor(&self.pool, &record, self.lock_wait_ms).await {
            warn!(error = %e, record_id = %record.record_id, "Failed to persist anchor record");
        }

        Ok(record)
    }

    async fn submit_with_retry(
        &self,
        ledger: &dyn LedgerClient,
        payload: &AnchorPayload,
    ) -> (Result<String, LedgerError>, u32) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff_ms = self.config.initial_backoff_ms;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match ledger.submit(payload).await {
                Ok(tx) => return (Ok(tx), attempt),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(attempt, max_attempts, backoff_ms, error = %e, "Ledger submission failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with the given error, then succeeds
    struct FlakyLedger {
        failures: u32,
        error: LedgerError,
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LedgerClient for FlakyLedger {
        async fn submit(&self, payload: &AnchorPayload) -> Result<String, LedgerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if n < self.failures {
                return Err(self.error.clone());
            }
            Ok(format!("tx-{}", &payload.checksum[..8]))
        }
    }

    async fn submitter(failures: u32, error: LedgerError) -> (AnchorSubmitter, Arc<FlakyLedger>) {
        slow_submitter(failures, error, Duration::ZERO).await
    }

    async fn slow_submitter(
        failures: u32,
        error: LedgerError,
        delay: Duration,
    ) -> (AnchorSubmitter, Arc<FlakyLedger>) {
        let ledger = Arc::new(FlakyLedger {
            failures,
            error,
            delay,
            calls: AtomicU32::new(0),
        });
        let pool = db::init_memory_pool().await.unwrap();
        let config = AnchorConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            ..AnchorConfig::default()
        };
        let submitter = AnchorSubmitter::new(
            Some(ledger.clone() as Arc<dyn LedgerClient>),
            pool,
            config,
            1000,
        );
        (submitter, ledger)
    }

    fn id() -> AnalysisId {
        AnalysisId::parse("anchor-test").unwrap()
    }

    #[tokio::test]
    async fn test_transient_failures_retried_then_submitted() {
        let (submitter, ledger) = submitter(2, LedgerError::Transient("busy".into())).await;
        let result = fixtures::result("ab12", 0.3);
        let record = submitter.submit(&id(), &result).await.unwrap();

        assert_eq!(record.status, AnchorStatus::Submitted);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.checksum, result_checksum(&result).unwrap());
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_three_failures_recorded_as_failed() {
        let (submitter, _) = submitter(10, LedgerError::Transient("down".into())).await;
        let result = fixtures::result("ab12", 0.3);
        let record = submitter.submit(&id(), &result).await.unwrap();

        assert_eq!(record.status, AnchorStatus::Failed);
        assert_eq!(record.attempts, 3);
        assert!(record.transaction_ref.is_none());
        let latest = submitter.latest("ab12").await.unwrap().unwrap();
        assert_eq!(latest.record_id, record.record_id);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let (submitter, ledger) = submitter(1, LedgerError::Permanent("bad".into())).await;
        let record = submitter
            .submit(&id(), &fixtures::result("ab12", 0.3))
            .await
            .unwrap();
        assert_eq!(record.status, AnchorStatus::Failed);
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_submitted_is_returned() {
        let (submitter, ledger) = submitter(0, LedgerError::Transient("n/a".into())).await;
        let result = fixtures::result("ab12", 0.3);
        let first = submitter.submit(&id(), &result).await.unwrap();
        let second = submitter.submit(&id(), &result).await.unwrap();
        assert_eq!(first.record_id, second.record_id);
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_ledger_configured() {
        let pool = db::init_memory_pool().await.unwrap();
        let submitter = AnchorSubmitter::new(None, pool, AnchorConfig::default(), 1000);
        assert!(!submitter.is_enabled());
        let err = submitter
            .submit(&id(), &fixtures::result("ab12", 0.3))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ANCHOR_SUBMISSION_FAILED");
    }

    #[tokio::test]
    async fn test_different_results_submit_concurrently() {
        let delay = Duration::from_millis(300);
        let (submitter, ledger) =
            slow_submitter(0, LedgerError::Transient("n/a".into()), delay).await;
        let results: Vec<_> = ["aa01", "aa02", "aa03", "aa04"]
            .iter()
            .map(|digest| fixtures::result(digest, 0.3))
            .collect();

        let analysis_id = id();
        let started = std::time::Instant::now();
        let records =
            futures::future::join_all(results.iter().map(|r| submitter.submit(&analysis_id, r))).await;
        let elapsed = started.elapsed();

        assert!(records
            .iter()
            .all(|r| r.as_ref().unwrap().status == AnchorStatus::Submitted));
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 4);
        assert!(elapsed < delay * 3, "submissions ran one after another: {:?}", elapsed);
        assert!(submitter.result_locks().is_empty());
    }

    #[tokio::test]
    async fn test_same_result_submitted_once_under_concurrency() {
        let (submitter, ledger) = slow_submitter(
            0,
            LedgerError::Transient("n/a".into()),
            Duration::from_millis(100),
        )
        .await;
        let result = fixtures::result("ab12", 0.3);

        let analysis_id = id();
        let (first, second) = tokio::join!(
            submitter.submit(&analysis_id, &result),
            submitter.submit(&analysis_id, &result)
        );
        assert_eq!(first.unwrap().record_id, second.unwrap().record_id);
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
    }
}
