//! Audit anchor records (append-only)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of an anchor submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorStatus {
    /// Ledger accepted the record and returned a transaction reference
    Submitted,
    /// Permanent failure or retries exhausted
    Failed,
}

impl AnchorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AnchorStatus::Submitted => "submitted",
            AnchorStatus::Failed => "failed",
        }
    }
}

/// One submission outcome for a finished AnalysisResult
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditAnchorRecord {
    pub record_id: Uuid,
    /// Cache key of the anchored result
    pub result_ref: String,
    pub status: AnchorStatus,
    /// Ledger transaction reference when submitted
    pub transaction_ref: Option<String>,
    /// SHA-256 over the canonical result JSON
    pub checksum: String,
    pub attempts: u32,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl AuditAnchorRecord {
    pub fn is_submitted(&self) -> bool {
        self.status == AnchorStatus::Submitted
    }
}
