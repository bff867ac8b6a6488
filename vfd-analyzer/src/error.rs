//! Error types for vfd-analyzer
//!
//! Two layers:
//! - [`AnalysisError`]: job-level failures with stable error codes
//! - [`ApiError`]: HTTP mapping of everything a handler can return

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::models::JobState;
use crate::workflow::CoordinatorError;

/// Job-level failure taxonomy
///
/// Adapter-level errors never surface here unless every adapter failed, in
/// which case the job fails with [`AnalysisError::EnsembleUnavailable`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    /// Bad, corrupt, oversized or unreachable video input
    #[error("Input unreadable: {0}")]
    InputUnreadable(String),

    /// A different result was offered for an already cached fingerprint
    #[error("Cache conflict for fingerprint {fingerprint}")]
    CacheConflict { fingerprint: String },

    /// No model adapter produced a usable score
    #[error("Ensemble unavailable: all {attempted} model adapter(s) failed; retry later")]
    EnsembleUnavailable { attempted: usize },

    /// A single adapter exceeded its call timeout
    #[error("Adapter '{model}' timed out after {timeout_ms} ms")]
    AdapterTimeout { model: String, timeout_ms: u64 },

    /// A single adapter reported a backend failure
    #[error("Adapter '{model}' failed: {message}")]
    AdapterError { model: String, message: String },

    /// Overall per-job deadline exceeded
    #[error("Job exceeded its {timeout_secs} s deadline")]
    JobTimeout { timeout_secs: u64 },

    /// Audit anchor could not be recorded on the ledger
    #[error("Anchor submission failed: {0}")]
    AnchorSubmissionFailed(String),

    /// Cooperative cancellation observed at a stage boundary
    #[error("Analysis cancelled")]
    Cancelled,

    /// State machine rejected a transition
    #[error("Invalid job transition {from:?} -> {to:?}")]
    InvalidTransition { from: JobState, to: JobState },

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AnalysisError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::InputUnreadable(_) => "INPUT_UNREADABLE",
            AnalysisError::CacheConflict { .. } => "CACHE_CONFLICT",
            AnalysisError::EnsembleUnavailable { .. } => "ENSEMBLE_UNAVAILABLE",
            AnalysisError::AdapterTimeout { .. } => "ADAPTER_TIMEOUT",
            AnalysisError::AdapterError { .. } => "ADAPTER_ERROR",
            AnalysisError::JobTimeout { .. } => "JOB_TIMEOUT",
            AnalysisError::AnchorSubmissionFailed(_) => "ANCHOR_SUBMISSION_FAILED",
            AnalysisError::Cancelled => "CANCELLED",
            AnalysisError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AnalysisError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Whether the caller may reasonably resubmit the same input later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalysisError::EnsembleUnavailable { .. }
                | AnalysisError::AdapterTimeout { .. }
                | AnalysisError::AdapterError { .. }
                | AnalysisError::JobTimeout { .. }
                | AnalysisError::AnchorSubmissionFailed(_)
                | AnalysisError::Storage(_)
        )
    }

    /// Wire representation used by the progress stream and job records
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl From<vfd_common::Error> for AnalysisError {
    fn from(err: vfd_common::Error) -> Self {
        AnalysisError::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for AnalysisError {
    fn from(err: sqlx::Error) -> Self {
        AnalysisError::Storage(err.to_string())
    }
}

/// Serializable error description (`{code, message, retryable}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. a caller-supplied analysis id already in use
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Dependency not configured or not reachable (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Job-level analysis failure
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// vfd-common error
    #[error("Common error: {0}")]
    Common(#[from] vfd_common::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Common(vfd_common::Error::Database(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Analysis(ref err) => {
                let status = match err {
                    AnalysisError::InputUnreadable(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    AnalysisError::EnsembleUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    AnalysisError::JobTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    AnalysisError::Cancelled => StatusCode::CONFLICT,
                    AnalysisError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code(), err.to_string())
            }
            ApiError::Common(ref err) => {
                let (status, code) = match err {
                    vfd_common::Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    vfd_common::Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR"),
                };
                (status, code, err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::UnknownModels(_) => ApiError::BadRequest(err.to_string()),
            CoordinatorError::NoAdapters | CoordinatorError::AnchorDisabled => {
                ApiError::Unavailable(err.to_string())
            }
            CoordinatorError::DuplicateId(_)
            | CoordinatorError::NotActive { .. }
            | CoordinatorError::NotReady { .. } => ApiError::Conflict(err.to_string()),
            CoordinatorError::NotFound(_) => ApiError::NotFound(err.to_string()),
            CoordinatorError::Analysis(e) => ApiError::Analysis(e),
            CoordinatorError::Common(e) => ApiError::Common(e),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
