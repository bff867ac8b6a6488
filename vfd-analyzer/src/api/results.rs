//! Job status, result retrieval and cancellation

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::{ApiResult, ErrorBody};
use crate::models::{AnalysisId, AnalysisJob, AnalysisResult, AuditAnchorRecord, JobState};
use crate::workflow::ProgressEvent;
use crate::AppState;

/// GET /status/{analysis_id} response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub job: AnalysisJob,
    /// Most recent progress event still retained for the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<ProgressEvent>,
}

/// GET /result/{analysis_id} response
#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub analysis_id: String,
    pub status: JobState,
    pub coalesced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    /// The result was computed for a different model set than this job asked for
    pub requested_models_mismatch: bool,
    /// Latest anchor record for the result, if anchoring was attempted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<AuditAnchorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub analysis_id: String,
    pub status: JobState,
    pub cancel_requested: bool,
}

/// GET /status/{analysis_id}
pub async fn get_status(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let id = AnalysisId::parse(&raw_id)?;
    let job = state.coordinator.status(&id).await?;
    let last_event = state.progress.last_event(&id);
    Ok(Json(StatusResponse { job, last_event }))
}

/// GET /result/{analysis_id}
///
/// Answers for jobs in any state; `result` is present once COMPLETE.
pub async fn get_result(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<ResultResponse>> {
    let id = AnalysisId::parse(&raw_id)?;
    let output = state.coordinator.output(&id).await?;
    let job = output.job;

    let requested_models_mismatch = output
        .result
        .as_ref()
        .is_some_and(|r| r.model_set_differs(&job.requested_models));

    Ok(Json(ResultResponse {
        requested_models_mismatch,
        analysis_id: job.analysis_id.to_string(),
        status: job.state,
        coalesced: job.coalesced,
        total_duration_ms: job.total_duration_ms(),
        error: job.failure,
        result: output.result,
        anchor: output.anchor,
    }))
}

/// POST /cancel/{analysis_id}
pub async fn cancel_analysis(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    let id = AnalysisId::parse(&raw_id)?;
    let job = state.coordinator.cancel(&id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            analysis_id: job.analysis_id.to_string(),
            status: job.state,
            cancel_requested: true,
        }),
    ))
}

/// Build status/result/cancel routes
pub fn result_routes() -> Router<AppState> {
    Router::new()
        .route("/status/:analysis_id", get(get_status))
        .route("/result/:analysis_id", get(get_result))
        .route("/cancel/:analysis_id", post(cancel_analysis))
}
