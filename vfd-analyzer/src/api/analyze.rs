//! Analysis submission endpoints
//!
//! `POST /analyze` takes a multipart upload, `POST /analyze-url` a JSON body
//! naming a remote video. A cache hit answers 200 with the final result;
//! anything else answers 202 with the job reference and progress URLs.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{ApiError, ApiResult};
use crate::models::{AnalysisResult, AuditAnchorRecord, JobState, VideoFingerprint};
use crate::services::fingerprinter::append_bounded;
use crate::workflow::{Admission, Submission, VideoInput};
use crate::AppState;

/// Room for multipart framing and the small text fields
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Response to a submission
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub analysis_id: String,
    pub status: JobState,
    /// Served from the Result Cache
    pub cached: bool,
    /// Attached to another job's in-flight analysis
    pub coalesced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<VideoFingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    /// The cached result was computed for a different model set
    pub requested_models_mismatch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<AuditAnchorRecord>,
    pub progress_url: String,
    pub result_url: String,
}

impl AnalyzeResponse {
    fn from_admission(admission: Admission) -> (StatusCode, Self) {
        let (status_code, job, result, anchor) = match admission {
            Admission::Completed {
                job,
                result,
                anchor,
            } => (StatusCode::OK, job, Some(result), anchor),
            Admission::Accepted { job } => (StatusCode::ACCEPTED, job, None, None),
        };

        let id = job.analysis_id.to_string();
        let requested_models_mismatch = result
            .as_ref()
            .is_some_and(|r| r.model_set_differs(&job.requested_models));
        let response = Self {
            progress_url: format!("/progress/{}/events", id),
            result_url: format!("/result/{}", id),
            analysis_id: id,
            status: job.state,
            cached: result.is_some(),
            coalesced: job.coalesced,
            fingerprint: job.fingerprint,
            result,
            requested_models_mismatch,
            anchor,
        };
        (status_code, response)
    }
}

/// JSON body of `POST /analyze-url`
#[derive(Debug, Deserialize)]
pub struct AnalyzeUrlRequest {
    pub url: String,
    #[serde(default)]
    pub analysis_id: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub anchor: bool,
}

/// POST /analyze
///
/// Multipart fields: `file` (required), `analysis_id`, `models`
/// (comma-separated), `anchor` (`true`/`false`).
pub async fn analyze_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<AnalyzeResponse>)> {
    let max_bytes = state.config.limits.max_video_bytes;
    let mut upload: Option<(Option<String>, Vec<u8>)> = None;
    let mut analysis_id = None;
    let mut models = Vec::new();
    let mut anchor = false;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "video" => {
                let file_name = field.file_name().map(str::to_string);
                let mut bytes = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
                    append_bounded(&mut bytes, &chunk, max_bytes)?;
                }
                upload = Some((file_name, bytes));
            }
            "analysis_id" => {
                let text = field.text().await.map_err(bad_multipart)?;
                analysis_id = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            }
            "models" => {
                let text = field.text().await.map_err(bad_multipart)?;
                models.extend(split_models(&text));
            }
            "anchor" => {
                let text = field.text().await.map_err(bad_multipart)?;
                anchor = parse_flag(&text)?;
            }
            other => debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let (file_name, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("multipart field 'file' is required".into()))?;

    submit(
        &state,
        Submission {
            analysis_id,
            input: VideoInput::Upload { file_name, bytes },
            models,
            anchor,
        },
    )
    .await
}

/// POST /analyze-url
pub async fn analyze_url(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeUrlRequest>,
) -> ApiResult<(StatusCode, Json<AnalyzeResponse>)> {
    let models = request
        .models
        .iter()
        .flat_map(|m| split_models(m))
        .collect();

    submit(
        &state,
        Submission {
            analysis_id: request.analysis_id.filter(|s| !s.trim().is_empty()),
            input: VideoInput::Url(request.url),
            models,
            anchor: request.anchor,
        },
    )
    .await
}

async fn submit(
    state: &AppState,
    submission: Submission,
) -> ApiResult<(StatusCode, Json<AnalyzeResponse>)> {
    // detached so a client disconnect cannot strand a half-registered job
    let coordinator = state.coordinator.clone();
    let admission = tokio::spawn(async move { coordinator.submit(submission).await })
        .await
        .map_err(|e| {
            error!("Submission task failed: {}", e);
            ApiError::Internal(format!("submission task failed: {}", e))
        })??;

    let (status, response) = AnalyzeResponse::from_admission(admission);
    Ok((status, Json(response)))
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Invalid multipart body: {}", err))
}

/// Comma-separated model list; blanks dropped
fn split_models(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: &str) -> ApiResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" => Ok(false),
        "true" | "1" | "yes" => Ok(true),
        other => Err(ApiError::BadRequest(format!(
            "'anchor' must be true or false (got '{}')",
            other
        ))),
    }
}

/// Build submission routes; uploads may be as large as the video ceiling
pub fn analyze_routes(max_video_bytes: u64) -> Router<AppState> {
    let body_limit = max_video_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route(
            "/analyze",
            post(analyze_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/analyze-url", post(analyze_url))
}
