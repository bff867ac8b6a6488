//! Explicit audit anchor submission

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::models::{AnalysisId, AuditAnchorRecord};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AnchorRequest {
    pub analysis_id: String,
}

/// POST /blockchain/submit
///
/// Anchors a COMPLETE job's result. An already-submitted anchor is returned
/// as is; a failed submission still answers 200 with `status: "failed"`.
pub async fn submit_anchor(
    State(state): State<AppState>,
    Json(request): Json<AnchorRequest>,
) -> ApiResult<Json<AuditAnchorRecord>> {
    let id = AnalysisId::parse(&request.analysis_id)?;
    let record = state.coordinator.anchor(&id).await?;
    Ok(Json(record))
}

pub fn anchor_routes() -> Router<AppState> {
    Router::new().route("/blockchain/submit", post(submit_anchor))
}
