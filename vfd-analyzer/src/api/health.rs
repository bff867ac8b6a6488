//! Health check endpoint
//!
//! Uptime, build identification, registered models and the last job failure.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::config::SERVICE_NAME;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the database or every model adapter is unavailable
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    pub uptime_seconds: u64,
    pub database: String,
    /// Registered model adapters
    pub models: Vec<String>,
    pub active_jobs: usize,
    /// Analyses started since startup (coalesced and cached jobs excluded)
    pub executions_started: u64,
    pub anchoring_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let services = state.coordinator.services();
    let models = services.orchestrator.registry().names();
    let database_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();

    Json(HealthResponse {
        status: if models.is_empty() || !database_ok {
            "degraded"
        } else {
            "ok"
        }
        .to_string(),
        module: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        database: if database_ok { "ok" } else { "unreachable" }.to_string(),
        models,
        active_jobs: state.coordinator.active_jobs().await,
        executions_started: state.coordinator.executions_started(),
        anchoring_enabled: services.anchor.is_enabled(),
        last_error: state.coordinator.last_error().await,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
