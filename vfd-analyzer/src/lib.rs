//! vfd-analyzer library interface
//!
//! Video deepfake analysis service: fingerprint-keyed result caching, a
//! fault-tolerant model ensemble, forensic metrics and audit anchoring,
//! exposed over HTTP with SSE/WebSocket progress.

pub mod adapters;
pub mod anchor;
pub mod api;
pub mod config;
pub mod db;
pub mod ensemble;
pub mod error;
pub mod forensics;
pub mod models;
pub mod services;
pub mod types;
pub mod utils;
pub mod workflow;

pub use crate::error::{AnalysisError, ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::AnalyzerConfig;
use crate::workflow::{JobCoordinator, ProgressBroadcaster};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AnalyzerConfig>,
    pub coordinator: Arc<JobCoordinator>,
    pub progress: Arc<ProgressBroadcaster>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(coordinator: Arc<JobCoordinator>) -> Self {
        let services = coordinator.services();
        Self {
            db: services.pool.clone(),
            config: services.config.clone(),
            progress: services.progress.clone(),
            coordinator,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let max_video_bytes = state.config.limits.max_video_bytes;

    Router::new()
        .merge(api::analyze_routes(max_video_bytes))
        .merge(api::result_routes())
        .merge(api::anchor_routes())
        .merge(api::progress_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
