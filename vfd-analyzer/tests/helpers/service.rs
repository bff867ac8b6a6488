//! In-memory service assembly for pipeline and API tests

use axum::Router;
use futures::StreamExt;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use vfd_analyzer::adapters::AdapterRegistry;
use vfd_analyzer::anchor::LedgerClient;
use vfd_analyzer::config::AnalyzerConfig;
use vfd_analyzer::models::{AnalysisId, AnalysisJob};
use vfd_analyzer::types::ScoreAdapter;
use vfd_analyzer::workflow::{
    Admission, JobCoordinator, PipelineServices, ProgressEvent, Submission, VideoInput,
};
use vfd_analyzer::{build_router, db, AppState};

use super::stubs::{StubAdapter, StubMedia};

pub struct TestService {
    pub coordinator: Arc<JobCoordinator>,
    pub pool: SqlitePool,
    pub app: Router,
}

/// Small frames and fast retries so tests stay quick
pub fn test_config() -> AnalyzerConfig {
    let mut config = AnalyzerConfig::default();
    config.limits.frame_count = 4;
    config.limits.frame_width = 32;
    config.limits.frame_height = 32;
    config.limits.max_video_bytes = 1024 * 1024;
    config.anchor.initial_backoff_ms = 1;
    config
}

pub async fn build_service(
    config: AnalyzerConfig,
    adapters: &[Arc<StubAdapter>],
    media: StubMedia,
    ledger: Option<Arc<dyn LedgerClient>>,
) -> TestService {
    let pool = db::init_memory_pool().await.unwrap();

    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry.register(Arc::clone(adapter) as Arc<dyn ScoreAdapter>);
    }

    let services =
        PipelineServices::assemble(config, pool.clone(), registry, Arc::new(media), ledger)
            .unwrap();
    let coordinator = Arc::new(JobCoordinator::new(services));
    let app = build_router(AppState::new(Arc::clone(&coordinator)));

    TestService {
        coordinator,
        pool,
        app,
    }
}

pub fn upload(bytes: &[u8]) -> Submission {
    Submission {
        analysis_id: None,
        input: VideoInput::Upload {
            file_name: Some("clip.mp4".to_string()),
            bytes: bytes.to_vec(),
        },
        models: Vec::new(),
        anchor: false,
    }
}

pub fn admitted_job(admission: &Admission) -> &AnalysisJob {
    match admission {
        Admission::Completed { job, .. } | Admission::Accepted { job } => job,
    }
}

/// Wait for a job's terminal progress event
pub async fn wait_terminal(coordinator: &JobCoordinator, id: &AnalysisId) -> ProgressEvent {
    let events = coordinator.subscribe(id).await.into_stream();
    futures::pin_mut!(events);

    tokio::time::timeout(Duration::from_secs(10), async {
        let mut last = None;
        while let Some(event) = events.next().await {
            last = Some(event);
        }
        last
    })
    .await
    .expect("job did not finish in time")
    .expect("progress stream ended without events")
}

/// Synthetic video bytes; distinct seeds give distinct fingerprints
pub fn video_bytes(seed: u8) -> Vec<u8> {
    let mut bytes = b"synthetic-video-".to_vec();
    bytes.extend((0..4096u32).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)));
    bytes
}
