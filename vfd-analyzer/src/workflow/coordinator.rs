//! Job Coordinator
//!
//! Drives every AnalysisJob through its state machine and enforces the
//! at-most-one-analysis-per-fingerprint rule.
//!
//! **Execution model:**
//! - each job runs as its own task; uploads are fingerprinted inline so a
//!   cache hit can be answered synchronously
//! - after fingerprinting, under the in-flight lock, a job either follows an
//!   existing [`Execution`] for the same digest (CACHE_HIT), is served from
//!   the Result Cache (CACHE_HIT), or starts a new Execution (RUNNING)
//! - an Execution runs once per digest in a separate task, holds one
//!   analysis slot, and is bounded by the job timeout; it writes the cache
//!   before leaving the in-flight map so a later arrival sees either the
//!   Execution or the cached result
//! - cancelling a job detaches it; an Execution with no observers left is
//!   cancelled at its next stage boundary and its result discarded

use chrono::Utc;
use reqwest::Url;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::AdapterRegistry;
use crate::anchor::{AnchorSubmitter, LedgerClient};
use crate::config::AnalyzerConfig;
use crate::db;
use crate::ensemble::EnsembleOrchestrator;
use crate::error::AnalysisError;
use crate::forensics::{self, FrameAnalysis};
use crate::models::{
    AnalysisId, AnalysisJob, AnalysisResult, AuditAnchorRecord, InputReference, JobState,
    ProcessingMetadata, VideoFingerprint,
};
use crate::services::media::spill_to_temp;
use crate::services::{
    Fingerprinter, FrameSpec, MediaToolkit, ResultCache, SqliteResultCache, VideoDownloader,
};
use crate::workflow::progress::{ProgressBroadcaster, ProgressSubscription};

/// Everything the coordinator needs from the rest of the service
pub struct PipelineServices {
    pub config: Arc<AnalyzerConfig>,
    pub pool: SqlitePool,
    pub cache: Arc<dyn ResultCache>,
    pub orchestrator: Arc<EnsembleOrchestrator>,
    pub media: Arc<dyn MediaToolkit>,
    pub downloader: VideoDownloader,
    pub anchor: Arc<AnchorSubmitter>,
    pub progress: Arc<ProgressBroadcaster>,
}

impl PipelineServices {
    /// Wire the standard services around a database pool
    ///
    /// The adapter registry, media toolkit and ledger are passed in so callers
    /// can substitute their own backends.
    pub fn assemble(
        config: AnalyzerConfig,
        pool: SqlitePool,
        registry: AdapterRegistry,
        media: Arc<dyn MediaToolkit>,
        ledger: Option<Arc<dyn LedgerClient>>,
    ) -> vfd_common::Result<Self> {
        let lock_wait_ms = config.limits.db_lock_wait_ms;
        let orchestrator = EnsembleOrchestrator::new(
            registry,
            config.fusion.clone(),
            config.concurrency.global_adapter_calls,
            config.concurrency.per_job_adapter_calls,
        );
        let downloader = VideoDownloader::new(
            config.limits.max_video_bytes,
            Duration::from_secs(config.limits.download_timeout_secs),
        )?;
        let anchor = AnchorSubmitter::new(ledger, pool.clone(), config.anchor.clone(), lock_wait_ms);

        Ok(Self {
            cache: Arc::new(SqliteResultCache::new(pool.clone(), lock_wait_ms)),
            orchestrator: Arc::new(orchestrator),
            media,
            downloader,
            anchor: Arc::new(anchor),
            progress: Arc::new(ProgressBroadcaster::new()),
            config: Arc::new(config),
            pool,
        })
    }
}

/// Video source of a submission
pub enum VideoInput {
    Upload {
        file_name: Option<String>,
        bytes: Vec<u8>,
    },
    Url(String),
}

pub struct Submission {
    /// Caller-supplied id, validated on submit
    pub analysis_id: Option<String>,
    pub input: VideoInput,
    /// Empty means every registered model
    pub models: Vec<String>,
    pub anchor: bool,
}

/// Outcome of a submission
#[derive(Debug)]
pub enum Admission {
    /// Served from the Result Cache before returning
    Completed {
        job: AnalysisJob,
        result: AnalysisResult,
        anchor: Option<AuditAnchorRecord>,
    },
    /// Accepted; progress and the terminal event follow on the stream
    Accepted { job: AnalysisJob },
}

/// Job plus whatever it produced
pub struct JobOutput {
    pub job: AnalysisJob,
    pub result: Option<AnalysisResult>,
    pub anchor: Option<AuditAnchorRecord>,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Unknown model(s): {0}")]
    UnknownModels(String),

    #[error("No model adapters are registered; retry later")]
    NoAdapters,

    #[error("analysis_id '{0}' is already in use")]
    DuplicateId(String),

    #[error("Analysis '{0}' not found")]
    NotFound(String),

    #[error("Analysis '{id}' already finished ({state})")]
    NotActive { id: String, state: JobState },

    #[error("Analysis '{id}' has no result ({state})")]
    NotReady { id: String, state: JobState },

    #[error("Audit anchoring is not configured")]
    AnchorDisabled,

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Common(#[from] vfd_common::Error),
}

struct JobEntry {
    job: AnalysisJob,
    cancel: CancellationToken,
}

#[derive(Debug, Clone)]
enum ExecutionStatus {
    /// Waiting for an analysis slot
    Waiting,
    Running,
    Aggregating,
    Finished(Result<AnalysisResult, AnalysisError>),
}

struct Observer {
    analysis_id: AnalysisId,
    leader: bool,
}

/// One in-flight analysis of a digest, shared by every job that wants it
struct Execution {
    digest: String,
    status: watch::Sender<ExecutionStatus>,
    observers: StdMutex<Vec<Observer>>,
    cancel: CancellationToken,
}

impl Execution {
    fn new(digest: &str, leader: &AnalysisId) -> Self {
        let (status, _) = watch::channel(ExecutionStatus::Waiting);
        Self {
            digest: digest.to_string(),
            status,
            observers: StdMutex::new(vec![Observer {
                analysis_id: leader.clone(),
                leader: true,
            }]),
            cancel: CancellationToken::new(),
        }
    }

    fn observers(&self) -> MutexGuard<'_, Vec<Observer>> {
        self.observers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn attach(&self, analysis_id: &AnalysisId) {
        self.observers().push(Observer {
            analysis_id: analysis_id.clone(),
            leader: false,
        });
    }

    /// Remove an observer, returning how many remain
    fn detach(&self, analysis_id: &AnalysisId) -> usize {
        let mut observers = self.observers();
        observers.retain(|o| &o.analysis_id != analysis_id);
        observers.len()
    }

    fn is_leader(&self, analysis_id: &AnalysisId) -> bool {
        self.observers()
            .iter()
            .any(|o| o.leader && &o.analysis_id == analysis_id)
    }

    /// Progress to every observer; followers keep reporting CACHE_HIT
    fn publish(&self, progress: &ProgressBroadcaster, stage: JobState, percent: u8, message: &str) {
        for observer in self.observers().iter() {
            let status = if observer.leader {
                stage
            } else {
                JobState::CacheHit
            };
            progress.publish(&observer.analysis_id, status, percent, message);
        }
    }

    fn checkpoint(&self) -> Result<(), AnalysisError> {
        if self.cancel.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

enum Route {
    CacheHit(AnalysisResult),
    Follow(Arc<Execution>),
    Lead(Arc<Execution>),
}

pub struct JobCoordinator {
    services: PipelineServices,
    fingerprinter: Fingerprinter,
    jobs: RwLock<HashMap<AnalysisId, JobEntry>>,
    inflight: Mutex<HashMap<String, Arc<Execution>>>,
    analysis_slots: Arc<Semaphore>,
    executions_started: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl JobCoordinator {
    pub fn new(services: PipelineServices) -> Self {
        let fingerprinter = Fingerprinter::new(services.config.limits.max_video_bytes);
        let analysis_slots = Arc::new(Semaphore::new(
            services.config.concurrency.max_concurrent_jobs.max(1),
        ));
        Self {
            services,
            fingerprinter,
            jobs: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            analysis_slots,
            executions_started: AtomicU64::new(0),
            last_error: RwLock::new(None),
        }
    }

    pub fn services(&self) -> &PipelineServices {
        &self.services
    }

    /// Number of analyses that reached RUNNING since startup
    pub fn executions_started(&self) -> u64 {
        self.executions_started.load(Ordering::SeqCst)
    }

    /// Most recent job failure other than cancellation
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    pub async fn active_jobs(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|e| !e.job.is_terminal())
            .count()
    }

    fn lock_wait_ms(&self) -> u64 {
        self.services.config.limits.db_lock_wait_ms
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    pub async fn submit(
        self: &Arc<Self>,
        submission: Submission,
    ) -> Result<Admission, CoordinatorError> {
        let registry = self.services.orchestrator.registry();
        if registry.is_empty() {
            return Err(CoordinatorError::NoAdapters);
        }
        let models = registry
            .resolve(&submission.models)
            .map_err(|unknown| CoordinatorError::UnknownModels(unknown.join(", ")))?;

        let analysis_id = match submission.analysis_id.as_deref() {
            Some(raw) => AnalysisId::parse(raw)?,
            None => AnalysisId::generate(),
        };

        enum Source {
            Bytes(Arc<Vec<u8>>),
            Remote(Url),
        }
        let (input, source) = match submission.input {
            VideoInput::Upload { file_name, bytes } => (
                InputReference::Upload {
                    file_name,
                    byte_length: bytes.len() as u64,
                },
                Source::Bytes(Arc::new(bytes)),
            ),
            VideoInput::Url(raw) => {
                let url = VideoDownloader::parse_url(&raw)?;
                (
                    InputReference::Url {
                        url: url.to_string(),
                    },
                    Source::Remote(url),
                )
            }
        };

        let job = AnalysisJob::new(analysis_id.clone(), input, models, submission.anchor);
        self.register(job.clone()).await?;
        self.services
            .progress
            .publish(&analysis_id, JobState::Queued, 0, "Queued for analysis");
        info!(
            analysis_id = %analysis_id,
            input = ?job.input,
            models = ?job.requested_models,
            anchor = job.anchor_requested,
            "Analysis accepted"
        );

        match source {
            Source::Remote(url) => {
                let this = Arc::clone(self);
                let id = analysis_id.clone();
                tokio::spawn(async move { this.drive_url(id, url).await });
                Ok(Admission::Accepted { job })
            }
            Source::Bytes(bytes) => {
                let routed = async {
                    let fingerprint = self.fingerprint_stage(&analysis_id, bytes.clone()).await?;
                    self.route(&analysis_id, &fingerprint, bytes).await
                }
                .await;

                match routed {
                    Err(e) => {
                        self.fail_job(&analysis_id, &e).await;
                        Err(e.into())
                    }
                    Ok(Route::CacheHit(result)) => match self.finish_job(&analysis_id, &result).await {
                        Ok((job, anchor)) => Ok(Admission::Completed {
                            job,
                            result,
                            anchor,
                        }),
                        Err(e) => {
                            self.fail_job(&analysis_id, &e).await;
                            Err(e.into())
                        }
                    },
                    Ok(route) => {
                        let snapshot = self.snapshot(&analysis_id).await.unwrap_or(job);
                        let this = Arc::clone(self);
                        let id = analysis_id.clone();
                        tokio::spawn(async move { this.await_route(id, route).await });
                        Ok(Admission::Accepted { job: snapshot })
                    }
                }
            }
        }
    }

    async fn register(&self, job: AnalysisJob) -> Result<(), CoordinatorError> {
        let mut jobs = self.jobs.write().await;
        let id = job.analysis_id.clone();
        if jobs.contains_key(&id)
            || db::jobs::load_job(&self.services.pool, &id).await?.is_some()
        {
            return Err(CoordinatorError::DuplicateId(id.to_string()));
        }
        self.persist(&job).await;
        jobs.insert(
            id,
            JobEntry {
                job,
                cancel: CancellationToken::new(),
            },
        );
        Ok(())
    }

    async fn drive_url(self: Arc<Self>, id: AnalysisId, url: Url) {
        let routed = async {
            self.checkpoint(&id).await?;
            self.services
                .progress
                .publish(&id, JobState::Queued, 5, "Downloading video");
            let bytes = Arc::new(self.services.downloader.fetch(&url).await?);
            debug!(analysis_id = %id, bytes = bytes.len(), "Download complete");
            let fingerprint = self.fingerprint_stage(&id, bytes.clone()).await?;
            self.route(&id, &fingerprint, bytes).await
        }
        .await;

        match routed {
            Ok(route) => self.await_route(id, route).await,
            Err(e) => self.fail_job(&id, &e).await,
        }
    }

    async fn fingerprint_stage(
        &self,
        id: &AnalysisId,
        bytes: Arc<Vec<u8>>,
    ) -> Result<VideoFingerprint, AnalysisError> {
        self.checkpoint(id).await?;
        self.transition(id, JobState::Fingerprinting, 10, "Computing content fingerprint")
            .await?;

        let fingerprint = self.fingerprinter.fingerprint(bytes).await?;
        let recorded = fingerprint.clone();
        self.update(id, move |job| {
            job.fingerprint = Some(recorded);
            Ok(())
        })
        .await?;

        info!(analysis_id = %id, fingerprint = %fingerprint.short(), bytes = fingerprint.byte_length, "Fingerprint computed");
        Ok(fingerprint)
    }

    /// Follow, hit the cache, or lead a new Execution
    async fn route(
        self: &Arc<Self>,
        id: &AnalysisId,
        fingerprint: &VideoFingerprint,
        bytes: Arc<Vec<u8>>,
    ) -> Result<Route, AnalysisError> {
        self.checkpoint(id).await?;
        let mut inflight = self.inflight.lock().await;

        if let Some(execution) = inflight.get(fingerprint.key()) {
            if !execution.cancel.is_cancelled() {
                execution.attach(id);
                let execution = Arc::clone(execution);
                drop(inflight);

                self.update(id, |job| {
                    job.coalesced = true;
                    job.transition_to(JobState::CacheHit).map(|_| ())
                })
                .await?;
                self.services.progress.publish(
                    id,
                    JobState::CacheHit,
                    15,
                    "Identical content is already being analyzed; waiting for its result",
                );
                info!(analysis_id = %id, fingerprint = %fingerprint.short(), "Coalesced onto in-flight analysis");
                return Ok(Route::Follow(execution));
            }
        }

        if let Some(result) = self.services.cache.get(fingerprint.key()).await? {
            drop(inflight);
            self.transition(id, JobState::CacheHit, 90, "Served from result cache")
                .await?;
            info!(analysis_id = %id, fingerprint = %fingerprint.short(), "Result cache hit");
            return Ok(Route::CacheHit(result));
        }

        let execution = Arc::new(Execution::new(fingerprint.key(), id));
        inflight.insert(fingerprint.key().to_string(), Arc::clone(&execution));
        drop(inflight);

        let models = self
            .snapshot(id)
            .await
            .map(|job| job.requested_models)
            .unwrap_or_default();
        self.spawn_execution(Arc::clone(&execution), bytes, fingerprint.clone(), models);
        Ok(Route::Lead(execution))
    }

    async fn await_route(&self, id: AnalysisId, route: Route) {
        let outcome = match route {
            Route::CacheHit(result) => Ok(result),
            Route::Follow(execution) | Route::Lead(execution) => {
                self.observe(&id, &execution).await
            }
        };

        let finished = match outcome {
            Ok(result) => self.finish_job(&id, &result).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = finished {
            self.fail_job(&id, &e).await;
        }
    }

    /// Wait on an Execution, mirroring its stages onto a leading job
    async fn observe(
        &self,
        id: &AnalysisId,
        execution: &Arc<Execution>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let cancel = self.cancel_token(id).await?;
        let leader = execution.is_leader(id);
        let mut status = execution.status.subscribe();

        loop {
            let current = status.borrow_and_update().clone();
            match current {
                ExecutionStatus::Finished(outcome) => return outcome,
                ExecutionStatus::Running if leader => {
                    self.advance_leader(id, JobState::Running).await?
                }
                ExecutionStatus::Aggregating if leader => {
                    self.advance_leader(id, JobState::Aggregating).await?
                }
                _ => {}
            }

            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(AnalysisError::Storage(
                            "analysis task ended without a result".to_string(),
                        ));
                    }
                }
                _ = cancel.cancelled() => {
                    self.detach(execution, id).await;
                    return Err(AnalysisError::Cancelled);
                }
            }
        }
    }

    async fn detach(&self, execution: &Execution, id: &AnalysisId) {
        let _inflight = self.inflight.lock().await;
        if execution.detach(id) == 0 {
            debug!(analysis_id = %id, "Last observer left; cancelling analysis");
            execution.cancel.cancel();
        }
    }

    /// Step a leading job forward to `target` (RUNNING or AGGREGATING)
    async fn advance_leader(&self, id: &AnalysisId, target: JobState) -> Result<(), AnalysisError> {
        let before = self.snapshot(id).await.map(|job| job.state);
        self.update(id, |job| advance_to(job, target)).await?;
        if before.is_some_and(|state| state.rank() < target.rank()) {
            info!(analysis_id = %id, state = %target, "Stage entered");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Execution (once per digest)
    // ------------------------------------------------------------------

    fn spawn_execution(
        self: &Arc<Self>,
        execution: Arc<Execution>,
        bytes: Arc<Vec<u8>>,
        fingerprint: VideoFingerprint,
        models: Vec<String>,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.execute(&execution, bytes, &fingerprint, &models).await;

            {
                let mut inflight = this.inflight.lock().await;
                if inflight
                    .get(&execution.digest)
                    .is_some_and(|current| Arc::ptr_eq(current, &execution))
                {
                    inflight.remove(&execution.digest);
                }
            }

            match &outcome {
                Ok(result) => debug!(
                    fingerprint = %fingerprint.short(),
                    label = ?result.verdict.label,
                    "Analysis execution finished"
                ),
                Err(e) => warn!(fingerprint = %fingerprint.short(), error = %e, "Analysis execution failed"),
            }
            execution.status.send_replace(ExecutionStatus::Finished(outcome));
        });
    }

    async fn execute(
        &self,
        execution: &Execution,
        bytes: Arc<Vec<u8>>,
        fingerprint: &VideoFingerprint,
        models: &[String],
    ) -> Result<AnalysisResult, AnalysisError> {
        let progress = &self.services.progress;

        let _slot = match Arc::clone(&self.analysis_slots).try_acquire_owned() {
            Ok(slot) => slot,
            Err(_) => {
                execution.publish(progress, JobState::Fingerprinting, 12, "Waiting for an analysis slot");
                tokio::select! {
                    slot = Arc::clone(&self.analysis_slots).acquire_owned() => slot.map_err(|_| {
                        AnalysisError::Storage("analysis slots closed".to_string())
                    })?,
                    _ = execution.cancel.cancelled() => return Err(AnalysisError::Cancelled),
                }
            }
        };

        self.executions_started.fetch_add(1, Ordering::SeqCst);
        execution.status.send_replace(ExecutionStatus::Running);
        execution.publish(progress, JobState::Running, 20, "Extracting frames");

        let timeout_secs = self.services.config.limits.job_timeout_secs;
        match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.analyze(execution, bytes, fingerprint, models),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(fingerprint = %fingerprint.short(), timeout_secs, "Analysis exceeded job deadline");
                Err(AnalysisError::JobTimeout { timeout_secs })
            }
        }
    }

    async fn analyze(
        &self,
        execution: &Execution,
        bytes: Arc<Vec<u8>>,
        fingerprint: &VideoFingerprint,
        models: &[String],
    ) -> Result<AnalysisResult, AnalysisError> {
        let started = Instant::now();
        let limits = &self.services.config.limits;
        let progress = &self.services.progress;
        let media = &self.services.media;

        let video = spill_to_temp(bytes).await?;
        let info = media.probe(video.path()).await?;
        let spec = FrameSpec {
            count: limits.frame_count,
            width: limits.frame_width,
            height: limits.frame_height,
        };
        let sample = Arc::new(media.extract_frames(video.path(), &info, spec).await?);
        execution.checkpoint()?;

        execution.publish(
            progress,
            JobState::Running,
            30,
            &format!("Sampled {} frames; scoring with {} model(s)", sample.len(), models.len()),
        );

        let frame_task = tokio::task::spawn_blocking({
            let sample = Arc::clone(&sample);
            move || FrameAnalysis::from_sample(&sample)
        });

        let (ensemble, audio) = tokio::join!(
            self.services
                .orchestrator
                .fuse(Arc::clone(&sample), models, |done, total| {
                    let percent = 30 + (50 * done / total.max(1)) as u8;
                    execution.publish(
                        progress,
                        JobState::Running,
                        percent,
                        &format!("Model scores received ({}/{})", done, total),
                    );
                }),
            media.extract_audio(video.path(), &info)
        );
        let ensemble = ensemble?;
        let frames = frame_task
            .await
            .map_err(|e| AnalysisError::Storage(format!("frame analysis task failed: {}", e)))?;
        execution.checkpoint()?;

        execution.status.send_replace(ExecutionStatus::Aggregating);
        execution.publish(progress, JobState::Aggregating, 85, "Deriving forensic metrics");

        let audio_analysis = audio
            .as_ref()
            .map(|track| forensics::audio::analyze(track, info.duration_secs));
        let metrics = forensics::derive(
            &frames,
            &ensemble.verdict,
            &ensemble.scores,
            audio_analysis.as_ref(),
        );

        let (frame_width, frame_height) = sample.dimensions();
        let result = AnalysisResult {
            fingerprint: fingerprint.clone(),
            verdict: ensemble.verdict,
            forensics: metrics,
            model_scores: ensemble.scores,
            metadata: ProcessingMetadata {
                requested_models: models.to_vec(),
                frames_analyzed: frames.frames_analyzed,
                frame_width,
                frame_height,
                audio_track_present: audio.is_some(),
                processing_ms: started.elapsed().as_millis() as u64,
                analyzed_at: Utc::now(),
                service_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        // discard before it can reach the cache
        execution.checkpoint()?;
        execution.publish(progress, JobState::Aggregating, 90, "Caching result");
        self.services.cache.put(&result).await?;
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Terminal transitions
    // ------------------------------------------------------------------

    async fn finish_job(
        &self,
        id: &AnalysisId,
        result: &AnalysisResult,
    ) -> Result<(AnalysisJob, Option<AuditAnchorRecord>), AnalysisError> {
        self.checkpoint(id).await?;
        let job = self
            .update(id, |job| match job.state {
                JobState::Fingerprinting | JobState::Running => {
                    advance_to(job, JobState::Aggregating)
                }
                _ => Ok(()),
            })
            .await?;

        if result.model_set_differs(&job.requested_models) {
            info!(
                analysis_id = %id,
                requested = ?job.requested_models,
                analyzed = ?result.metadata.requested_models,
                "Serving result computed for a different model set"
            );
        }
        let anchor = self.anchor_for(&job, result).await;

        let result_ref = result.cache_key().to_string();
        let job = self.update(id, move |job| job.complete(result_ref).map(|_| ())).await?;
        self.services.progress.complete(id, result);

        info!(
            analysis_id = %id,
            fingerprint = %result.fingerprint.short(),
            label = ?result.verdict.label,
            fake_probability = result.verdict.fake_probability,
            degraded = result.verdict.degraded,
            coalesced = job.coalesced,
            duration_ms = job.total_duration_ms(),
            "Analysis complete"
        );
        Ok((job, anchor))
    }

    async fn anchor_for(&self, job: &AnalysisJob, result: &AnalysisResult) -> Option<AuditAnchorRecord> {
        let anchor = &self.services.anchor;
        if !(job.anchor_requested || anchor.auto_submit()) {
            return None;
        }
        if !anchor.is_enabled() {
            warn!(analysis_id = %job.analysis_id, "Anchor requested but no ledger endpoint configured");
            return None;
        }

        self.services.progress.publish(
            &job.analysis_id,
            job.state,
            95,
            "Submitting audit anchor",
        );
        match anchor.submit(&job.analysis_id, result).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(analysis_id = %job.analysis_id, error = %e, "Audit anchor skipped");
                None
            }
        }
    }

    async fn fail_job(&self, id: &AnalysisId, err: &AnalysisError) {
        let mut newly_failed = false;
        let updated = self
            .update(id, |job| {
                if !job.is_terminal() {
                    job.fail(err)?;
                    newly_failed = true;
                }
                Ok(())
            })
            .await;

        match updated {
            Ok(_) if newly_failed => {
                self.services.progress.error(id, err.to_body());
                if !matches!(err, AnalysisError::Cancelled) {
                    *self.last_error.write().await = Some(format!("{}: {}", id, err));
                }
                match err {
                    AnalysisError::Cancelled => info!(analysis_id = %id, "Analysis cancelled"),
                    AnalysisError::CacheConflict { .. } => {
                        error!(analysis_id = %id, error = %err, "Cache invariant violated")
                    }
                    _ => error!(analysis_id = %id, code = err.code(), error = %err, "Analysis failed"),
                }
            }
            Ok(_) => debug!(analysis_id = %id, "Job already terminal; failure not recorded"),
            Err(e) => error!(analysis_id = %id, error = %e, "Could not record job failure"),
        }
    }

    // ------------------------------------------------------------------
    // Job registry
    // ------------------------------------------------------------------

    /// Apply a mutation and persist the new snapshot
    async fn update<F>(&self, id: &AnalysisId, mutate: F) -> Result<AnalysisJob, AnalysisError>
    where
        F: FnOnce(&mut AnalysisJob) -> Result<(), AnalysisError>,
    {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| AnalysisError::Storage(format!("job {} not in registry", id)))?;
        mutate(&mut entry.job)?;
        let snapshot = entry.job.clone();
        // persisted under the lock so snapshots land in order
        self.persist(&snapshot).await;
        Ok(snapshot)
    }

    async fn transition(
        &self,
        id: &AnalysisId,
        next: JobState,
        percent: u8,
        message: &str,
    ) -> Result<(), AnalysisError> {
        self.update(id, |job| job.transition_to(next).map(|_| ()))
            .await?;
        self.services.progress.publish(id, next, percent, message);
        info!(analysis_id = %id, state = %next, "Stage entered");
        Ok(())
    }

    async fn persist(&self, job: &AnalysisJob) {
        if let Err(e) = db::jobs::save_job(&self.services.pool, job, self.lock_wait_ms()).await {
            warn!(analysis_id = %job.analysis_id, error = %e, "Failed to persist job snapshot");
        }
    }

    async fn snapshot(&self, id: &AnalysisId) -> Option<AnalysisJob> {
        self.jobs.read().await.get(id).map(|e| e.job.clone())
    }

    async fn cancel_token(&self, id: &AnalysisId) -> Result<CancellationToken, AnalysisError> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|e| e.cancel.clone())
            .ok_or_else(|| AnalysisError::Storage(format!("job {} not in registry", id)))
    }

    /// Stage-boundary cancellation check
    async fn checkpoint(&self, id: &AnalysisId) -> Result<(), AnalysisError> {
        if self.cancel_token(id).await?.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries and control
    // ------------------------------------------------------------------

    /// Current job record, from memory or the database
    pub async fn status(&self, id: &AnalysisId) -> Result<AnalysisJob, CoordinatorError> {
        if let Some(job) = self.snapshot(id).await {
            return Ok(job);
        }
        db::jobs::load_job(&self.services.pool, id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))
    }

    /// Job with its cached result and latest anchor record
    pub async fn output(&self, id: &AnalysisId) -> Result<JobOutput, CoordinatorError> {
        let job = self.status(id).await?;
        let Some(result_ref) = job.result_ref.clone() else {
            return Ok(JobOutput {
                job,
                result: None,
                anchor: None,
            });
        };

        let result = self.services.cache.get(&result_ref).await?;
        let anchor = self.services.anchor.latest(&result_ref).await?;
        Ok(JobOutput {
            job,
            result,
            anchor,
        })
    }

    /// Subscribe to a job's progress
    ///
    /// When the broadcaster holds nothing for the job (its channel was pruned,
    /// or the job predates this process) the last event is rebuilt from the
    /// stored job first, so a finished job always replays its terminal event.
    pub async fn subscribe(&self, id: &AnalysisId) -> ProgressSubscription {
        let progress = &self.services.progress;
        if progress.last_event(id).is_none() {
            match self.output(id).await {
                Ok(output) => self.restore_progress(output),
                Err(CoordinatorError::NotFound(_)) => {}
                Err(e) => warn!(analysis_id = %id, error = %e, "Could not restore progress state"),
            }
        }
        progress.subscribe(id)
    }

    fn restore_progress(&self, output: JobOutput) {
        let progress = &self.services.progress;
        let JobOutput { job, result, .. } = output;
        let id = &job.analysis_id;
        debug!(analysis_id = %id, state = %job.state, "Restoring progress from stored job");

        match job.state {
            JobState::Complete => match result {
                Some(result) => progress.complete(id, &result),
                None => progress.error(
                    id,
                    AnalysisError::Storage(format!(
                        "cached result {} missing",
                        job.result_ref.as_deref().unwrap_or("(none)")
                    ))
                    .to_body(),
                ),
            },
            JobState::Failed | JobState::Cancelled => {
                let body = job.failure.clone().unwrap_or_else(|| {
                    if job.state == JobState::Cancelled {
                        AnalysisError::Cancelled.to_body()
                    } else {
                        AnalysisError::Storage("failure reason not recorded".to_string()).to_body()
                    }
                });
                progress.error(id, body);
            }
            state => progress.publish(id, state, stage_percent(state), "In progress"),
        }
    }

    /// Request cooperative cancellation
    pub async fn cancel(&self, id: &AnalysisId) -> Result<AnalysisJob, CoordinatorError> {
        {
            let jobs = self.jobs.read().await;
            if let Some(entry) = jobs.get(id) {
                if entry.job.is_terminal() {
                    return Err(CoordinatorError::NotActive {
                        id: id.to_string(),
                        state: entry.job.state,
                    });
                }
                entry.cancel.cancel();
                info!(analysis_id = %id, state = %entry.job.state, "Cancellation requested");
                return Ok(entry.job.clone());
            }
        }

        let job = self.status(id).await?;
        Err(CoordinatorError::NotActive {
            id: id.to_string(),
            state: job.state,
        })
    }

    /// Anchor a completed job's result on demand
    pub async fn anchor(&self, id: &AnalysisId) -> Result<AuditAnchorRecord, CoordinatorError> {
        if !self.services.anchor.is_enabled() {
            return Err(CoordinatorError::AnchorDisabled);
        }
        let job = self.status(id).await?;
        let not_ready = || CoordinatorError::NotReady {
            id: id.to_string(),
            state: job.state,
        };
        if job.state != JobState::Complete {
            return Err(not_ready());
        }
        let result_ref = job.result_ref.as_deref().ok_or_else(not_ready)?;
        let result = self.services.cache.get(result_ref).await?.ok_or_else(|| {
            AnalysisError::Storage(format!("cached result {} missing", result_ref))
        })?;

        Ok(self.services.anchor.submit(id, &result).await?)
    }

    /// Forget finished jobs and progress channels older than `retention`
    ///
    /// Finished jobs stay queryable through the database.
    pub async fn sweep(&self, retention: Duration) -> (usize, usize) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        let jobs_pruned = {
            let mut jobs = self.jobs.write().await;
            let before = jobs.len();
            jobs.retain(|_, e| e.job.completed_at.map_or(true, |done| done > cutoff));
            before - jobs.len()
        };
        let channels_pruned = self.services.progress.prune(retention);
        if jobs_pruned + channels_pruned > 0 {
            debug!(jobs_pruned, channels_pruned, "Swept finished jobs");
        }
        (jobs_pruned, channels_pruned)
    }

    /// Periodic sweeper using the configured retention window
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let retention = Duration::from_secs(self.services.config.limits.progress_retention_secs);
        let period = (retention / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                this.sweep(retention).await;
            }
        })
    }
}

/// Walk RUNNING → AGGREGATING as far as `target`, skipping reached stages
fn advance_to(job: &mut AnalysisJob, target: JobState) -> Result<(), AnalysisError> {
    for stage in [JobState::Running, JobState::Aggregating] {
        if stage.rank() <= target.rank() && job.state.rank() < stage.rank() {
            job.transition_to(stage)?;
        }
    }
    Ok(())
}

/// Nominal progress at the start of each working stage
fn stage_percent(state: JobState) -> u8 {
    match state {
        JobState::Queued => 0,
        JobState::Fingerprinting => 10,
        JobState::CacheHit => 15,
        JobState::Running => 30,
        JobState::Aggregating => 90,
        JobState::Complete | JobState::Failed | JobState::Cancelled => 100,
    }
}
