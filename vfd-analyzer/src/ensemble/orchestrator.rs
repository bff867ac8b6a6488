//! Ensemble Orchestrator
//!
//! Fans one FrameSample out to the requested adapters, collects their
//! ModelScores and applies the fusion policy.
//!
//! Every adapter call runs as its own task holding a per-job and a global
//! permit. If the job stops waiting (timeout or cancellation) the calls keep
//! running to completion and their results are simply dropped.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::adapters::{self, AdapterRegistry};
use crate::config::FusionConfig;
use crate::ensemble::fusion::FusionPolicy;
use crate::error::AnalysisError;
use crate::models::{EnsembleVerdict, ModelScore};
use crate::types::SharedFrameSample;

/// Verdict plus the raw scores it was fused from
#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    pub verdict: EnsembleVerdict,
    /// Sorted by model name
    pub scores: Vec<ModelScore>,
}

pub struct EnsembleOrchestrator {
    registry: AdapterRegistry,
    policy: FusionPolicy,
    global_calls: Arc<Semaphore>,
    per_job_calls: usize,
}

impl EnsembleOrchestrator {
    pub fn new(
        registry: AdapterRegistry,
        fusion: FusionConfig,
        global_calls: usize,
        per_job_calls: usize,
    ) -> Self {
        let policy = FusionPolicy::new(fusion, registry.kinds());
        Self {
            registry,
            policy,
            global_calls: Arc::new(Semaphore::new(global_calls.max(1))),
            per_job_calls: per_job_calls.max(1),
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &FusionPolicy {
        &self.policy
    }

    /// Score `sample` with every requested model and fuse
    ///
    /// `on_score(done, total)` is called after each adapter finishes.
    pub async fn fuse<F>(
        &self,
        sample: SharedFrameSample,
        requested: &[String],
        mut on_score: F,
    ) -> Result<EnsembleOutcome, AnalysisError>
    where
        F: FnMut(usize, usize) + Send,
    {
        let total = requested.len();
        let job_calls = Arc::new(Semaphore::new(self.per_job_calls));
        let mut pending = FuturesUnordered::new();
        let mut scores = Vec::with_capacity(total);

        for model in requested {
            let Some(adapter) = self.registry.get(model) else {
                warn!(model = %model, "Requested model is not registered");
                scores.push(ModelScore::failure(
                    model.clone(),
                    "ADAPTER_ERROR",
                    "model not registered",
                    0,
                ));
                continue;
            };

            let sample = Arc::clone(&sample);
            let job_calls = Arc::clone(&job_calls);
            let global_calls = Arc::clone(&self.global_calls);
            let model = model.clone();

            let handle = tokio::spawn(async move {
                let _job_permit = job_calls.acquire_owned().await;
                let _global_permit = global_calls.acquire_owned().await;
                adapters::score(adapter.as_ref(), &sample).await
            });
            pending.push(async move {
                handle.await.unwrap_or_else(|e| {
                    ModelScore::failure(model, "ADAPTER_ERROR", format!("adapter task failed: {}", e), 0)
                })
            });
        }

        let mut done = scores.len();
        if done > 0 {
            on_score(done, total);
        }
        while let Some(score) = pending.next().await {
            debug!(
                model = %score.model,
                ok = score.is_success(),
                latency_ms = score.latency_ms,
                "Adapter finished"
            );
            scores.push(score);
            done += 1;
            on_score(done, total);
        }

        scores.sort_by(|a, b| a.model.cmp(&b.model));
        let verdict = self.policy.fuse(requested, &scores)?;

        info!(
            fake_probability = verdict.fake_probability,
            confidence = verdict.confidence,
            label = ?verdict.label,
            contributing = verdict.contributing_models.len(),
            degraded = verdict.degraded,
            "Ensemble fused"
        );

        Ok(EnsembleOutcome { verdict, scores })
    }
}
