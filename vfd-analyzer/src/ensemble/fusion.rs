//! Ensemble fusion policy
//!
//! Pure function of the ModelScore set: scores are sorted by model name
//! before aggregation, so adapter completion order never changes the verdict.
//!
//! Policy (stamped as [`FUSION_POLICY_VERSION`] on every verdict):
//! 1. Zero usable scores → `EnsembleUnavailable`
//! 2. Fused probability = weighted mean of usable scores
//!    (`equal_mean`: all weights 1; `weighted_mean`: configured table, missing
//!    models 1; `confidence_weighted`: each model's own decisiveness)
//! 3. Confidence from the configured calibration, capped when degraded
//!    (fewer models than requested) and further when only the semantic
//!    scorer contributed
//! 4. Label: SUSPICIOUS inside the band when confidence is below the
//!    threshold, otherwise FAKE at p >= 0.5, else AUTHENTIC

use std::collections::{BTreeMap, BTreeSet};

use crate::config::FusionConfig;
use crate::ensemble::calibration;
use crate::error::AnalysisError;
use crate::models::{EnsembleVerdict, FusionMethod, ModelScore, VerdictLabel};
use crate::types::ModelKind;

/// Bump whenever any rule above changes
pub const FUSION_POLICY_VERSION: &str = "fusion-v1";

/// Floor for confidence-weighted fusion so undecided models still count
const MIN_DECISIVENESS_WEIGHT: f64 = 0.05;

/// Fusion policy bound to a model registry
#[derive(Debug, Clone)]
pub struct FusionPolicy {
    config: FusionConfig,
    kinds: BTreeMap<String, ModelKind>,
}

impl FusionPolicy {
    pub fn new(config: FusionConfig, kinds: BTreeMap<String, ModelKind>) -> Self {
        Self { config, kinds }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse `scores` for a request that asked for `requested` models
    pub fn fuse(
        &self,
        requested: &[String],
        scores: &[ModelScore],
    ) -> Result<EnsembleVerdict, AnalysisError> {
        let mut usable: Vec<(&str, f64)> = scores
            .iter()
            .filter(|s| s.is_success())
            .filter_map(|s| s.fake_probability.map(|p| (s.model.as_str(), p)))
            .collect();
        usable.sort_by(|a, b| a.0.cmp(b.0));
        usable.dedup_by(|a, b| a.0 == b.0);

        let requested_set: BTreeSet<&str> = requested
            .iter()
            .map(String::as_str)
            .chain(scores.iter().map(|s| s.model.as_str()))
            .collect();

        if usable.is_empty() {
            return Err(AnalysisError::EnsembleUnavailable {
                attempted: requested_set.len(),
            });
        }

        let fake_probability = self.weighted_mean(&usable);

        let contributing: Vec<String> = usable.iter().map(|(m, _)| m.to_string()).collect();
        let failed_models: Vec<String> = requested_set
            .iter()
            .filter(|m| !contributing.iter().any(|c| c == *m))
            .map(|m| m.to_string())
            .collect();

        let semantic_only = usable
            .iter()
            .all(|(m, _)| self.kinds.get(*m) == Some(&ModelKind::Semantic));
        let degraded = !failed_models.is_empty() || semantic_only;

        let mut confidence = calibration::confidence(
            self.config.calibration,
            fake_probability,
            self.config.temperature,
        );
        if degraded {
            confidence = confidence.min(self.config.degraded_confidence_ceiling);
        }
        if semantic_only {
            confidence = confidence.min(self.config.semantic_only_confidence_ceiling);
        }

        let label = self.label(fake_probability, confidence);

        Ok(EnsembleVerdict {
            fake_probability,
            confidence,
            label,
            contributing_models: contributing,
            failed_models,
            fusion_method: self.config.method,
            degraded,
            semantic_only,
            experimental: self.config.method.is_experimental(),
            policy_version: FUSION_POLICY_VERSION.to_string(),
        })
    }

    fn weighted_mean(&self, usable: &[(&str, f64)]) -> f64 {
        let weight = |model: &str, p: f64| -> f64 {
            match self.config.method {
                FusionMethod::EqualMean => 1.0,
                FusionMethod::WeightedMean => {
                    self.config.weights.get(model).copied().unwrap_or(1.0)
                }
                FusionMethod::ConfidenceWeighted => {
                    ((p - 0.5).abs() * 2.0).max(MIN_DECISIVENESS_WEIGHT)
                }
            }
        };

        let (sum, total) = usable.iter().fold((0.0, 0.0), |(sum, total), (m, p)| {
            let w = weight(m, *p);
            (sum + w * p, total + w)
        });

        let mean = if total > 0.0 {
            sum / total
        } else {
            // every configured weight is zero; fall back to the plain mean
            usable.iter().map(|(_, p)| p).sum::<f64>() / usable.len() as f64
        };
        mean.clamp(0.0, 1.0)
    }

    fn label(&self, p: f64, confidence: f64) -> VerdictLabel {
        let in_band = p >= self.config.suspicious_lower && p <= self.config.suspicious_upper;
        if in_band && confidence < self.config.suspicious_confidence {
            VerdictLabel::Suspicious
        } else if p >= 0.5 {
            VerdictLabel::Fake
        } else {
            VerdictLabel::Authentic
        }
    }
}
