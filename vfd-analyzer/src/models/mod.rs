//! Data models for vfd-analyzer
//!
//! - Analysis job state machine
//! - Analysis results (fingerprint, scores, verdict, forensic metrics)
//! - Audit anchor records

pub mod analysis_job;
pub mod analysis_result;
pub mod anchor;

pub use analysis_job::{AnalysisId, AnalysisJob, InputReference, JobState, StateTransition};
pub use analysis_result::{
    AnalysisResult, EnsembleVerdict, ForensicMetrics, FusionMethod, HeatmapSector, ModelScore,
    ProcessingMetadata, ScoreError, TemporalBasis, VerdictLabel, VideoFingerprint, VocalBasis,
};
pub use anchor::{AnchorStatus, AuditAnchorRecord};

#[cfg(test)]
pub(crate) mod fixtures;
