//! Ensemble scoring
//!
//! - **calibration** - fused probability → reported confidence
//! - **fusion** - the versioned, order-independent fusion policy
//! - **orchestrator** - concurrent adapter fan-out under admission limits

pub mod calibration;
pub mod fusion;
pub mod orchestrator;

pub use fusion::{FusionPolicy, FUSION_POLICY_VERSION};
pub use orchestrator::{EnsembleOrchestrator, EnsembleOutcome};
