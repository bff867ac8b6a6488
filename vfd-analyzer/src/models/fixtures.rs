//! Hand-built results for unit tests

use chrono::Utc;

use super::*;

pub fn result(digest: &str, fake_probability: f64) -> AnalysisResult {
    AnalysisResult {
        fingerprint: VideoFingerprint {
            digest: digest.to_string(),
            byte_length: 1024,
            duration_secs: Some(4.0),
        },
        verdict: EnsembleVerdict {
            fake_probability,
            confidence: 0.8,
            label: if fake_probability >= 0.5 {
                VerdictLabel::Fake
            } else {
                VerdictLabel::Authentic
            },
            contributing_models: vec!["artifact".to_string()],
            failed_models: Vec::new(),
            fusion_method: FusionMethod::EqualMean,
            degraded: false,
            semantic_only: false,
            experimental: false,
            policy_version: "fusion-v1".to_string(),
        },
        forensics: ForensicMetrics {
            spatial_artifacts: 0.3,
            temporal_consistency: 0.9,
            temporal_basis: TemporalBasis::FrameDifference,
            spectral_density: 0.2,
            vocal_authenticity: 0.7,
            audio_analyzed: false,
            vocal_basis: VocalBasis::VideoOnly,
            spatial_entropy_heatmap: Vec::new(),
        },
        model_scores: vec![ModelScore::success("artifact", fake_probability, 12)],
        metadata: ProcessingMetadata {
            requested_models: vec!["artifact".to_string()],
            frames_analyzed: 4,
            frame_width: 8,
            frame_height: 8,
            audio_track_present: false,
            processing_ms: 40,
            analyzed_at: Utc::now(),
            service_version: "test".to_string(),
        },
    }
}
