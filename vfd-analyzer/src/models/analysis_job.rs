//! Analysis job state machine
//!
//! A job moves through five working stages:
//! QUEUED → FINGERPRINTING → (CACHE_HIT | RUNNING) → AGGREGATING → COMPLETE
//!
//! CACHE_HIT goes straight to COMPLETE. FAILED and CANCELLED are reachable
//! from every non-terminal state. Jobs are only mutated through
//! [`AnalysisJob::transition_to`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{AnalysisError, ErrorBody};
use crate::models::VideoFingerprint;

/// Maximum length of a caller-supplied analysis id
const MAX_ANALYSIS_ID_LEN: usize = 128;

/// Analysis identifier (caller-supplied or generated)
///
/// Doubles as the Progress Broadcaster subscription key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisId(String);

impl AnalysisId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate a caller-supplied id
    ///
    /// Accepts 1-128 characters from `[A-Za-z0-9_.-]`.
    pub fn parse(raw: &str) -> vfd_common::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_ANALYSIS_ID_LEN {
            return Err(vfd_common::Error::InvalidInput(format!(
                "analysis_id must be 1-{} characters",
                MAX_ANALYSIS_ID_LEN
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(vfd_common::Error::InvalidInput(format!(
                "analysis_id contains unsupported characters: {}",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted, not started
    Queued,
    /// Computing the content fingerprint and checking the cache
    Fingerprinting,
    /// Served from the Result Cache or from a coalesced in-flight analysis
    CacheHit,
    /// Inference running (at most one per fingerprint)
    Running,
    /// Fusing outputs, writing the cache, anchoring
    Aggregating,
    /// Finished with a result
    Complete,
    /// Finished with a recorded failure reason
    Failed,
    /// Cancelled by the caller; results discarded
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed | JobState::Cancelled)
    }

    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed)
                | (_, Cancelled)
                | (Queued, Fingerprinting)
                | (Fingerprinting, CacheHit)
                | (Fingerprinting, Running)
                | (CacheHit, Complete)
                | (Running, Aggregating)
                | (Aggregating, Complete)
        )
    }

    /// Ordinal used to keep progress events monotonic within a job
    pub fn rank(self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Fingerprinting => 1,
            JobState::CacheHit | JobState::Running => 2,
            JobState::Aggregating => 3,
            JobState::Complete | JobState::Failed | JobState::Cancelled => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Fingerprinting => "FINGERPRINTING",
            JobState::CacheHit => "CACHE_HIT",
            JobState::Running => "RUNNING",
            JobState::Aggregating => "AGGREGATING",
            JobState::Complete => "COMPLETE",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the video bytes came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputReference {
    /// Multipart upload
    Upload {
        file_name: Option<String>,
        byte_length: u64,
    },
    /// Remote video fetched by the service
    Url { url: String },
}

/// Recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: JobState,
    pub to: JobState,
    pub at: DateTime<Utc>,
    /// Time spent in `from`
    pub elapsed_ms: u64,
}

/// One analysis request from submission to terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub analysis_id: AnalysisId,

    pub input: InputReference,

    /// Model names requested for the ensemble
    pub requested_models: Vec<String>,

    /// Submit an audit anchor once the result exists
    pub anchor_requested: bool,

    pub state: JobState,

    /// Content fingerprint, once computed
    pub fingerprint: Option<VideoFingerprint>,

    /// True when the job was served by another job's in-flight analysis
    #[serde(default)]
    pub coalesced: bool,

    /// Failure reason for FAILED/CANCELLED jobs
    pub failure: Option<ErrorBody>,

    /// Cache key of the finished AnalysisResult
    pub result_ref: Option<String>,

    pub created_at: DateTime<Utc>,
    pub stage_entered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Transition history with per-stage timing
    #[serde(default)]
    pub transitions: Vec<StateTransition>,
}

impl AnalysisJob {
    pub fn new(
        analysis_id: AnalysisId,
        input: InputReference,
        requested_models: Vec<String>,
        anchor_requested: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            analysis_id,
            input,
            requested_models,
            anchor_requested,
            state: JobState::Queued,
            fingerprint: None,
            coalesced: false,
            failure: None,
            result_ref: None,
            created_at: now,
            stage_entered_at: now,
            completed_at: None,
            transitions: Vec::new(),
        }
    }

    /// Transition to a new state, enforcing the state machine
    pub fn transition_to(&mut self, next: JobState) -> Result<StateTransition, AnalysisError> {
        if !self.state.can_transition_to(next) {
            return Err(AnalysisError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        let transition = StateTransition {
            from: self.state,
            to: next,
            at: now,
            elapsed_ms: (now - self.stage_entered_at).num_milliseconds().max(0) as u64,
        };

        self.state = next;
        self.stage_entered_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.transitions.push(transition.clone());

        Ok(transition)
    }

    /// Move to FAILED (or CANCELLED for cancellations) recording the reason
    pub fn fail(&mut self, err: &AnalysisError) -> Result<StateTransition, AnalysisError> {
        let target = if matches!(err, AnalysisError::Cancelled) {
            JobState::Cancelled
        } else {
            JobState::Failed
        };
        let transition = self.transition_to(target)?;
        self.failure = Some(err.to_body());
        Ok(transition)
    }

    /// Move to COMPLETE, recording the result reference
    pub fn complete(&mut self, result_ref: String) -> Result<StateTransition, AnalysisError> {
        let transition = self.transition_to(JobState::Complete)?;
        self.result_ref = Some(result_ref);
        Ok(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Total wall time from creation to completion, if finished
    pub fn total_duration_ms(&self) -> Option<u64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_milliseconds().max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> AnalysisJob {
        AnalysisJob::new(
            AnalysisId::generate(),
            InputReference::Upload {
                file_name: Some("clip.mp4".to_string()),
                byte_length: 1024,
            },
            vec!["semantic".to_string()],
            false,
        )
    }

    #[test]
    fn test_happy_path_through_running() {
        let mut job = job();
        for next in [
            JobState::Fingerprinting,
            JobState::Running,
            JobState::Aggregating,
        ] {
            job.transition_to(next).unwrap();
        }
        job.complete("abc".to_string()).unwrap();

        assert_eq!(job.state, JobState::Complete);
        assert_eq!(job.result_ref.as_deref(), Some("abc"));
        assert!(job.completed_at.is_some());
        assert_eq!(job.transitions.len(), 4);
    }

    #[test]
    fn test_cache_hit_goes_directly_to_complete() {
        let mut job = job();
        job.transition_to(JobState::Fingerprinting).unwrap();
        job.transition_to(JobState::CacheHit).unwrap();
        assert!(job.transition_to(JobState::Aggregating).is_err());
        job.complete("abc".to_string()).unwrap();
        assert!(job.is_terminal());
    }

    #[test]
    fn test_skipping_stages_is_rejected() {
        let mut job = job();
        let err = job.transition_to(JobState::Running).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::InvalidTransition {
                from: JobState::Queued,
                to: JobState::Running
            }
        );
        assert_eq!(job.state, JobState::Queued);
    }

    #[test]
    fn test_failure_reachable_from_every_working_state() {
        for path in [
            vec![],
            vec![JobState::Fingerprinting],
            vec![JobState::Fingerprinting, JobState::CacheHit],
            vec![JobState::Fingerprinting, JobState::Running],
            vec![JobState::Fingerprinting, JobState::Running, JobState::Aggregating],
        ] {
            let mut job = job();
            for state in path {
                job.transition_to(state).unwrap();
            }
            job.fail(&AnalysisError::EnsembleUnavailable { attempted: 3 }).unwrap();
            assert_eq!(job.state, JobState::Failed);
            assert_eq!(job.failure.as_ref().unwrap().code, "ENSEMBLE_UNAVAILABLE");
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.fail(&AnalysisError::Cancelled).unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.transition_to(JobState::Fingerprinting).is_err());
        assert!(job.transition_to(JobState::Failed).is_err());
    }

    #[test]
    fn test_analysis_id_validation() {
        assert!(AnalysisId::parse("upload-42_a.b").is_ok());
        assert!(AnalysisId::parse("").is_err());
        assert!(AnalysisId::parse("has space").is_err());
        assert!(AnalysisId::parse(&"x".repeat(129)).is_err());
        assert_eq!(AnalysisId::parse("  trimmed ").unwrap().as_str(), "trimmed");
    }

    #[test]
    fn test_state_serializes_screaming_case() {
        assert_eq!(serde_json::to_string(&JobState::CacheHit).unwrap(), "\"CACHE_HIT\"");
        assert_eq!(JobState::CacheHit.to_string(), "CACHE_HIT");
    }
}
