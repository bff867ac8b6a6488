//! Stub collaborators: score adapters, media toolkit and ledger

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vfd_analyzer::anchor::{AnchorPayload, LedgerClient, LedgerError};
use vfd_analyzer::error::AnalysisError;
use vfd_analyzer::services::{FrameSpec, MediaToolkit};
use vfd_analyzer::types::{
    AdapterError, AudioTrack, Frame, FrameSample, MediaInfo, ModelKind, RawScore, ScoreAdapter,
};

/// What a stub adapter does when called
#[derive(Debug, Clone)]
pub enum StubBehavior {
    Score(f64),
    Fail(String),
}

/// Score adapter with a fixed answer, optional delay and a call counter
pub struct StubAdapter {
    name: String,
    kind: ModelKind,
    behavior: StubBehavior,
    delay: Duration,
    timeout: Duration,
    calls: AtomicUsize,
}

impl StubAdapter {
    pub fn scoring(name: &str, kind: ModelKind, probability: f64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            behavior: StubBehavior::Score(probability),
            delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str, kind: ModelKind, message: &str) -> Self {
        Self {
            behavior: StubBehavior::Fail(message.to_string()),
            ..Self::scoring(name, kind, 0.0)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoreAdapter for StubAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call(&self, _sample: &FrameSample) -> Result<RawScore, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behavior {
            StubBehavior::Score(p) => Ok(RawScore {
                fake_probability: Some(*p),
                ..Default::default()
            }),
            StubBehavior::Fail(message) => Err(AdapterError::Backend(message.clone())),
        }
    }
}

/// Media toolkit producing synthetic frames without touching ffmpeg
pub struct StubMedia {
    pub duration_secs: f64,
    pub with_audio: bool,
}

impl Default for StubMedia {
    fn default() -> Self {
        Self {
            duration_secs: 4.0,
            with_audio: false,
        }
    }
}

#[async_trait]
impl MediaToolkit for StubMedia {
    async fn probe(&self, _video: &Path) -> Result<MediaInfo, AnalysisError> {
        Ok(MediaInfo {
            duration_secs: Some(self.duration_secs),
            width: 1280,
            height: 720,
            has_audio: self.with_audio,
        })
    }

    async fn extract_frames(
        &self,
        _video: &Path,
        info: &MediaInfo,
        spec: FrameSpec,
    ) -> Result<FrameSample, AnalysisError> {
        let pixels = spec.width as usize * spec.height as usize;
        let frames = (0..spec.count)
            .map(|i| Frame {
                index: i,
                timestamp_ms: (i as u64 + 1) * 250,
                width: spec.width,
                height: spec.height,
                // gentle gradient that drifts a little per frame
                pixels: (0..pixels)
                    .flat_map(|p| {
                        let v = ((p % spec.width as usize) * 4 + i) as u8;
                        [v, v, v]
                    })
                    .collect(),
            })
            .collect();
        Ok(FrameSample::new(frames, info.duration_secs))
    }

    async fn extract_audio(&self, _video: &Path, info: &MediaInfo) -> Option<AudioTrack> {
        if !info.has_audio {
            return None;
        }
        let sample_rate = 16_000;
        let len = (self.duration_secs * sample_rate as f64) as usize;
        Some(AudioTrack {
            samples: (0..len)
                .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / sample_rate as f32).sin() * 0.3)
                .collect(),
            sample_rate,
        })
    }
}

/// Ledger that fails transiently a set number of times before accepting
pub struct StubLedger {
    failures_before_success: usize,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubLedger {
    pub fn accepting() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures_before_success: failures,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for StubLedger {
    async fn submit(&self, payload: &AnchorPayload) -> Result<String, LedgerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.failures_before_success {
            return Err(LedgerError::Transient("ledger node unreachable".to_string()));
        }
        Ok(format!("tx-{}", &payload.checksum[..16]))
    }
}

pub fn adapters(list: Vec<StubAdapter>) -> Vec<Arc<StubAdapter>> {
    list.into_iter().map(Arc::new).collect()
}
