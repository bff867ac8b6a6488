//! Configuration for vfd-analyzer
//!
//! Sources, lowest to highest priority:
//! 1. Compiled defaults (every field has one, so an empty file is valid)
//! 2. TOML file (`vfd-analyzer.toml`)
//! 3. Environment overrides (`VFD_PORT`, `VFD_LEDGER_ENDPOINT`,
//!    `VFD_ADAPTER_<NAME>_ENDPOINT`)
//! 4. Command-line flags (applied by `main`)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use vfd_common::{Error, Result};

use crate::ensemble::calibration::CalibrationMethod;
use crate::models::FusionMethod;
use crate::types::ModelKind;

/// Service name, used for the default config path and logs
pub const SERVICE_NAME: &str = "vfd-analyzer";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5740;

pub const PORT_ENV: &str = "VFD_PORT";
pub const LEDGER_ENDPOINT_ENV: &str = "VFD_LEDGER_ENDPOINT";

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Root folder for the database (resolved with CLI/env priority in `main`)
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub concurrency: ConcurrencyConfig,
    pub adapters: Vec<AdapterConfig>,
    pub fusion: FusionConfig,
    pub anchor: AnchorConfig,
    pub media: MediaConfig,
    pub logging: LoggingConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            adapters: vec![
                AdapterConfig::new("semantic", ModelKind::Semantic),
                AdapterConfig::new("artifact", ModelKind::Artifact),
                AdapterConfig::new("face", ModelKind::FaceLocalizer),
            ],
            fusion: FusionConfig::default(),
            anchor: AnchorConfig::default(),
            media: MediaConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Input and job limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Size ceiling for uploads and downloads
    pub max_video_bytes: u64,
    /// Frames sampled per video
    pub frame_count: usize,
    /// Analysis resolution every frame is scaled to
    pub frame_width: u32,
    pub frame_height: u32,
    /// Overall per-job deadline (queue wait excluded)
    pub job_timeout_secs: u64,
    pub download_timeout_secs: u64,
    /// How long finished jobs keep their progress channel and registry entry
    pub progress_retention_secs: u64,
    /// Maximum time spent retrying a locked database
    pub db_lock_wait_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_video_bytes: 500 * 1024 * 1024,
            frame_count: 16,
            frame_width: 224,
            frame_height: 224,
            job_timeout_secs: 300,
            download_timeout_secs: 60,
            progress_retention_secs: 600,
            db_lock_wait_ms: 5000,
        }
    }
}

/// Admission control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Jobs allowed past QUEUED at once
    pub max_concurrent_jobs: usize,
    /// Adapter calls in flight across all jobs
    pub global_adapter_calls: usize,
    /// Adapter calls in flight within one job
    pub per_job_adapter_calls: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            global_adapter_calls: 8,
            per_job_adapter_calls: 3,
        }
    }
}

/// One scoring backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub name: String,
    pub kind: ModelKind,
    /// Backend URL; adapters without one are not registered
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_adapter_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AdapterConfig {
    pub fn new(name: &str, kind: ModelKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            endpoint: None,
            timeout_ms: default_adapter_timeout_ms(),
            enabled: true,
        }
    }

    /// `VFD_ADAPTER_<NAME>_ENDPOINT`, name upper-cased with `-`/`.` as `_`
    pub fn endpoint_env_var(&self) -> String {
        let name: String = self
            .name
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("VFD_ADAPTER_{}_ENDPOINT", name)
    }
}

fn default_adapter_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

/// Fusion policy parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub method: FusionMethod,
    /// Per-model weights for `weighted_mean`; missing models weigh 1.0
    pub weights: BTreeMap<String, f64>,
    /// Suspicious band bounds on the fused probability
    pub suspicious_lower: f64,
    pub suspicious_upper: f64,
    /// Verdicts inside the band below this confidence are SUSPICIOUS
    pub suspicious_confidence: f64,
    pub calibration: CalibrationMethod,
    /// Temperature for `temperature` calibration
    pub temperature: f64,
    /// Confidence ceiling when fewer models contributed than requested
    pub degraded_confidence_ceiling: f64,
    /// Confidence ceiling when only the semantic scorer contributed
    pub semantic_only_confidence_ceiling: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            method: FusionMethod::EqualMean,
            weights: BTreeMap::new(),
            suspicious_lower: 0.4,
            suspicious_upper: 0.6,
            suspicious_confidence: 0.7,
            calibration: CalibrationMethod::AgreementStrength,
            temperature: 1.0,
            degraded_confidence_ceiling: 0.85,
            semantic_only_confidence_ceiling: 0.6,
        }
    }
}

/// Audit anchor submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Ledger submission URL; anchoring is unavailable without one
    pub endpoint: Option<String>,
    /// Anchor every finished result automatically (otherwise per request)
    pub auto_submit: bool,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            auto_submit: false,
            max_attempts: 3,
            initial_backoff_ms: 500,
            timeout_ms: 10_000,
        }
    }
}

/// External media tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub audio_sample_rate: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            audio_sample_rate: 16_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AnalyzerConfig {
    /// Load TOML (missing file = defaults), apply environment overrides, validate
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: AnalyzerConfig = vfd_common::config::load_toml_or_default(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply deployment overrides from a key lookup (normally the environment)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(PORT_ENV) {
            match raw.trim().parse::<u16>() {
                Ok(port) => {
                    info!("Port overridden by {}: {}", PORT_ENV, port);
                    self.server.port = port;
                }
                Err(_) => warn!("Ignoring invalid {}={}", PORT_ENV, raw),
            }
        }

        if let Some(endpoint) = lookup(LEDGER_ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            if self.anchor.endpoint.is_some() {
                warn!(
                    "Ledger endpoint found in TOML and {}. Using environment.",
                    LEDGER_ENDPOINT_ENV
                );
            }
            self.anchor.endpoint = Some(endpoint.trim().to_string());
        }

        for adapter in &mut self.adapters {
            let var = adapter.endpoint_env_var();
            if let Some(endpoint) = lookup(&var).filter(|v| !v.trim().is_empty()) {
                info!(model = %adapter.name, "Adapter endpoint overridden by {}", var);
                adapter.endpoint = Some(endpoint.trim().to_string());
            }
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let fusion = &self.fusion;
        let unit = |v: f64| (0.0..=1.0).contains(&v);

        if !unit(fusion.suspicious_lower)
            || !unit(fusion.suspicious_upper)
            || fusion.suspicious_lower > fusion.suspicious_upper
        {
            return Err(Error::Config(format!(
                "fusion suspicious band must satisfy 0 <= lower <= upper <= 1 (got {}..{})",
                fusion.suspicious_lower, fusion.suspicious_upper
            )));
        }
        for (name, value) in [
            ("suspicious_confidence", fusion.suspicious_confidence),
            ("degraded_confidence_ceiling", fusion.degraded_confidence_ceiling),
            (
                "semantic_only_confidence_ceiling",
                fusion.semantic_only_confidence_ceiling,
            ),
        ] {
            if !unit(value) {
                return Err(Error::Config(format!("fusion.{} must be in [0,1]", name)));
            }
        }
        if let Some((model, weight)) = fusion
            .weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(Error::Config(format!(
                "fusion weight for '{}' must be non-negative (got {})",
                model, weight
            )));
        }
        if !(fusion.temperature.is_finite() && fusion.temperature > 0.0) {
            return Err(Error::Config("fusion.temperature must be > 0".to_string()));
        }

        let limits = &self.limits;
        if limits.max_video_bytes == 0
            || limits.frame_count == 0
            || limits.frame_width == 0
            || limits.frame_height == 0
            || limits.job_timeout_secs == 0
        {
            return Err(Error::Config(
                "limits must be non-zero (max_video_bytes, frame_count, frame size, job_timeout_secs)"
                    .to_string(),
            ));
        }

        let concurrency = &self.concurrency;
        if concurrency.max_concurrent_jobs == 0
            || concurrency.global_adapter_calls == 0
            || concurrency.per_job_adapter_calls == 0
        {
            return Err(Error::Config("concurrency limits must be non-zero".to_string()));
        }

        let mut seen = HashSet::new();
        for adapter in &self.adapters {
            if adapter.name.trim().is_empty() {
                return Err(Error::Config("adapter name must not be empty".to_string()));
            }
            if !seen.insert(adapter.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate adapter name '{}'",
                    adapter.name
                )));
            }
            if adapter.timeout_ms == 0 {
                return Err(Error::Config(format!(
                    "adapter '{}' timeout_ms must be non-zero",
                    adapter.name
                )));
            }
        }

        if self.anchor.max_attempts == 0 {
            return Err(Error::Config("anchor.max_attempts must be >= 1".to_string()));
        }

        Ok(())
    }

    /// Enabled adapters that have an endpoint
    pub fn active_adapters(&self) -> impl Iterator<Item = &AdapterConfig> {
        self.adapters
            .iter()
            .filter(|a| a.enabled && a.endpoint.is_some())
    }
}
