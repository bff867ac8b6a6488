//! Media toolkit: probing, frame sampling and audio extraction
//!
//! The pipeline only depends on the [`MediaToolkit`] trait. The production
//! implementation shells out to ffprobe/ffmpeg; tests substitute synthetic
//! frames.
//!
//! Frames are sampled evenly over the probed duration (midpoint of each of
//! N equal segments) and scaled to the analysis resolution as RGB24. Audio
//! is extracted as mono 16-bit PCM; a missing or undecodable audio track is
//! reported as `None`, never as an error.

use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::MediaConfig;
use crate::error::AnalysisError;
use crate::types::{AudioTrack, Frame, FrameSample, MediaInfo};

/// Frame sampling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    pub count: usize,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Container facts; `InputUnreadable` if the file is not a decodable video
    async fn probe(&self, video: &Path) -> Result<MediaInfo, AnalysisError>;

    /// Evenly spaced frames at the analysis resolution
    async fn extract_frames(
        &self,
        video: &Path,
        info: &MediaInfo,
        spec: FrameSpec,
    ) -> Result<FrameSample, AnalysisError>;

    /// Mono PCM, or `None` when there is no usable audio track
    async fn extract_audio(&self, video: &Path, info: &MediaInfo) -> Option<AudioTrack>;
}

/// Spill an in-memory video to a temporary file for the external tools
///
/// The file is deleted when the returned handle drops.
pub async fn spill_to_temp(
    bytes: std::sync::Arc<Vec<u8>>,
) -> Result<NamedTempFile, AnalysisError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("vfd-input-")
            .suffix(".video")
            .tempfile()?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(|e| AnalysisError::Storage(format!("Temp file task failed: {}", e)))?
    .map_err(|e| AnalysisError::Storage(format!("Temp file write failed: {}", e)))
}

/// ffprobe/ffmpeg subprocess implementation
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    audio_sample_rate: u32,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl FfmpegToolkit {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            audio_sample_rate: config.audio_sample_rate,
        }
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<Vec<u8>, String> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to start {}: {}", program.display(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                stderr.trim()
            ));
        }
        Ok(output.stdout)
    }

    fn frame_args(
        video: &Path,
        seek_secs: Option<f64>,
        spec: FrameSpec,
        frames: usize,
    ) -> Vec<String> {
        let mut args = vec!["-v".to_string(), "error".to_string()];
        if let Some(t) = seek_secs {
            args.extend(["-ss".to_string(), format!("{:.3}", t)]);
        }
        args.extend([
            "-i".to_string(),
            video.display().to_string(),
            "-frames:v".to_string(),
            frames.to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", spec.width, spec.height),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "pipe:1".to_string(),
        ]);
        args
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Midpoints of `count` equal segments of `duration`
pub fn sample_timestamps(duration_secs: f64, count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| duration_secs * (i as f64 + 0.5) / count as f64)
        .collect()
}

/// Cut a raw RGB24 stream into frames
fn split_frames(raw: &[u8], spec: FrameSpec, timestamps_ms: &[u64]) -> Vec<Frame> {
    let frame_len = spec.width as usize * spec.height as usize * 3;
    raw.chunks_exact(frame_len)
        .enumerate()
        .map(|(i, pixels)| Frame {
            index: i,
            timestamp_ms: timestamps_ms.get(i).copied().unwrap_or(0),
            width: spec.width,
            height: spec.height,
            pixels: pixels.to_vec(),
        })
        .collect()
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, video: &Path) -> Result<MediaInfo, AnalysisError> {
        let video_arg = video.display().to_string();
        let args = to_args(&[
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            &video_arg,
        ]);

        let stdout = self
            .run(&self.ffprobe, &args)
            .await
            .map_err(AnalysisError::InputUnreadable)?;
        let probe: ProbeOutput = serde_json::from_slice(&stdout)
            .map_err(|e| AnalysisError::InputUnreadable(format!("unparseable probe output: {}", e)))?;

        let video_stream = probe
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| AnalysisError::InputUnreadable("no video stream".to_string()))?;

        let info = MediaInfo {
            duration_secs: probe
                .format
                .and_then(|f| f.duration)
                .and_then(|d| d.parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d > 0.0),
            width: video_stream.width.unwrap_or(0),
            height: video_stream.height.unwrap_or(0),
            has_audio: probe
                .streams
                .iter()
                .any(|s| s.codec_type.as_deref() == Some("audio")),
        };
        debug!(?info, "Probed input");
        Ok(info)
    }

    async fn extract_frames(
        &self,
        video: &Path,
        info: &MediaInfo,
        spec: FrameSpec,
    ) -> Result<FrameSample, AnalysisError> {
        let frame_len = spec.width as usize * spec.height as usize * 3;
        let mut frames = Vec::with_capacity(spec.count);

        match info.duration_secs {
            Some(duration) => {
                for (i, t) in sample_timestamps(duration, spec.count).into_iter().enumerate() {
                    let args = Self::frame_args(video, Some(t), spec, 1);
                    let raw = self
                        .run(&self.ffmpeg, &args)
                        .await
                        .map_err(AnalysisError::InputUnreadable)?;
                    if raw.len() < frame_len {
                        return Err(AnalysisError::InputUnreadable(format!(
                            "could not decode frame at {:.3}s",
                            t
                        )));
                    }
                    frames.push(Frame {
                        index: i,
                        timestamp_ms: (t * 1000.0) as u64,
                        width: spec.width,
                        height: spec.height,
                        pixels: raw[..frame_len].to_vec(),
                    });
                }
            }
            None => {
                // no duration to seek in; take the leading frames
                let args = Self::frame_args(video, None, spec, spec.count);
                let raw = self
                    .run(&self.ffmpeg, &args)
                    .await
                    .map_err(AnalysisError::InputUnreadable)?;
                frames = split_frames(&raw, spec, &[]);
            }
        }

        if frames.is_empty() {
            return Err(AnalysisError::InputUnreadable("no frames decoded".to_string()));
        }
        Ok(FrameSample::new(frames, info.duration_secs))
    }

    async fn extract_audio(&self, video: &Path, info: &MediaInfo) -> Option<AudioTrack> {
        if !info.has_audio {
            return None;
        }

        let video_arg = video.display().to_string();
        let rate = self.audio_sample_rate.to_string();
        let args = to_args(&[
            "-v", "error", "-i", &video_arg, "-vn", "-ac", "1", "-ar", &rate, "-f", "s16le",
            "pipe:1",
        ]);

        match self.run(&self.ffmpeg, &args).await {
            Ok(raw) if raw.len() >= 2 => Some(AudioTrack {
                samples: raw
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                    .collect(),
                sample_rate: self.audio_sample_rate,
            }),
            Ok(_) => {
                warn!("Audio track decoded to nothing; continuing video-only");
                None
            }
            Err(e) => {
                warn!(error = %e, "Audio extraction failed; continuing video-only");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_timestamps_are_segment_midpoints() {
        assert_eq!(sample_timestamps(10.0, 4), vec![1.25, 3.75, 6.25, 8.75]);
    }

    #[test]
    fn test_split_frames() {
        let spec = FrameSpec {
            count: 2,
            width: 2,
            height: 1,
        };
        let raw = vec![0u8; 12 + 5];
        let frames = split_frames(&raw, spec, &[0, 40]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].timestamp_ms, 40);
        assert!(frames.iter().all(|f| f.is_well_formed()));
    }

    #[tokio::test]
    async fn test_spill_to_temp_writes_bytes() {
        let file = spill_to_temp(std::sync::Arc::new(b"abc".to_vec())).await.unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_missing_ffprobe_is_input_unreadable() {
        let toolkit = FfmpegToolkit::new(&MediaConfig {
            ffprobe_path: PathBuf::from("/nonexistent/ffprobe"),
            ..MediaConfig::default()
        });
        let err = toolkit.probe(Path::new("/tmp/none.mp4")).await.unwrap_err();
        assert_eq!(err.code(), "INPUT_UNREADABLE");
    }
}
