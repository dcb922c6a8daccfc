//! Synthetic adapters for `--demo`/`--demo-config` (§6, §10.4): scripted
//! `Prober`/`MetadataTool`/`TranscoderProcess` implementations that never
//! shell out to `ffmpeg`/`ffprobe`/`exiftool`, so the end-to-end scenarios
//! in §8 (thread adjustment, graceful shutdown, immediate interrupt,
//! hardware-capability fallback, min-ratio reversion, queue refresh) can be
//! driven deterministically. Grounded on the pluggable-adapter boundary
//! pattern used for test doubles elsewhere in this crate, generalized here
//! to a path-substring-matched scenario file instead of hardcoded fixtures.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CameraPattern;
use crate::error::{OrchestratorError, Result};
use crate::metadata::{ExifFields, MetadataTool};
use crate::model::{CancellationToken, Metadata};
use crate::probe::Prober;
use crate::transcoder::{ProgressSink, TranscodeOutcome, TranscodeRequest, TranscoderProcess};

/// Loaded from `--demo-config`; substrings are matched against the job's
/// input path to pick which synthetic behavior a file exercises.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DemoScenario {
    #[serde(default = "default_duration")]
    pub default_duration_secs: f64,
    #[serde(default = "default_codec")]
    pub default_codec: String,
    #[serde(default = "default_delay_ms")]
    pub encode_delay_ms: u64,
    #[serde(default = "default_compression_ratio")]
    pub compression_ratio: f64,
    #[serde(default)]
    pub previously_encoded_paths: Vec<String>,
    #[serde(default)]
    pub hw_cap_exceeded_paths: Vec<String>,
    #[serde(default)]
    pub fail_paths: Vec<String>,
    #[serde(default)]
    pub probe_fail_paths: Vec<String>,
}

fn default_duration() -> f64 {
    10.0
}
fn default_codec() -> String {
    "h264".into()
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_compression_ratio() -> f64 {
    0.5
}

impl Default for DemoScenario {
    fn default() -> Self {
        Self {
            default_duration_secs: default_duration(),
            default_codec: default_codec(),
            encode_delay_ms: default_delay_ms(),
            compression_ratio: default_compression_ratio(),
            previously_encoded_paths: vec![],
            hw_cap_exceeded_paths: vec![],
            fail_paths: vec![],
            probe_fail_paths: vec![],
        }
    }
}

impl DemoScenario {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| OrchestratorError::Config(format!("failed to parse demo config {path:?}: {e}")))
    }

    fn matches(list: &[String], path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        list.iter().any(|needle| path_str.contains(needle.as_str()))
    }
}

pub struct DemoProber {
    scenario: DemoScenario,
}

impl DemoProber {
    pub fn new(scenario: DemoScenario) -> Self {
        Self { scenario }
    }
}

#[async_trait]
impl Prober for DemoProber {
    async fn probe(&self, path: &Path) -> Result<Metadata> {
        if DemoScenario::matches(&self.scenario.probe_fail_paths, path) {
            return Err(OrchestratorError::Probe(format!("synthetic probe failure for {path:?}")));
        }
        Ok(Metadata {
            width: 1920,
            height: 1080,
            fps: 30.0,
            codec: self.scenario.default_codec.clone(),
            color_space: None,
            duration_secs: self.scenario.default_duration_secs,
            source_bitrate_kbps: Some(8000),
            camera_model: None,
            previously_encoded: DemoScenario::matches(&self.scenario.previously_encoded_paths, path),
            quality_override: None,
            color_transfer: None,
            audio_codec: None,
        })
    }
}

#[derive(Default)]
pub struct DemoMetadataTool;

#[async_trait]
impl MetadataTool for DemoMetadataTool {
    async fn extract(&self, _path: &Path, _camera_patterns: &[CameraPattern]) -> Result<ExifFields> {
        Ok(ExifFields::default())
    }

    async fn copy_preserved(&self, _source: &Path, _target: &Path, _extra_tags: &[(String, String)]) -> Result<()> {
        Ok(())
    }
}

pub struct DemoTranscoder {
    scenario: DemoScenario,
}

impl DemoTranscoder {
    pub fn new(scenario: DemoScenario) -> Self {
        Self { scenario }
    }
}

#[async_trait]
impl TranscoderProcess for DemoTranscoder {
    async fn transcode(
        &self,
        request: TranscodeRequest<'_>,
        cancellation: CancellationToken,
        on_progress: &ProgressSink<'_>,
    ) -> Result<TranscodeOutcome> {
        let budget = Duration::from_millis(self.scenario.encode_delay_ms);
        let started = Instant::now();
        loop {
            if cancellation.is_cancelled() {
                return Ok(TranscodeOutcome::Interrupted);
            }
            let elapsed = started.elapsed();
            if elapsed >= budget {
                break;
            }
            let pct = (elapsed.as_secs_f64() / budget.as_secs_f64().max(0.001) * 100.0).min(100.0);
            on_progress(pct);
            tokio::time::sleep(Duration::from_millis(20).min(budget)).await;
        }

        if DemoScenario::matches(&self.scenario.hw_cap_exceeded_paths, request.input) {
            return Ok(TranscodeOutcome::HwCapExceeded);
        }
        if DemoScenario::matches(&self.scenario.fail_paths, request.input) {
            return Err(OrchestratorError::Transcode(format!("synthetic transcode failure for {:?}", request.input)));
        }

        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let input_size = tokio::fs::metadata(request.input).await.map(|m| m.len()).unwrap_or(1_000_000);
        let output_size = ((input_size as f64) * self.scenario.compression_ratio).max(1.0) as usize;
        tokio::fs::write(request.output, vec![0u8; output_size]).await?;

        Ok(TranscodeOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_prober_flags_previously_encoded_by_path_substring() {
        let scenario = DemoScenario { previously_encoded_paths: vec!["already".into()], ..Default::default() };
        let prober = DemoProber::new(scenario);
        let fresh = prober.probe(Path::new("/in/clip.mp4")).await.unwrap();
        let stale = prober.probe(Path::new("/in/already_encoded.mp4")).await.unwrap();
        assert!(!fresh.previously_encoded);
        assert!(stale.previously_encoded);
    }

    #[tokio::test]
    async fn demo_transcoder_respects_immediate_interrupt() {
        let scenario = DemoScenario { encode_delay_ms: 5_000, ..Default::default() };
        let transcoder = DemoTranscoder::new(scenario);
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let metadata = Metadata {
            width: 1920,
            height: 1080,
            fps: 30.0,
            codec: "h264".into(),
            color_space: None,
            duration_secs: 5.0,
            source_bitrate_kbps: Some(8000),
            camera_model: None,
            previously_encoded: false,
            quality_override: None,
            color_transfer: None,
            audio_codec: None,
        };
        let quality = crate::model::QualityDecision::Cq(28);
        let request = TranscodeRequest {
            job_id: 1,
            input: Path::new("/in/clip.mp4"),
            output: Path::new("/tmp/reelforge-demo-test-out.mp4"),
            rotation: crate::model::Rotation::None,
            quality: &quality,
            metadata: &metadata,
            gpu_mode: false,
            target_codec: crate::config::TargetCodec::Hevc,
            cpu_fallback_allowed: true,
            encoded_tag_value: "1",
        };

        let outcome = transcoder.transcode(request, cancellation, &|_| {}).await.unwrap();
        assert_eq!(outcome, TranscodeOutcome::Interrupted);
    }
}
