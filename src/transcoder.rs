//! Transcoder Adapter (§4.5): spawns the ffmpeg subprocess, streams its
//! progress, classifies its exit, and supports cooperative cancellation.
//! Grounded on an `orchestrator.rs::Transcoder::transcode_media` pattern
//! (`tokio::select!` over the stderr reader and a kill channel, bounded
//! progress parsing via `FFmpegProgress`) and an `FFmpegCommandBuilder` for
//! argument assembly, now driven by `TargetCodec`/`QualityDecision`/
//! `Rotation`/`AudioPolicy` instead of a single `QualityProfile`.
//!
//! Built behind the `TranscoderProcess` trait (§10.4 "trusted, pluggable
//! boundary") so the Orchestrator and its tests can swap in a synthetic
//! implementation for `--demo` mode with no real ffmpeg invocation.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::audio::{audio_args, audio_policy_for};
use crate::config::TargetCodec;
use crate::encoders::{apply_encoder, apply_hdr_settings, cpu_baseline_encoder, select_encoder};
use crate::error::{OrchestratorError, Result};
use crate::hardware::{EncoderCapabilities, HardwareInfo};
use crate::metadata::metadata_passthrough_args;
use crate::model::{CancellationToken, Metadata, QualityDecision, Rotation};

/// Bounded grace period between the cooperative `"q\n"` quit and the
/// forceful `kill()` fallback (§4.5 "implementation: 10 s").
const CANCEL_GRACE: Duration = Duration::from_secs(10);
/// No more than one `JobProgress` event per job per wall second (§4.5).
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Diagnostics ffmpeg prints when the selected hardware path cannot service
/// the request, e.g. an exhausted NVENC session limit or an unsupported
/// profile on the chosen device. Recognized case-insensitively.
const HW_CAP_SIGNATURES: &[&str] = &[
    "no nvenc capable devices",
    "no capable devices found",
    "function not implemented",
    "cannot load libvpl",
    "device creation failed",
    "unsupported",
    "this device does not support",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Completed,
    HwCapExceeded,
    Interrupted,
}

pub struct TranscodeRequest<'a> {
    pub job_id: u64,
    pub input: &'a Path,
    pub output: &'a Path,
    pub rotation: Rotation,
    pub quality: &'a QualityDecision,
    pub metadata: &'a Metadata,
    pub gpu_mode: bool,
    pub target_codec: TargetCodec,
    pub cpu_fallback_allowed: bool,
    pub encoded_tag_value: &'a str,
}

/// Callback invoked at most once per `PROGRESS_INTERVAL` with the parsed
/// percentage complete. The Orchestrator wires this to an Event Bus publish;
/// tests can collect into a `Vec` instead.
pub type ProgressSink<'a> = dyn Fn(f64) + Send + Sync + 'a;

#[async_trait]
pub trait TranscoderProcess: Send + Sync {
    async fn transcode(
        &self,
        request: TranscodeRequest<'_>,
        cancellation: CancellationToken,
        on_progress: &ProgressSink<'_>,
    ) -> Result<TranscodeOutcome>;
}

pub struct FfmpegTranscoder {
    hardware: Option<HardwareInfo>,
    capabilities: EncoderCapabilities,
}

impl FfmpegTranscoder {
    pub fn new(hardware: Option<HardwareInfo>, capabilities: EncoderCapabilities) -> Self {
        Self { hardware, capabilities }
    }

    fn build_command(&self, request: &TranscodeRequest<'_>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("ffmpeg");
        cmd.arg("-hide_banner").arg("-y").arg("-i").arg(request.input);

        let vendor = if request.gpu_mode { self.hardware.as_ref().map(|h| h.vendor) } else { None };
        let allow_fallback = request.cpu_fallback_allowed;

        match select_encoder(request.target_codec, vendor, &self.capabilities, allow_fallback) {
            Some(selection) => {
                if selection.effective_codec != selection.requested_codec {
                    info!(
                        job_id = request.job_id,
                        requested = selection.requested_codec.as_str(),
                        effective = selection.effective_codec.as_str(),
                        reason = selection.reason,
                        "encoder fell through to a different codec"
                    );
                }
                apply_encoder(&mut cmd, selection.encoder, self.hardware.as_ref(), request.quality);
            }
            None => {
                warn!(job_id = request.job_id, "no suitable encoder detected, applying CPU baseline args");
                let fallback = cpu_baseline_encoder(request.target_codec, &self.capabilities);
                apply_encoder(&mut cmd, fallback, None, request.quality);
            }
        }

        apply_hdr_settings(&mut cmd, request.metadata, rotation_filter(request.rotation));

        for arg in audio_args(audio_policy_for(request.metadata.audio_codec.as_deref())) {
            cmd.arg(arg);
        }

        for arg in metadata_passthrough_args(request.encoded_tag_value) {
            cmd.arg(arg);
        }

        cmd
    }
}

#[async_trait]
impl TranscoderProcess for FfmpegTranscoder {
    async fn transcode(
        &self,
        request: TranscodeRequest<'_>,
        cancellation: CancellationToken,
        on_progress: &ProgressSink<'_>,
    ) -> Result<TranscodeOutcome> {
        if let Some(parent) = request.output.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_output = tmp_sibling(request.output);
        let mut cmd = self.build_command(&request);
        // The ".tmp" suffix defeats ffmpeg's extension-based muxer inference,
        // so the container must be named explicitly for the real output path.
        cmd.arg("-f").arg(container_format_for(request.output));
        cmd.arg(&tmp_output);
        cmd.stdin(Stdio::piped()).stdout(Stdio::null()).stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| OrchestratorError::Transcode(format!("failed to spawn ffmpeg: {e}")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| OrchestratorError::Transcode("failed to capture ffmpeg stderr".into()))?;
        let mut stdin = child.stdin.take();

        let mut reader = BufReader::new(stderr).lines();
        let total_duration = request.metadata.duration_secs;
        let mut last_progress_at = Instant::now() - PROGRESS_INTERVAL;
        let mut last_lines: VecDeque<String> = VecDeque::with_capacity(20);
        let mut hw_cap_detected = false;

        loop {
            if cancellation.is_cancelled() {
                if let Some(stdin) = stdin.as_mut() {
                    let _ = stdin.write_all(b"q\n").await;
                }
                let waited = timeout(CANCEL_GRACE, child.wait()).await;
                if waited.is_err() {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
                let _ = tokio::fs::remove_file(&tmp_output).await;
                return Ok(TranscodeOutcome::Interrupted);
            }

            match timeout(Duration::from_millis(250), reader.next_line()).await {
                Ok(Ok(Some(line))) => {
                    if line.to_ascii_lowercase().contains("hw cap") || HW_CAP_SIGNATURES.iter().any(|sig| line.to_ascii_lowercase().contains(sig)) {
                        hw_cap_detected = true;
                    }
                    last_lines.push_back(line.clone());
                    if last_lines.len() > 20 {
                        last_lines.pop_front();
                    }
                    if let Some(progress) = parse_progress_line(&line) {
                        if last_progress_at.elapsed() >= PROGRESS_INTERVAL {
                            on_progress(progress.percentage(total_duration));
                            last_progress_at = Instant::now();
                        }
                    }
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    warn!(job_id = request.job_id, error = %e, "error reading ffmpeg stderr");
                    break;
                }
                Err(_) => continue,
            }
        }

        let status = child.wait().await?;

        if status.success() {
            let _ = tokio::fs::rename(&tmp_output, request.output).await;
            return Ok(TranscodeOutcome::Completed);
        }

        let _ = tokio::fs::remove_file(&tmp_output).await;

        if hw_cap_detected {
            return Ok(TranscodeOutcome::HwCapExceeded);
        }

        let detail = last_lines.into_iter().collect::<Vec<_>>().join("\n");
        Err(OrchestratorError::Transcode(format!("ffmpeg exited with {status}: {detail}")))
    }
}

/// Maps a path's extension to the ffmpeg muxer name (§6: "name.
/// <container-ext> (default .mp4; .mkv if args select matroska, .mov if
/// mov)"). Falls back to `mp4` for anything unrecognized. Shared with
/// `colorfix.rs`, whose remux intermediate has the same ".tmp"-defeats-
/// inference problem.
pub(crate) fn container_format_for(output: &Path) -> &'static str {
    match output.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "mkv" => "matroska",
        Some(ext) if ext == "mov" => "mov",
        _ => "mp4",
    }
}

fn tmp_sibling(output: &Path) -> PathBuf {
    let mut tmp = output.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn rotation_filter(rotation: Rotation) -> Option<&'static str> {
    match rotation {
        Rotation::None => None,
        Rotation::R90 => Some("transpose=1"),
        Rotation::R180 => Some("transpose=1,transpose=1"),
        Rotation::R270 => Some("transpose=2"),
    }
}

#[derive(Debug, Clone, Default)]
struct Progress {
    time_seconds: f64,
}

impl Progress {
    fn percentage(&self, total_duration: f64) -> f64 {
        if total_duration <= 0.0 {
            return 0.0;
        }
        (self.time_seconds / total_duration * 100.0).min(100.0)
    }
}

/// Parses an ffmpeg stderr progress line (`frame=... fps=... time=...
/// speed=...`), grounded on an `FFmpegProgress::parse_line` pattern.
fn parse_progress_line(line: &str) -> Option<Progress> {
    if !line.contains("time=") && !line.contains("out_time=") {
        return None;
    }
    let normalized = line.replace('=', "= ");
    let parts: Vec<&str> = normalized.split_whitespace().collect();
    for i in 0..parts.len() {
        if (parts[i] == "time=" || parts[i] == "out_time=") && i + 1 < parts.len() {
            return Some(Progress { time_seconds: parse_time(parts[i + 1]) });
        }
    }
    None
}

fn parse_time(s: &str) -> f64 {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return 0.0;
    }
    let hours: f64 = parts[0].parse().unwrap_or(0.0);
    let minutes: f64 = parts[1].parse().unwrap_or(0.0);
    let seconds: f64 = parts[2].parse().unwrap_or(0.0);
    hours * 3600.0 + minutes * 60.0 + seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_progress_line() {
        let line = "frame=  100 fps=25.0 bitrate=1500kbps time=00:00:04.00 speed=1.5x";
        let progress = parse_progress_line(line).unwrap();
        assert!((progress.time_seconds - 4.0).abs() < 0.01);
        assert!((progress.percentage(8.0) - 50.0).abs() < 0.1);
    }

    #[test]
    fn lines_without_time_are_not_progress() {
        assert!(parse_progress_line("Stream mapping:").is_none());
    }

    #[test]
    fn rotation_filters_match_expected_transpose_chains() {
        assert_eq!(rotation_filter(Rotation::None), None);
        assert_eq!(rotation_filter(Rotation::R90), Some("transpose=1"));
        assert_eq!(rotation_filter(Rotation::R180), Some("transpose=1,transpose=1"));
        assert_eq!(rotation_filter(Rotation::R270), Some("transpose=2"));
    }

    #[test]
    fn tmp_sibling_appends_suffix_without_disturbing_extension() {
        let output = Path::new("/out/clip.mp4");
        assert_eq!(tmp_sibling(output), PathBuf::from("/out/clip.mp4.tmp"));
    }

    #[test]
    fn container_format_maps_extension_to_muxer_name() {
        assert_eq!(container_format_for(Path::new("/out/clip.mp4")), "mp4");
        assert_eq!(container_format_for(Path::new("/out/clip.mkv")), "matroska");
        assert_eq!(container_format_for(Path::new("/out/clip.mov")), "mov");
        assert_eq!(container_format_for(Path::new("/out/clip")), "mp4");
    }

    fn metadata_with(video_codec: &str, audio_codec: Option<&str>) -> Metadata {
        Metadata {
            width: 1920,
            height: 1080,
            fps: 30.0,
            codec: video_codec.into(),
            color_space: None,
            duration_secs: 10.0,
            source_bitrate_kbps: Some(8000),
            camera_model: None,
            previously_encoded: false,
            quality_override: None,
            color_transfer: None,
            audio_codec: audio_codec.map(String::from),
        }
    }

    fn args_of(cmd: &tokio::process::Command) -> Vec<String> {
        cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    /// Regression test: a rotated HDR source must not lose its rotation —
    /// ffmpeg only honors the last `-vf` on a command line, so the command
    /// builder must fold the transpose chain and the HDR tonemap chain into
    /// one `-vf` instead of emitting both separately.
    #[test]
    fn rotated_hdr_source_keeps_both_transpose_and_tonemap_in_one_vf() {
        let transcoder = FfmpegTranscoder::new(None, EncoderCapabilities::default());
        let quality = QualityDecision::Cq(28);
        let mut metadata = metadata_with("hevc", Some("aac"));
        metadata.color_transfer = Some("smpte2084".into());
        let request = TranscodeRequest {
            job_id: 1,
            input: Path::new("/in/clip.mkv"),
            output: Path::new("/out/clip.mkv"),
            rotation: Rotation::R90,
            quality: &quality,
            metadata: &metadata,
            gpu_mode: false,
            target_codec: TargetCodec::Hevc,
            cpu_fallback_allowed: true,
            encoded_tag_value: "1",
        };
        let cmd = transcoder.build_command(&request);
        let args = args_of(&cmd);
        assert_eq!(args.iter().filter(|a| a.as_str() == "-vf").count(), 1, "expected exactly one -vf flag");
        let pos = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[pos + 1].starts_with("transpose=1,zscale="));
    }

    /// Regression test: the audio policy must classify the *audio* stream's
    /// codec, not the video codec carried on `Metadata::codec` — a video
    /// codec like `hevc` is never in the lossless/passthrough lists, so this
    /// bug silently forced every job onto the unknown-codec 192k fallback.
    #[test]
    fn audio_args_are_derived_from_the_audio_codec_not_the_video_codec() {
        let transcoder = FfmpegTranscoder::new(None, EncoderCapabilities::default());
        let quality = QualityDecision::Cq(28);
        let metadata = metadata_with("hevc", Some("flac"));
        let request = TranscodeRequest {
            job_id: 1,
            input: Path::new("/in/clip.mkv"),
            output: Path::new("/out/clip.mkv"),
            rotation: Rotation::None,
            quality: &quality,
            metadata: &metadata,
            gpu_mode: false,
            target_codec: TargetCodec::Hevc,
            cpu_fallback_allowed: true,
            encoded_tag_value: "1",
        };
        let cmd = transcoder.build_command(&request);
        let args = args_of(&cmd);
        let pos = args.iter().position(|a| a == "-b:a").expect("expected -b:a for flac re-encode");
        assert_eq!(args[pos + 1], "256k");
    }

    #[test]
    fn audio_args_copy_through_for_aac_source() {
        let transcoder = FfmpegTranscoder::new(None, EncoderCapabilities::default());
        let quality = QualityDecision::Cq(28);
        let metadata = metadata_with("h264", Some("aac"));
        let request = TranscodeRequest {
            job_id: 1,
            input: Path::new("/in/clip.mp4"),
            output: Path::new("/out/clip.mp4"),
            rotation: Rotation::None,
            quality: &quality,
            metadata: &metadata,
            gpu_mode: false,
            target_codec: TargetCodec::Hevc,
            cpu_fallback_allowed: true,
            encoded_tag_value: "1",
        };
        let cmd = transcoder.build_command(&request);
        let args = args_of(&cmd);
        let pos = args.iter().position(|a| a == "-c:a").expect("expected -c:a");
        assert_eq!(args[pos + 1], "copy");
    }
}
