//! Probe Adapter (§4.3): wraps `ffprobe` behind a `Prober` trait so the
//! orchestrator and its tests can swap in a synthetic implementation for
//! `--demo` mode (§10.4). Grounded on a
//! `media/analyzer.rs::FfmpegAnalyzer` pattern.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OrchestratorError, Result};
use crate::model::Metadata;

#[derive(Debug, Serialize, Deserialize)]
struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct FfprobeStream {
    codec_name: String,
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    coded_width: Option<u32>,
    coded_height: Option<u32>,
    bit_rate: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    color_space: Option<String>,
    color_transfer: Option<String>,
    tags: Option<std::collections::HashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    tags: Option<std::collections::HashMap<String, String>>,
}

/// The custom tag this orchestrator stamps on its own encodes, so a later
/// scan recognizes an already-processed file (§4.4 "previously encoded").
pub const ENCODED_TAG_KEY: &str = "encoded_by_reelforge";

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<Metadata>;
}

pub struct FfprobeProber;

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<Metadata> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::probe_blocking(&path))
            .await
            .map_err(|e| OrchestratorError::Probe(format!("probe task panicked: {e}")))?
    }
}

impl FfprobeProber {
    fn probe_blocking(path: &Path) -> Result<Metadata> {
        let output = std::process::Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_entries",
                "format=duration,bit_rate,tags:stream=codec_type,codec_name,width,height,coded_width,coded_height,bit_rate,avg_frame_rate,r_frame_rate,color_space,color_transfer,tags",
            ])
            .arg(path)
            .output()
            .map_err(|e| OrchestratorError::Probe(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::Probe(format!("ffprobe failed for {path:?}: {stderr}")));
        }

        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| OrchestratorError::Probe(format!("failed to parse ffprobe json for {path:?}: {e}")))?;

        let video = parsed
            .streams
            .iter()
            .find(|s| s.codec_type == "video")
            .ok_or_else(|| OrchestratorError::Probe(format!("no video stream in {path:?}")))?;

        let width = video.width.or(video.coded_width).unwrap_or(0);
        let height = video.height.or(video.coded_height).unwrap_or(0);
        let fps = parse_fps(video.avg_frame_rate.as_deref().or(video.r_frame_rate.as_deref()).unwrap_or(""))
            .unwrap_or(0.0);
        let duration_secs = parsed.format.duration.as_deref().and_then(|d| d.parse().ok()).unwrap_or(0.0);
        let source_bitrate_kbps = parsed
            .format
            .bit_rate
            .as_deref()
            .or(video.bit_rate.as_deref())
            .and_then(|b| b.parse::<u64>().ok())
            .map(|bps| bps / 1000);

        let camera_model = parsed
            .format
            .tags
            .as_ref()
            .and_then(|tags| tags.get("com.apple.quicktime.model").or_else(|| tags.get("model")))
            .cloned();

        let previously_encoded = parsed
            .format
            .tags
            .as_ref()
            .map(|tags| tags.contains_key(ENCODED_TAG_KEY))
            .unwrap_or(false);

        let audio_codec = audio_codec_from_streams(&parsed.streams);

        if width == 0 || height == 0 {
            warn!(path = %path.display(), "ffprobe returned zero dimensions");
        }

        Ok(Metadata {
            width,
            height,
            fps,
            codec: video.codec_name.clone(),
            color_space: video.color_space.clone(),
            duration_secs,
            source_bitrate_kbps,
            camera_model,
            previously_encoded,
            quality_override: None,
            color_transfer: video.color_transfer.clone(),
            audio_codec,
        })
    }
}

/// The first audio stream's codec name, or `None` if the container has no
/// audio track. Kept separate from `codec` (the video stream's codec name),
/// which the fixed audio policy (§6) must never be classified against.
fn audio_codec_from_streams(streams: &[FfprobeStream]) -> Option<String> {
    streams.iter().find(|s| s.codec_type == "audio").map(|s| s.codec_name.clone())
}

fn parse_fps(raw: &str) -> Option<f64> {
    if let Some((num, den)) = raw.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    raw.parse().ok()
}
