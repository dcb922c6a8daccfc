//! Quality-score / VMAF post-check (§11 "Quality-score/VMAF post-check"),
//! generalizing §4.9 step 14's verify-on-complete to an objective quality
//! gate alongside the custom-tag presence check. Grounded on a
//! `QualityScore`/`QualityScore::compute` pattern in `media/ffmpeg/mod.rs`,
//! which shells out to ffmpeg's `libvmaf` filter and parses the JSON log it
//! emits on stdout.

use std::path::Path;

use regex::Regex;
use tracing::info;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityScore {
    pub vmaf: Option<f64>,
}

impl QualityScore {
    /// Runs ffmpeg's `libvmaf` filter comparing `encoded` against
    /// `original`, parsing the VMAF score out of its JSON log. Spawned via
    /// `spawn_blocking` since the underlying process is synchronous.
    pub async fn compute(original: &Path, encoded: &Path) -> Result<Self> {
        let original = original.to_path_buf();
        let encoded = encoded.to_path_buf();
        tokio::task::spawn_blocking(move || Self::compute_blocking(&original, &encoded))
            .await
            .map_err(|e| OrchestratorError::Metadata(format!("quality-score task panicked: {e}")))?
    }

    fn compute_blocking(original: &Path, encoded: &Path) -> Result<Self> {
        info!(encoded = %encoded.display(), "computing VMAF quality score");

        let output = std::process::Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-i")
            .arg(encoded)
            .arg("-i")
            .arg(original)
            .arg("-lavfi")
            .arg("libvmaf=log_fmt=json:log_path=-")
            .arg("-f")
            .arg("null")
            .arg("-")
            .output()
            .map_err(|e| OrchestratorError::Metadata(format!("failed to run VMAF check: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::Metadata(format!("VMAF check failed: {stderr}")));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let vmaf = parse_vmaf_score(&stdout).or_else(|| parse_vmaf_score(&stderr));
        Ok(Self { vmaf })
    }
}

fn parse_vmaf_score(text: &str) -> Option<f64> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if let Some(score) = value.pointer("/pooled_metrics/vmaf/mean").and_then(|v| v.as_f64()) {
            return Some(score);
        }
    }
    let re = Regex::new(r#""vmaf"\s*:\s*([0-9.]+)"#).ok()?;
    re.captures(text)?.get(1)?.as_str().parse().ok()
}
