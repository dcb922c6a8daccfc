//! Metadata Adapter (§4.4): the long-lived EXIF/XMP side-channel tool
//! (`extract`/`copy_preserved`, serialized per §4.4 "single-threaded per
//! process"), camera-pattern matching, "previously encoded" detection, and
//! the per-path cache (I5: monotonic, insert-or-get). Grounded on a
//! single-writer access pattern in `media/analyzer.rs` for the
//! serialization discipline, and on a `-map_metadata` ffmpeg passthrough
//! in `media/ffmpeg/mod.rs` for the transcoder-side half of metadata
//! preservation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{CameraPattern, EffectiveConfig};
use crate::error::{OrchestratorError, Result};
use crate::model::Metadata;
use crate::probe::{Prober, ENCODED_TAG_KEY};

/// Matches `metadata.camera_model` against the configured camera patterns
/// in order; the first match's override is carried onto the metadata.
pub fn apply_camera_override(metadata: &mut Metadata, patterns: &[CameraPattern]) {
    let Some(model) = metadata.camera_model.as_deref() else {
        return;
    };
    for entry in patterns {
        let Ok(regex) = Regex::new(&format!("(?i){}", entry.pattern)) else {
            continue;
        };
        if regex.is_match(model) {
            metadata.quality_override = Some(entry.overrides.clone());
            debug!(camera_model = model, pattern = entry.pattern, "matched camera override");
            return;
        }
    }
}

/// Returns true when `camera_include` is non-empty and the metadata's
/// camera model matches none of the patterns (§4.4 "camera include
/// filter").
pub fn excluded_by_camera_filter(metadata: &Metadata, include: &[String]) -> bool {
    if include.is_empty() {
        return false;
    }
    let Some(model) = metadata.camera_model.as_deref() else {
        return true;
    };
    !include.iter().any(|pattern| {
        Regex::new(&format!("(?i){pattern}")).map(|re| re.is_match(model)).unwrap_or(false)
    })
}

/// Fields an EXIF/XMP scan can contribute on top of what the Probe Adapter
/// already read from the container (§4.4 `extract`).
#[derive(Debug, Clone, Default)]
pub struct ExifFields {
    pub camera_model: Option<String>,
    pub previously_encoded: bool,
}

/// The long-lived auxiliary process behind §4.4: scans EXIF/XMP fields and
/// writes preserved metadata onto a target file. Built behind a trait so
/// `--demo` mode and tests never spawn a real `exiftool` (§10.4).
#[async_trait]
pub trait MetadataTool: Send + Sync {
    /// Scans every available EXIF/XMP string field of `path` for the
    /// configured camera patterns (case-insensitive substring, first match
    /// wins) and for the "previously encoded" custom tag.
    async fn extract(&self, path: &Path, camera_patterns: &[CameraPattern]) -> Result<ExifFields>;

    /// All-or-nothing metadata transfer from `source` onto `target`, plus
    /// `extra_tags` written on top. Failures must not corrupt `target`.
    async fn copy_preserved(&self, source: &Path, target: &Path, extra_tags: &[(String, String)]) -> Result<()>;
}

/// `exiftool`-backed `MetadataTool`. The external tool is single-threaded
/// per process (§4.4), so every call takes `lock` first — a single-writer
/// discipline around the external analyzer process.
pub struct ExifToolAdapter {
    lock: Mutex<()>,
}

impl ExifToolAdapter {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }
}

impl Default for ExifToolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataTool for ExifToolAdapter {
    async fn extract(&self, path: &Path, camera_patterns: &[CameraPattern]) -> Result<ExifFields> {
        let _guard = self.lock.lock().await;
        let path = path.to_path_buf();
        let patterns = camera_patterns.to_vec();
        tokio::task::spawn_blocking(move || Self::extract_blocking(&path, &patterns))
            .await
            .map_err(|e| OrchestratorError::Metadata(format!("exiftool task panicked: {e}")))?
    }

    async fn copy_preserved(&self, source: &Path, target: &Path, extra_tags: &[(String, String)]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let source = source.to_path_buf();
        let target = target.to_path_buf();
        let extra_tags = extra_tags.to_vec();
        tokio::task::spawn_blocking(move || Self::copy_preserved_blocking(&source, &target, &extra_tags))
            .await
            .map_err(|e| OrchestratorError::Metadata(format!("exiftool task panicked: {e}")))?
    }
}

impl ExifToolAdapter {
    fn extract_blocking(path: &Path, camera_patterns: &[CameraPattern]) -> Result<ExifFields> {
        let output = std::process::Command::new("exiftool")
            .arg("-j")
            .arg("-a")
            .arg("-G")
            .arg(path)
            .output()
            .map_err(|e| OrchestratorError::Metadata(format!("failed to run exiftool: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::Metadata(format!("exiftool failed for {path:?}: {stderr}")));
        }

        let parsed: Vec<HashMap<String, serde_json::Value>> = serde_json::from_slice(&output.stdout)
            .map_err(|e| OrchestratorError::Metadata(format!("failed to parse exiftool json for {path:?}: {e}")))?;
        let fields = parsed.into_iter().next().unwrap_or_default();

        let previously_encoded = fields.values().any(|v| {
            v.as_str().map(|s| s == ENCODED_TAG_KEY || s.contains(ENCODED_TAG_KEY)).unwrap_or(false)
        }) || fields.keys().any(|k| k.contains(ENCODED_TAG_KEY));

        let mut camera_model = None;
        'patterns: for entry in camera_patterns {
            let Ok(regex) = Regex::new(&format!("(?i){}", entry.pattern)) else { continue };
            for value in fields.values() {
                if let Some(s) = value.as_str() {
                    if regex.is_match(s) {
                        camera_model = Some(s.to_string());
                        break 'patterns;
                    }
                }
            }
        }

        if camera_model.is_none() {
            camera_model = fields
                .get("EXIF:Model")
                .or_else(|| fields.get("Model"))
                .or_else(|| fields.get("QuickTime:Model"))
                .and_then(|v| v.as_str())
                .map(String::from);
        }

        Ok(ExifFields { camera_model, previously_encoded })
    }

    fn copy_preserved_blocking(source: &Path, target: &Path, extra_tags: &[(String, String)]) -> Result<()> {
        let mut cmd = std::process::Command::new("exiftool");
        cmd.arg("-TagsFromFile").arg(source).arg("-all:all").arg("-overwrite_original");
        for (key, value) in extra_tags {
            cmd.arg(format!("-{key}={value}"));
        }
        cmd.arg(target);

        let output = cmd.stdout(Stdio::null()).output();
        match output {
            Ok(out) if out.status.success() => Ok(()),
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                warn!(source = %source.display(), target = %target.display(), error = %stderr, "metadata copy failed, target left untouched");
                Ok(())
            }
            Err(e) => {
                warn!(source = %source.display(), target = %target.display(), error = %e, "failed to spawn exiftool for metadata copy");
                Ok(())
            }
        }
    }
}

/// Thread-safe insert-or-get cache keyed by source path. Per I5, an entry
/// is written at most once; subsequent lookups return the cached value.
#[derive(Default)]
pub struct MetadataCache {
    entries: StdMutex<HashMap<PathBuf, Metadata>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Metadata> {
        self.entries.lock().unwrap().get(path).cloned()
    }

    /// Returns the cached entry if present, otherwise probes, applies the
    /// camera override, caches, and returns the result.
    pub async fn get_or_probe(
        &self,
        path: &Path,
        prober: &dyn Prober,
        config: &EffectiveConfig,
    ) -> Result<Metadata> {
        if let Some(cached) = self.get(path) {
            return Ok(cached);
        }

        let mut metadata = prober.probe(path).await?;
        apply_camera_override(&mut metadata, &config.camera_patterns);

        self.entries.lock().unwrap().entry(path.to_path_buf()).or_insert_with(|| metadata.clone());
        Ok(metadata)
    }

    /// Like `get_or_probe`, but also runs the EXIF/XMP `extract` operation
    /// and folds its camera model / previously-encoded signal into the
    /// ffprobe-derived `Metadata` before caching (§4.4). The EXIF model, if
    /// found, takes precedence over container tags since it reads from a
    /// richer field set; `previously_encoded` is the logical OR of both
    /// adapters' signals.
    pub async fn get_or_extract(
        &self,
        path: &Path,
        prober: &dyn Prober,
        metadata_tool: &dyn MetadataTool,
        config: &EffectiveConfig,
    ) -> Result<Metadata> {
        if let Some(cached) = self.get(path) {
            return Ok(cached);
        }

        let mut metadata = prober.probe(path).await?;
        let exif = metadata_tool.extract(path, &config.camera_patterns).await?;
        if exif.camera_model.is_some() {
            metadata.camera_model = exif.camera_model;
        }
        metadata.previously_encoded = metadata.previously_encoded || exif.previously_encoded;
        apply_camera_override(&mut metadata, &config.camera_patterns);

        self.entries.lock().unwrap().entry(path.to_path_buf()).or_insert_with(|| metadata.clone());
        Ok(metadata)
    }
}

/// Builds the ffmpeg args that carry the source's container metadata
/// through to the output and stamp the "previously encoded" tag, so a
/// later scan recognizes this orchestrator's own outputs (§4.4).
pub fn metadata_passthrough_args(tag_value: &str) -> Vec<String> {
    vec![
        "-map_metadata".to_string(),
        "0".to_string(),
        "-metadata".to_string(),
        format!("{}={tag_value}", crate::probe::ENCODED_TAG_KEY),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QualityOverride, RawRateSpec};

    fn metadata_with_camera(model: &str) -> Metadata {
        Metadata {
            width: 1920,
            height: 1080,
            fps: 30.0,
            codec: "h264".into(),
            color_space: None,
            duration_secs: 10.0,
            source_bitrate_kbps: Some(8000),
            camera_model: Some(model.to_string()),
            previously_encoded: false,
            quality_override: None,
            color_transfer: None,
            audio_codec: None,
        }
    }

    #[test]
    fn first_matching_camera_pattern_wins() {
        let patterns = vec![
            CameraPattern {
                pattern: "GoPro.*".into(),
                overrides: QualityOverride { cq: Some(20), rate: None },
            },
            CameraPattern {
                pattern: ".*".into(),
                overrides: QualityOverride { cq: Some(30), rate: None },
            },
        ];
        let mut metadata = metadata_with_camera("GoPro HERO11 Black");
        apply_camera_override(&mut metadata, &patterns);
        assert_eq!(metadata.quality_override.unwrap().cq, Some(20));
    }

    #[test]
    fn falls_through_to_later_pattern_when_earlier_does_not_match() {
        let patterns = vec![
            CameraPattern {
                pattern: "GoPro.*".into(),
                overrides: QualityOverride { cq: Some(20), rate: None },
            },
            CameraPattern {
                pattern: ".*".into(),
                overrides: QualityOverride { cq: Some(30), rate: None },
            },
        ];
        let mut metadata = metadata_with_camera("iPhone 15 Pro");
        apply_camera_override(&mut metadata, &patterns);
        assert_eq!(metadata.quality_override.unwrap().cq, Some(30));
    }

    #[test]
    fn camera_override_pattern_matches_case_insensitively() {
        let patterns = vec![CameraPattern {
            pattern: "gopro".into(),
            overrides: QualityOverride { cq: Some(20), rate: None },
        }];
        let mut metadata = metadata_with_camera("GoPro HERO11 Black");
        apply_camera_override(&mut metadata, &patterns);
        assert_eq!(metadata.quality_override.unwrap().cq, Some(20));
    }

    #[test]
    fn camera_include_filter_matches_case_insensitively() {
        let metadata = metadata_with_camera("GoPro HERO11 Black");
        assert!(!excluded_by_camera_filter(&metadata, &["gopro".to_string()]));
    }

    #[test]
    fn camera_include_filter_excludes_non_matching_models() {
        let metadata = metadata_with_camera("Canon EOS R5");
        assert!(excluded_by_camera_filter(&metadata, &["GoPro.*".to_string()]));
        assert!(!excluded_by_camera_filter(&metadata, &["Canon.*".to_string()]));
        assert!(!excluded_by_camera_filter(&metadata, &[]));
    }

    #[test]
    fn missing_camera_model_is_excluded_when_filter_configured() {
        let mut metadata = metadata_with_camera("whatever");
        metadata.camera_model = None;
        assert!(excluded_by_camera_filter(&metadata, &["GoPro.*".to_string()]));
    }

    #[test]
    fn quality_override_rate_resolves_with_same_class_values() {
        let raw = RawRateSpec {
            bps: Some("2M".into()),
            minrate: Some("1M".into()),
            maxrate: Some("3M".into()),
            cap: None,
        };
        assert!(raw.resolve().is_ok());
    }
}
