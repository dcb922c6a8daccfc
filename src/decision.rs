//! Decision Logic (§4.8): resolves the effective quality target and
//! rotation for a Job from config + metadata + filename. Pure functions,
//! no I/O — grounded on a `QualityProfile`/`RateControl` dispatch pattern
//! in `media/ffmpeg/mod.rs` generalized to the tagged
//! `QualityDecision`/`Rotation` variants (§9).

use std::path::Path;

use crate::config::{EffectiveConfig, QualityMode};
use crate::error::{OrchestratorError, Result};
use crate::model::{Metadata, QualityDecision, Rotation};

pub fn decide_quality(metadata: &Metadata, config: &EffectiveConfig) -> Result<QualityDecision> {
    match config.quality_mode {
        QualityMode::Cq => {
            let cq = metadata
                .quality_override
                .as_ref()
                .and_then(|o| o.cq)
                .unwrap_or(config.baseline_cq);
            Ok(QualityDecision::Cq(cq))
        }
        QualityMode::Rate => {
            let rate = if let Some(override_rate) = metadata.quality_override.as_ref().and_then(|o| o.rate.as_ref()) {
                override_rate.resolve()?
            } else {
                config
                    .baseline_rate
                    .clone()
                    .ok_or_else(|| OrchestratorError::Config("rate mode requires a resolved baseline rate".into()))?
            };
            rate.validate_same_class()?;

            let bps = rate.bps.resolve(metadata.source_bitrate_kbps);
            let mut minrate = rate.minrate.map(|v| v.resolve(metadata.source_bitrate_kbps));
            let mut maxrate = rate.maxrate.map(|v| v.resolve(metadata.source_bitrate_kbps));

            if let Some(cap) = rate.cap {
                let cap_value = cap.resolve(metadata.source_bitrate_kbps);
                minrate = minrate.map(|v| v.min(cap_value));
                maxrate = Some(maxrate.map(|v| v.min(cap_value)).unwrap_or(cap_value));
            }

            Ok(QualityDecision::Rate { bps, minrate, maxrate })
        }
    }
}

/// First-match-wins against the filename (§4.8, §8 "first configured
/// wins"). `path` resolves CLI-forced rotation and per-root
/// `autorotate: false` overrides ahead of the global manual rotation
/// (`EffectiveConfig::manual_rotation_for`, §6 precedence).
pub fn decide_rotation(path: &Path, config: &EffectiveConfig) -> Rotation {
    if let Some(manual) = config.manual_rotation_for(path) {
        return manual;
    }
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    for (regex, rotation) in &config.rotation_rules {
        if regex.is_match(filename) {
            return *rotation;
        }
    }
    Rotation::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueSortMode, RootMapping, VerifyFailAction};
    use regex::Regex;

    fn base_config() -> EffectiveConfig {
        EffectiveConfig {
            input_roots: vec![],
            output_mapping: RootMapping::Suffix("_out".into()),
            error_mapping: RootMapping::Suffix("_err".into()),
            extensions: vec!["mp4".into()],
            min_size_bytes: 0,
            min_compression_ratio: 0.1,
            quality_mode: QualityMode::Cq,
            baseline_cq: 28,
            baseline_rate: None,
            target_codec: crate::config::TargetCodec::Hevc,
            output_container: crate::config::OutputContainer::default(),
            camera_patterns: vec![],
            camera_include: vec![],
            skip_target_codec: false,
            rotation_rules: vec![],
            manual_rotation: None,
            cpu_fallback: true,
            gpu_mode: false,
            max_threads_start: 2,
            runtime_min_threads: 1,
            runtime_max_threads: 4,
            prefetch_factor: 1,
            queue_sort: QueueSortMode::Name,
            queue_seed: None,
            clean_errors_on_start: false,
            verify_fail_action: VerifyFailAction::Off,
            log_path: None,
            root_overrides: vec![],
            demo: false,
            cli_forced_gpu: None,
            cli_forced_cq: None,
            cli_forced_rotation: None,
            min_vmaf_score: None,
        }
    }

    fn metadata() -> Metadata {
        Metadata {
            width: 1920,
            height: 1080,
            fps: 30.0,
            codec: "h264".into(),
            color_space: None,
            duration_secs: 10.0,
            source_bitrate_kbps: Some(8000),
            camera_model: None,
            previously_encoded: false,
            quality_override: None,
            color_transfer: None,
            audio_codec: None,
        }
    }

    #[test]
    fn cq_mode_uses_baseline_without_override() {
        let config = base_config();
        let decision = decide_quality(&metadata(), &config).unwrap();
        assert!(matches!(decision, QualityDecision::Cq(28)));
    }

    #[test]
    fn cq_mode_prefers_camera_override() {
        let config = base_config();
        let mut md = metadata();
        md.quality_override = Some(crate::config::QualityOverride { cq: Some(18), rate: None });
        let decision = decide_quality(&md, &config).unwrap();
        assert!(matches!(decision, QualityDecision::Cq(18)));
    }

    #[test]
    fn manual_rotation_overrides_regex_table() {
        let mut config = base_config();
        config.manual_rotation = Some(Rotation::R180);
        config.rotation_rules.push((Regex::new("vertical").unwrap(), Rotation::R90));
        assert_eq!(decide_rotation(Path::new("vertical_clip.mp4"), &config), Rotation::R180);
    }

    #[test]
    fn first_matching_rotation_rule_wins() {
        let mut config = base_config();
        config.rotation_rules.push((Regex::new("clip").unwrap(), Rotation::R90));
        config.rotation_rules.push((Regex::new(".*").unwrap(), Rotation::R270));
        assert_eq!(decide_rotation(Path::new("clip_01.mp4"), &config), Rotation::R90);
    }

    #[test]
    fn no_match_defaults_to_no_rotation() {
        let config = base_config();
        assert_eq!(decide_rotation(Path::new("whatever.mp4"), &config), Rotation::None);
    }

    #[test]
    fn cli_forced_rotation_overrides_everything() {
        let mut config = base_config();
        config.manual_rotation = Some(Rotation::R180);
        config.cli_forced_rotation = Some(Rotation::R270);
        assert_eq!(decide_rotation(Path::new("clip.mp4"), &config), Rotation::R270);
    }

    #[test]
    fn per_root_autorotate_false_disables_rotation_for_matching_paths() {
        use crate::config::{RootOverrideDoc, RootOverrideEntry};

        let mut config = base_config();
        config.manual_rotation = Some(Rotation::R180);
        config.root_overrides.push(RootOverrideEntry {
            root: "/media/static".into(),
            doc: RootOverrideDoc { autorotate: Some(false), ..Default::default() },
        });
        assert_eq!(decide_rotation(Path::new("/media/static/clip.mp4"), &config), Rotation::None);
        assert_eq!(decide_rotation(Path::new("/media/other/clip.mp4"), &config), Rotation::R180);
    }
}
